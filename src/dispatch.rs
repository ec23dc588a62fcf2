use crate::analytical;
use crate::benchmark::{self, BenchmarkReport, BenchmarkSettings};
use crate::config::EngineConfig;
use crate::engine::cancel::CancelToken;
use crate::engine::fallback::FallbackEngine;
use crate::engine::native::NativeEngine;
use crate::engine::PricingEngine;
use crate::errors::{EngineError, EngineResult};
use crate::types::*;
use portable_atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;

// ── Dispatch State Machine ──

/// Stages of one `calculate()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    ProbeNative,
    InvokeNative,
    Fallback,
}

impl std::fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProbeNative => write!(f, "probe_native"),
            Self::InvokeNative => write!(f, "invoke_native"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub calculations: AtomicU64,
    pub native_runs: AtomicU64,
    pub fallback_runs: AtomicU64,
    pub native_failures: AtomicU64,
    pub validation_failures: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            calculations: AtomicU64::new(0),
            native_runs: AtomicU64::new(0),
            fallback_runs: AtomicU64::new(0),
            native_failures: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            calculations: self.calculations.load(Ordering::Relaxed),
            native_runs: self.native_runs.load(Ordering::Relaxed),
            fallback_runs: self.fallback_runs.load(Ordering::Relaxed),
            native_failures: self.native_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterSnapshot {
    pub calculations: u64,
    pub native_runs: u64,
    pub fallback_runs: u64,
    pub native_failures: u64,
    pub validation_failures: u64,
}

// ── Service ──

/// Entry point for collaborators. Owns both engines; the only place that
/// probes the native engine or degrades to the fallback.
pub struct PricingService<N = NativeEngine, F = FallbackEngine> {
    native: N,
    fallback: F,
    /// Admission control: caps concurrent engine runs across all callers.
    admission: Semaphore,
    benchmark: BenchmarkSettings,
    counters: PerfCounters,
}

impl PricingService {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_engines(
            NativeEngine::from_config(config),
            FallbackEngine::from_config(config),
            config,
        )
    }
}

impl<N: PricingEngine, F: PricingEngine> PricingService<N, F> {
    pub fn with_engines(native: N, fallback: F, config: &EngineConfig) -> Self {
        Self {
            native,
            fallback,
            admission: Semaphore::new(config.max_concurrent_runs.max(1)),
            benchmark: BenchmarkSettings {
                iterations: config.benchmark_iterations,
                max_threads: config.benchmark_max_threads,
                fallback_threads: config.fallback_threads.max(1),
            },
            counters: PerfCounters::new(),
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Pure query: same probe as a pricing call, no simulation, no side effects.
    pub fn status(&self) -> EngineStatus {
        let native_available = self.native.is_available();
        let default_implementation = if native_available {
            DefaultImplementation::Native
        } else if self.fallback.is_available() {
            DefaultImplementation::Fallback
        } else {
            DefaultImplementation::None
        };
        EngineStatus {
            native_available,
            default_implementation,
            analytical_available: true,
        }
    }

    pub async fn calculate(&self, request: &PricingRequest) -> EngineResult<PricingResult> {
        self.calculate_with_cancel(request, &CancelToken::new()).await
    }

    /// Price a request, preferring the native engine and degrading to the
    /// in-process engine on any native failure. Cancellation aborts without
    /// falling back.
    pub async fn calculate_with_cancel(
        &self,
        request: &PricingRequest,
        cancel: &CancelToken,
    ) -> EngineResult<PricingResult> {
        // Fail fast: nothing is queued or spawned for bad input.
        request.validate()?;

        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|e| EngineError::EngineFailure(format!("admission closed: {e}")))?;

        let run_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        self.counters.calculations.fetch_add(1, Ordering::Relaxed);

        let mut stage = DispatchStage::ProbeNative;
        let (estimate, implementation) = loop {
            tracing::debug!(run_id = %run_id, stage = %stage, "dispatch");
            match stage {
                DispatchStage::ProbeNative => {
                    stage = if self.native.is_available() {
                        DispatchStage::InvokeNative
                    } else {
                        DispatchStage::Fallback
                    };
                }
                DispatchStage::InvokeNative => match self.native.price(request, cancel).await {
                    Ok(estimate) => {
                        self.counters.native_runs.fetch_add(1, Ordering::Relaxed);
                        break (estimate, Implementation::Native);
                    }
                    Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                    Err(e) => {
                        self.counters.native_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(run_id = %run_id, error = %e, "native engine failed, falling back");
                        stage = DispatchStage::Fallback;
                    }
                },
                DispatchStage::Fallback => {
                    if !self.fallback.is_available() {
                        return Err(EngineError::EngineFailure(
                            "native engine failed and fallback is disabled".into(),
                        ));
                    }
                    match self.fallback.price(request, cancel).await {
                        Ok(estimate) => {
                            self.counters.fallback_runs.fetch_add(1, Ordering::Relaxed);
                            break (estimate, Implementation::Fallback);
                        }
                        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                        Err(e) => {
                            tracing::error!(run_id = %run_id, error = %e, "fallback engine failed");
                            return Err(EngineError::EngineFailure(e.to_string()));
                        }
                    }
                }
            }
        };

        let mut result = PricingResult {
            option_price: estimate.option_price,
            confidence: estimate.confidence,
            implementation,
            threads_used: estimate.threads_used,
            num_trials: request.num_trials,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            validation: None,
        };

        if request.validate_with_analytical {
            let validation = analytical::cross_validate(request, &result);
            if matches!(validation, Validation::Failed { .. }) {
                self.counters.validation_failures.fetch_add(1, Ordering::Relaxed);
            }
            result.validation = Some(validation);
        }

        tracing::info!(
            run_id = %run_id,
            implementation = %implementation,
            price = result.option_price,
            threads = result.threads_used,
            elapsed_ms = result.execution_time_ms,
            "calculation complete"
        );

        Ok(result)
    }

    pub async fn run_benchmark(&self, request: &PricingRequest) -> EngineResult<BenchmarkReport> {
        self.run_benchmark_with_cancel(request, &CancelToken::new()).await
    }

    pub async fn run_benchmark_with_cancel(
        &self,
        request: &PricingRequest,
        cancel: &CancelToken,
    ) -> EngineResult<BenchmarkReport> {
        request.validate()?;
        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|e| EngineError::EngineFailure(format!("admission closed: {e}")))?;
        benchmark::run_benchmark(&self.native, &self.fallback, request, self.benchmark, cancel).await
    }
}
