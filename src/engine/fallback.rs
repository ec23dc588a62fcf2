use crate::benchmark::{self, TimingStats};
use crate::config::EngineConfig;
use crate::engine::cancel::CancelToken;
use crate::engine::parallel;
use crate::engine::sampler::resolve_base_seed;
use crate::engine::PricingEngine;
use crate::errors::{EngineError, EngineResult};
use crate::types::{EngineEstimate, Implementation, PricingRequest};

/// Portable in-process engine. Runs the Coordinator on the blocking pool so
/// the async caller is never stalled by CPU-bound simulation.
pub struct FallbackEngine {
    threads: usize,
    seed: Option<u64>,
    enabled: bool,
}

impl FallbackEngine {
    pub fn new(threads: usize, seed: Option<u64>) -> Self {
        Self {
            threads: threads.max(1),
            seed,
            enabled: true,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            threads: config.fallback_threads.max(1),
            seed: config.seed,
            enabled: config.fallback_enabled,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

fn simulate(
    request: &PricingRequest,
    threads: usize,
    seed: Option<u64>,
    cancel: &CancelToken,
) -> EngineResult<EngineEstimate> {
    let outcome = parallel::run_parallel(request, Some(threads), resolve_base_seed(seed), cancel)?;
    Ok(outcome.estimate.into_engine_estimate(outcome.threads_used))
}

impl PricingEngine for FallbackEngine {
    fn implementation(&self) -> Implementation {
        Implementation::Fallback
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn price(
        &self,
        request: &PricingRequest,
        cancel: &CancelToken,
    ) -> EngineResult<EngineEstimate> {
        let request = *request;
        let cancel = cancel.clone();
        let (threads, seed) = (self.threads, self.seed);
        tokio::task::spawn_blocking(move || simulate(&request, threads, seed, &cancel))
            .await
            .map_err(|e| EngineError::EngineFailure(format!("fallback task failed: {e}")))?
    }

    async fn benchmark(
        &self,
        request: &PricingRequest,
        threads: usize,
        iterations: usize,
        cancel: &CancelToken,
    ) -> EngineResult<TimingStats> {
        let request = *request;
        let cancel = cancel.clone();
        let seed = self.seed;
        tokio::task::spawn_blocking(move || {
            let runs = benchmark::measure_runs(iterations, || simulate(&request, threads, seed, &cancel))?;
            TimingStats::from_runs(runs)
        })
        .await
        .map_err(|e| EngineError::EngineFailure(format!("fallback benchmark task failed: {e}")))?
    }
}
