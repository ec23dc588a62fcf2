use crate::engine::cancel::CancelToken;
use crate::engine::PricingEngine;
use crate::errors::{EngineError, EngineResult};
use crate::types::{ConfidenceInterval, EngineEstimate, PricingRequest};
use std::collections::BTreeMap;
use std::time::Instant;

/// One timed invocation. `execution_time` is wall-clock milliseconds.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedRun {
    pub iteration: usize,
    pub execution_time: f64,
    pub option_price: f64,
    pub confidence: ConfidenceInterval,
}

/// Summary over the timed runs of one configuration (milliseconds).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimingStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub runs: Vec<TimedRun>,
}

impl TimingStats {
    pub fn from_runs(runs: Vec<TimedRun>) -> EngineResult<Self> {
        if runs.is_empty() {
            return Err(EngineError::EngineFailure("benchmark produced no timed runs".into()));
        }
        let mut times: Vec<f64> = runs.iter().map(|r| r.execution_time).collect();
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let median = median(&mut times);
        Ok(Self { min, max, avg, median, runs })
    }
}

/// Sort-and-midpoint median. Even counts average the two central values.
/// Callers guarantee a non-empty slice.
pub fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// One untimed warm-up call, then `iterations` timed calls.
pub fn measure_runs<F>(iterations: usize, mut run: F) -> EngineResult<Vec<TimedRun>>
where
    F: FnMut() -> EngineResult<EngineEstimate>,
{
    if iterations == 0 {
        return Err(EngineError::InvalidParameter("iterations must be >= 1".into()));
    }

    // Warm-up: excludes first-call overhead (page faults, thread start-up).
    run()?;

    let mut runs = Vec::with_capacity(iterations);
    for iteration in 1..=iterations {
        let start = Instant::now();
        let estimate = run()?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        runs.push(TimedRun {
            iteration,
            execution_time: elapsed,
            option_price: estimate.option_price,
            confidence: estimate.confidence,
        });
    }
    Ok(runs)
}

/// Result for one thread count of the native sweep.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum SweepEntry {
    Timing(TimingStats),
    Failed { error: String },
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
    pub generated_at: String,
    pub iterations: usize,
    /// Timings of the in-process engine.
    #[serde(rename = "javascriptLike")]
    pub fallback: TimingStats,
    pub native_available: bool,
    pub native: BTreeMap<usize, SweepEntry>,
    /// fallback avg / native avg, for thread counts that succeeded.
    pub speedup: BTreeMap<usize, f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkSettings {
    pub iterations: usize,
    pub max_threads: usize,
    pub fallback_threads: usize,
}

/// Time the fallback engine once, then sweep the native engine over
/// thread counts 1..=max_threads. A failed count is recorded, not fatal.
pub async fn run_benchmark<N, F>(
    native: &N,
    fallback: &F,
    request: &PricingRequest,
    settings: BenchmarkSettings,
    cancel: &CancelToken,
) -> EngineResult<BenchmarkReport>
where
    N: PricingEngine,
    F: PricingEngine,
{
    request.validate()?;

    tracing::info!(
        iterations = settings.iterations,
        max_threads = settings.max_threads,
        num_trials = request.num_trials,
        "benchmark started"
    );

    if !fallback.is_available() {
        return Err(EngineError::EngineFailure("fallback engine disabled".into()));
    }
    let fallback_stats = match fallback
        .benchmark(request, settings.fallback_threads, settings.iterations, cancel)
        .await
    {
        Ok(stats) => stats,
        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
        Err(e) => return Err(EngineError::EngineFailure(format!("fallback benchmark: {e}"))),
    };

    let native_available = native.is_available();
    let mut sweep = BTreeMap::new();
    if native_available {
        for threads in 1..=settings.max_threads {
            let entry = match native.benchmark(request, threads, settings.iterations, cancel).await {
                Ok(stats) => SweepEntry::Timing(stats),
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    tracing::warn!(threads, error = %e, "native benchmark failed at thread count");
                    SweepEntry::Failed { error: e.to_string() }
                }
            };
            sweep.insert(threads, entry);
        }
    } else {
        tracing::info!("native engine unavailable, skipping thread sweep");
    }

    let speedup = speedups(fallback_stats.avg, &sweep);

    Ok(BenchmarkReport {
        generated_at: chrono::Utc::now().to_rfc3339(),
        iterations: settings.iterations,
        fallback: fallback_stats,
        native_available,
        native: sweep,
        speedup,
    })
}

pub fn speedups(fallback_avg: f64, sweep: &BTreeMap<usize, SweepEntry>) -> BTreeMap<usize, f64> {
    sweep
        .iter()
        .filter_map(|(&threads, entry)| match entry {
            SweepEntry::Timing(stats) if stats.avg > 0.0 => Some((threads, fallback_avg / stats.avg)),
            _ => None,
        })
        .collect()
}
