use crate::config::hardware_threads;
use crate::engine::accumulator::{Estimate, StatAccumulator};
use crate::engine::cancel::CancelToken;
use crate::engine::kernel::{run_trial, TrialParams};
use crate::engine::sampler::{BoxMuller, NormalSampler};
use crate::errors::{EngineError, EngineResult};
use crate::types::PricingRequest;
use portable_atomic::{AtomicBool, Ordering};
use smallvec::SmallVec;

/// Trials a worker runs between cancellation checks.
const CANCEL_CHECK_STRIDE: u64 = 4096;

/// Contiguous slice [start_trial, end_trial) of one run, owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPartition {
    pub thread_id: usize,
    pub start_trial: u64,
    pub end_trial: u64,
    pub rng_seed: u64,
}

impl WorkPartition {
    #[inline]
    pub fn len(&self) -> u64 {
        self.end_trial - self.start_trial
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end_trial == self.start_trial
    }
}

pub type Partitions = SmallVec<[WorkPartition; 16]>;

/// Merged statistics of one run plus the worker count that produced them.
#[derive(Debug, Clone, Copy)]
pub struct SimulationOutcome {
    pub accumulator: StatAccumulator,
    pub estimate: Estimate,
    pub threads_used: usize,
}

/// Hint absent or zero -> hardware concurrency. Always clamped to the trial
/// count so no worker receives an empty slice.
pub fn resolve_threads(hint: Option<usize>, num_trials: u64) -> usize {
    let requested = match hint {
        Some(t) if t > 0 => t,
        _ => hardware_threads(),
    };
    (requested as u64).min(num_trials).max(1) as usize
}

/// Split [0, num_trials) into `threads` slices. The first `num_trials % threads`
/// slices take one extra trial.
pub fn partition(num_trials: u64, threads: usize, base_seed: u64) -> Partitions {
    let threads = threads.max(1) as u64;
    let base = num_trials / threads;
    let remainder = num_trials % threads;

    let mut partitions = Partitions::new();
    let mut start = 0u64;
    for i in 0..threads {
        let size = base + u64::from(i < remainder);
        partitions.push(WorkPartition {
            thread_id: i as usize,
            start_trial: start,
            end_trial: start + size,
            rng_seed: base_seed.wrapping_add(i),
        });
        start += size;
    }
    partitions
}

/// Fork-join pricing run with Box–Muller samplers on independent PCG streams.
pub fn run_parallel(
    request: &PricingRequest,
    thread_hint: Option<usize>,
    base_seed: u64,
    cancel: &CancelToken,
) -> EngineResult<SimulationOutcome> {
    run_parallel_with(request, thread_hint, base_seed, cancel, |part| {
        BoxMuller::for_stream(part.rng_seed, part.thread_id)
    })
}

/// Fork-join pricing run with a caller-supplied sampler per partition.
///
/// Each worker builds its own sampler on its own thread and keeps only a
/// `StatAccumulator`, so memory per worker is constant in the trial count.
/// The merge happens after every worker has joined.
pub fn run_parallel_with<F, S>(
    request: &PricingRequest,
    thread_hint: Option<usize>,
    base_seed: u64,
    cancel: &CancelToken,
    make_sampler: F,
) -> EngineResult<SimulationOutcome>
where
    F: Fn(&WorkPartition) -> S + Sync,
    S: NormalSampler,
{
    let params = TrialParams::from_request(request)?;
    let threads = resolve_threads(thread_hint, request.num_trials);
    let partitions = partition(request.num_trials, threads, base_seed);

    tracing::debug!(
        threads,
        num_trials = request.num_trials,
        "dispatching partitions"
    );

    // Raised when a worker cannot be spawned, so the ones already running stop early.
    let abort = AtomicBool::new(false);

    let results: SmallVec<[EngineResult<StatAccumulator>; 16]> = if partitions.len() == 1 {
        let part = &partitions[0];
        let mut sampler = make_sampler(part);
        SmallVec::from_iter([run_partition(&params, part, &mut sampler, cancel, &abort)])
    } else {
        std::thread::scope(|scope| {
            let params = &params;
            let make_sampler = &make_sampler;
            let abort = &abort;
            let mut handles = SmallVec::<[_; 16]>::with_capacity(partitions.len());
            for part in &partitions {
                let spawned = std::thread::Builder::new()
                    .name(format!("mc-worker-{}", part.thread_id))
                    .spawn_scoped(scope, move || {
                        let mut sampler = make_sampler(part);
                        run_partition(params, part, &mut sampler, cancel, abort)
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        abort.store(true, Ordering::Release);
                        tracing::error!(thread_id = part.thread_id, threads, error = %e, "worker spawn failed");
                        return SmallVec::from_iter([Err(EngineError::EngineFailure(format!(
                            "failed to spawn worker {} of {threads}: {e}",
                            part.thread_id
                        )))]);
                    }
                }
            }

            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(EngineError::EngineFailure("simulation worker panicked".into()))
                    })
                })
                .collect()
        })
    };

    // Single-threaded merge after the join barrier.
    let mut merged = StatAccumulator::default();
    for result in results {
        merged.merge(&result?);
    }

    if merged.count != request.num_trials {
        return Err(EngineError::EngineFailure(format!(
            "partitions covered {} of {} trials",
            merged.count, request.num_trials
        )));
    }

    Ok(SimulationOutcome {
        accumulator: merged,
        estimate: merged.finalize(params.discount),
        threads_used: partitions.len(),
    })
}

fn run_partition<S: NormalSampler>(
    params: &TrialParams,
    part: &WorkPartition,
    sampler: &mut S,
    cancel: &CancelToken,
    abort: &AtomicBool,
) -> EngineResult<StatAccumulator> {
    let mut acc = StatAccumulator::default();
    let mut trial = part.start_trial;
    while trial < part.end_trial {
        if cancel.is_cancelled() || abort.load(Ordering::Acquire) {
            return Err(EngineError::Cancelled);
        }
        let chunk_end = (trial + CANCEL_CHECK_STRIDE).min(part.end_trial);
        for _ in trial..chunk_end {
            acc.push(run_trial(params, sampler));
        }
        trial = chunk_end;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytical;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SHOCKS: [f64; 7] = [0.3, -1.2, 2.1, 0.0, -0.4, 1.7, -2.5];

    /// Replays a fixed shock sequence indexed by global trial number, so the
    /// same trial sees the same shock however the run is partitioned.
    struct Replay {
        next: u64,
    }

    impl NormalSampler for Replay {
        fn sample(&mut self) -> f64 {
            let z = SHOCKS[(self.next % SHOCKS.len() as u64) as usize];
            self.next += 1;
            z
        }
    }

    fn atm_call(num_trials: u64) -> PricingRequest {
        PricingRequest::new(100.0, 100.0, 0.05, 0.2, 1.0, true, num_trials)
    }

    #[test]
    fn test_partitions_cover_exactly() {
        for num_trials in [1u64, 2, 7, 16, 17, 100, 1001] {
            for threads in 1..=num_trials.min(20) as usize {
                let parts = partition(num_trials, threads, 0);
                assert_eq!(parts.len(), threads);
                assert_eq!(parts.iter().map(|p| p.len()).sum::<u64>(), num_trials);
                assert_eq!(parts[0].start_trial, 0);
                assert_eq!(parts[parts.len() - 1].end_trial, num_trials);
                for pair in parts.windows(2) {
                    assert_eq!(pair[0].end_trial, pair[1].start_trial, "gap or overlap");
                }
                let max = parts.iter().map(|p| p.len()).max().unwrap();
                let min = parts.iter().map(|p| p.len()).min().unwrap();
                assert!(max - min <= 1, "uneven load {min}..{max}");
                assert!(parts.iter().all(|p| !p.is_empty()));
            }
        }
    }

    #[test]
    fn test_remainder_goes_to_first_partitions() {
        let parts = partition(10, 4, 0);
        let sizes: Vec<u64> = parts.iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_partition_seeds_unique() {
        let parts = partition(1000, 8, 12345);
        for (i, a) in parts.iter().enumerate() {
            for b in &parts[i + 1..] {
                assert_ne!(a.rng_seed, b.rng_seed);
            }
        }
    }

    #[test]
    fn test_resolve_threads_clamps() {
        assert_eq!(resolve_threads(Some(8), 3), 3);
        assert_eq!(resolve_threads(Some(2), 1000), 2);
        assert_eq!(resolve_threads(Some(0), 1), 1);
        assert_eq!(resolve_threads(None, 1_000_000), hardware_threads().min(1_000_000));
    }

    #[test]
    fn test_partitioning_does_not_change_aggregate() {
        let req = atm_call(10_007);
        let cancel = CancelToken::new();
        let make = |p: &WorkPartition| Replay { next: p.start_trial };

        let one = run_parallel_with(&req, Some(1), 0, &cancel, make).unwrap();
        let four = run_parallel_with(&req, Some(4), 0, &cancel, make).unwrap();

        assert_eq!(one.threads_used, 1);
        assert_eq!(four.threads_used, 4);
        assert_eq!(one.accumulator.count, four.accumulator.count);
        let rel = |a: f64, b: f64| (a - b).abs() / a.abs().max(1.0);
        assert!(rel(one.accumulator.sum, four.accumulator.sum) < 1e-12);
        assert!(rel(one.accumulator.sum_of_squares, four.accumulator.sum_of_squares) < 1e-12);
    }

    #[test]
    fn test_invalid_input_never_samples() {
        let created = AtomicUsize::new(0);
        let cancel = CancelToken::new();
        let bad = [
            PricingRequest { spot: 0.0, ..atm_call(100) },
            PricingRequest { sigma: -0.1, ..atm_call(100) },
            atm_call(0),
        ];
        for req in bad {
            let err = run_parallel_with(&req, Some(4), 0, &cancel, |p| {
                created.fetch_add(1, Ordering::SeqCst);
                Replay { next: p.start_trial }
            })
            .unwrap_err();
            assert!(err.is_caller_fault(), "expected InvalidParameter, got {err}");
        }
        assert_eq!(created.load(Ordering::SeqCst), 0, "no sampler may be built");
    }

    #[test]
    fn test_atm_call_near_analytical() {
        let req = atm_call(200_000);
        let out = run_parallel(&req, Some(4), 2024, &CancelToken::new()).unwrap();
        let exact = analytical::price(&req).unwrap();
        let err = (out.estimate.option_price - exact).abs();
        let tolerance = 4.0 * out.estimate.std_error * (-0.05f64).exp();
        assert!(err < tolerance, "mc={} exact={exact} err={err}", out.estimate.option_price);
    }

    fn coverage(req: &PricingRequest, threads: usize, runs: u64) -> u64 {
        let exact = analytical::price(req).unwrap();
        let cancel = CancelToken::new();
        (0..runs)
            .filter(|&seed| {
                let out = run_parallel(req, Some(threads), seed * 7919, &cancel).unwrap();
                out.estimate.confidence.contains(exact)
            })
            .count() as u64
    }

    #[test]
    fn test_interval_coverage_near_nominal() {
        let covered = coverage(&atm_call(20_000), 2, 200);
        assert!(covered >= 188, "coverage {covered}/200");
    }

    #[test]
    fn test_interval_coverage_at_one_million_trials() {
        let covered = coverage(&atm_call(1_000_000), 8, 100);
        assert!(covered >= 94, "coverage {covered}/100");
    }

    #[test]
    fn test_oversized_thread_hint_never_panics() {
        let req = atm_call(4_096);
        match run_parallel(&req, Some(1_000_000), 3, &CancelToken::new()) {
            Ok(out) => {
                assert_eq!(out.threads_used, 4_096, "hint clamps to the trial count");
                assert_eq!(out.accumulator.count, 4_096);
            }
            Err(e) => assert_eq!(e.kind(), "engine_failure", "{e}"),
        }
    }

    #[test]
    fn test_interval_ordering_puts_and_calls() {
        let cancel = CancelToken::new();
        for (spot, strike, is_call) in [(100.0, 100.0, true), (80.0, 120.0, true), (100.0, 60.0, false), (100.0, 100.0, false)] {
            let req = PricingRequest::new(spot, strike, -0.01, 0.35, 0.5, is_call, 5_000);
            let est = run_parallel(&req, Some(3), 11, &cancel).unwrap().estimate;
            assert!(est.confidence.lower <= est.option_price);
            assert!(est.option_price <= est.confidence.upper);
        }
    }

    #[test]
    fn test_cancelled_run_returns_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_parallel(&atm_call(100_000), Some(4), 1, &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_fixed_seed_reproduces() {
        let req = atm_call(50_000);
        let cancel = CancelToken::new();
        let a = run_parallel(&req, Some(3), 77, &cancel).unwrap();
        let b = run_parallel(&req, Some(3), 77, &cancel).unwrap();
        assert_eq!(a.estimate, b.estimate);
    }
}
