//! Native pricing engine. Speaks the positional-argument wire protocol and
//! prints exactly one JSON line on stdout.

use mc_pricer::benchmark::{self, TimingStats};
use mc_pricer::config;
use mc_pricer::engine::cancel::CancelToken;
use mc_pricer::engine::parallel;
use mc_pricer::engine::sampler::resolve_base_seed;
use mc_pricer::errors::EngineResult;
use mc_pricer::wire::{BenchmarkOutput, EngineArgs, ErrorOutput, RunOutput};
use std::process::ExitCode;

fn main() -> ExitCode {
    // Quiet by default: stdout is the reply channel, logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(line) => {
            println!("{line}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "engine run failed");
            let reply = ErrorOutput { error: e.to_string() };
            match serde_json::to_string(&reply) {
                Ok(line) => println!("{line}"),
                Err(_) => println!("{{\"error\":\"engine failure\"}}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> EngineResult<String> {
    let EngineArgs { request, benchmark, iterations } = EngineArgs::parse(args)?;
    request.validate()?;

    let seed = config::seed_from_env()?;
    let threads_used = parallel::resolve_threads(request.threads, request.num_trials);
    // Nothing cancels a standalone engine; the caller kills the process instead.
    let cancel = CancelToken::new();

    if benchmark {
        let runs = benchmark::measure_runs(iterations, || {
            let outcome = parallel::run_parallel(&request, request.threads, resolve_base_seed(seed), &cancel)?;
            Ok(outcome.estimate.into_engine_estimate(outcome.threads_used))
        })?;
        let stats = TimingStats::from_runs(runs)?;
        tracing::debug!(threads_used, avg_ms = stats.avg, "benchmark complete");
        Ok(serde_json::to_string(&BenchmarkOutput::from_stats(&stats, threads_used))?)
    } else {
        let outcome = parallel::run_parallel(&request, request.threads, resolve_base_seed(seed), &cancel)?;
        let estimate = outcome.estimate.into_engine_estimate(outcome.threads_used);
        Ok(serde_json::to_string(&RunOutput::from_estimate(&estimate))?)
    }
}
