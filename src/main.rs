use mc_pricer::config::EngineConfig;
use mc_pricer::dispatch::PricingService;
use mc_pricer::engine::cancel::CancelToken;
use mc_pricer::errors::{EngineError, EngineResult};
use mc_pricer::types::PricingRequest;
use std::process::ExitCode;

const USAGE: &str = "usage: mc_pricer <status | calculate '<request json>' | benchmark '<request json>'>";

#[tokio::main]
async fn main() -> ExitCode {
    // Structured logging on stderr; stdout carries only the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            return report_error(&e);
        }
    };

    tracing::info!(
        native = %cfg.native_engine_path.display(),
        fallback_threads = cfg.fallback_threads,
        max_concurrent_runs = cfg.max_concurrent_runs,
        "mc_pricer starting"
    );

    let service = PricingService::new(&cfg);

    // Ctrl-C cancels the in-flight run; the engine sees it at its next check.
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let outcome = run_command(&service, &args, &cancel).await;

    tracing::info!(counters = ?service.counters(), "mc_pricer finished");

    match outcome {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if !e.is_caller_fault() {
                tracing::error!(kind = e.kind(), error = %e, "command failed");
            }
            report_error(&e)
        }
    }
}

async fn run_command(
    service: &PricingService,
    args: &[String],
    cancel: &CancelToken,
) -> EngineResult<String> {
    match args {
        [cmd] if cmd == "status" => Ok(serde_json::to_string(&service.status())?),
        [cmd, body] if cmd == "calculate" => {
            let request = PricingRequest::from_json(body)?;
            let result = service.calculate_with_cancel(&request, cancel).await?;
            Ok(serde_json::to_string(&result)?)
        }
        [cmd, body] if cmd == "benchmark" => {
            let request = PricingRequest::from_json(body)?;
            let report = service.run_benchmark_with_cancel(&request, cancel).await?;
            Ok(serde_json::to_string(&report)?)
        }
        _ => Err(EngineError::InvalidParameter(USAGE.into())),
    }
}

fn report_error(e: &EngineError) -> ExitCode {
    println!("{}", serde_json::json!({ "error": e.to_string(), "kind": e.kind() }));
    ExitCode::FAILURE
}
