use crate::benchmark::TimingStats;
use crate::config::EngineConfig;
use crate::engine::cancel::CancelToken;
use crate::engine::PricingEngine;
use crate::errors::{EngineError, EngineResult};
use crate::types::{EngineEstimate, Implementation, PricingRequest};
use crate::wire::{self, BenchmarkOutput, EngineArgs, ErrorOutput, RunOutput};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Out-of-process engine. Every call is an RPC over the positional-argument
/// wire protocol; nothing from the child's address space is trusted beyond
/// the decoded JSON line.
pub struct NativeEngine {
    path: PathBuf,
    timeout: Duration,
    /// Forced off by configuration; the probe reports unavailable.
    disabled: bool,
}

impl NativeEngine {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            disabled: false,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            path: config.native_engine_path.clone(),
            timeout: config.native_timeout,
            disabled: config.force_fallback,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spawn the engine, wait for it (bounded by `timeout`, abandoned on
    /// cancellation) and return its stdout. The child is killed whenever the
    /// wait is abandoned.
    async fn invoke(
        &self,
        args: &EngineArgs,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> EngineResult<String> {
        let argv = args.to_argv();
        tracing::debug!(path = %self.path.display(), ?argv, "spawning native engine");

        let child = Command::new(&self.path)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    EngineError::EngineUnavailable(format!("{}: {e}", self.path.display()))
                }
                _ => EngineError::EngineExecution(format!("spawn failed: {e}")),
            })?;

        let output = tokio::select! {
            waited = tokio::time::timeout(timeout, child.wait_with_output()) => match waited {
                Ok(result) => result
                    .map_err(|e| EngineError::EngineExecution(format!("wait failed: {e}")))?,
                Err(_) => {
                    return Err(EngineError::EngineExecution(format!(
                        "timed out after {} ms",
                        timeout.as_millis()
                    )))
                }
            },
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let detail = match wire::decode::<ErrorOutput>(&stdout) {
                Err(EngineError::EngineExecution(msg)) => msg,
                _ => String::from_utf8_lossy(&output.stderr).trim().to_string(),
            };
            return Err(EngineError::EngineExecution(format!("{}: {detail}", output.status)));
        }
        Ok(stdout)
    }
}

impl PricingEngine for NativeEngine {
    fn implementation(&self) -> Implementation {
        Implementation::Native
    }

    fn is_available(&self) -> bool {
        !self.disabled && is_executable(&self.path)
    }

    async fn price(
        &self,
        request: &PricingRequest,
        cancel: &CancelToken,
    ) -> EngineResult<EngineEstimate> {
        let stdout = self
            .invoke(&EngineArgs::single(request), self.timeout, cancel)
            .await?;
        wire::decode::<RunOutput>(&stdout)?.into_estimate()
    }

    async fn benchmark(
        &self,
        request: &PricingRequest,
        threads: usize,
        iterations: usize,
        cancel: &CancelToken,
    ) -> EngineResult<TimingStats> {
        let args = EngineArgs::benchmark(request, threads, iterations);
        let stdout = self
            .invoke(&args, benchmark_budget(self.timeout, iterations), cancel)
            .await?;
        let output: BenchmarkOutput = wire::decode(&stdout)?;
        if output.runs.is_empty() {
            return Err(EngineError::Parse("benchmark output has no runs".into()));
        }
        Ok(output.into_stats())
    }
}

/// Warm-up plus every timed run share one process.
fn benchmark_budget(timeout: Duration, iterations: usize) -> Duration {
    let runs = u32::try_from(iterations).unwrap_or(u32::MAX).saturating_add(1);
    timeout.saturating_mul(runs)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Writes a shell script standing in for the engine binary.
    fn script(body: &str, mode: u32) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mc_engine_stub_{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn req() -> PricingRequest {
        PricingRequest::new(100.0, 100.0, 0.05, 0.2, 1.0, true, 1000)
    }

    #[test]
    fn test_benchmark_budget_saturates() {
        let timeout = Duration::from_millis(100);
        assert_eq!(benchmark_budget(timeout, 4), Duration::from_millis(500));
        assert_eq!(benchmark_budget(timeout, usize::MAX), timeout.saturating_mul(u32::MAX));
        assert_eq!(benchmark_budget(Duration::MAX, 3), Duration::MAX);
    }

    #[test]
    fn test_probe_missing_and_non_executable() {
        let missing = NativeEngine::new("/nonexistent/mc_engine", Duration::from_secs(1));
        assert!(!missing.is_available());

        let plain = script("exit 0", 0o644);
        assert!(!NativeEngine::new(&plain, Duration::from_secs(1)).is_available());

        let exec = script("exit 0", 0o755);
        assert!(NativeEngine::new(&exec, Duration::from_secs(1)).is_available());

        let mut forced = NativeEngine::new(&exec, Duration::from_secs(1));
        forced.disabled = true;
        assert!(!forced.is_available());
    }

    #[tokio::test]
    async fn test_parses_single_run_output() {
        let path = script(
            r#"echo '{"optionPrice":10.45,"confidence":{"lower":10.4,"upper":10.5},"threadsUsed":8}'"#,
            0o755,
        );
        let engine = NativeEngine::new(&path, Duration::from_secs(5));
        let est = engine.price(&req(), &CancelToken::new()).await.unwrap();
        assert_eq!(est.option_price, 10.45);
        assert_eq!(est.threads_used, 8);
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_engine_message() {
        let path = script(r#"echo '{"error":"Invalid input parameters"}'; exit 1"#, 0o755);
        let engine = NativeEngine::new(&path, Duration::from_secs(5));
        let err = engine.price(&req(), &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "engine_execution");
        assert!(err.to_string().contains("Invalid input parameters"), "{err}");
    }

    #[tokio::test]
    async fn test_garbage_output_is_parse_error() {
        let path = script("echo 'segfault imminent'", 0o755);
        let engine = NativeEngine::new(&path, Duration::from_secs(5));
        let err = engine.price(&req(), &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn test_timeout_is_execution_failure() {
        let path = script("sleep 10", 0o755);
        let engine = NativeEngine::new(&path, Duration::from_millis(150));
        let started = std::time::Instant::now();
        let err = engine.price(&req(), &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), "engine_execution");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_child() {
        let path = script("sleep 10", 0o755);
        let engine = NativeEngine::new(&path, Duration::from_secs(30));
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = engine.price(&req(), &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_passes_wire_arguments() {
        // Echo the argument vector back inside a valid reply.
        let path = script(
            r#"echo "{\"optionPrice\":1,\"confidence\":{\"lower\":1,\"upper\":1},\"threadsUsed\":$9}""#,
            0o755,
        );
        let engine = NativeEngine::new(&path, Duration::from_secs(5));
        let est = engine.price(&req().with_threads(6), &CancelToken::new()).await.unwrap();
        assert_eq!(est.threads_used, 6);
    }
}
