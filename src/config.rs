use crate::errors::{EngineError, EngineResult};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the native engine executable shipped alongside the driver.
pub const NATIVE_ENGINE_BIN: &str = "mc_engine";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub native_engine_path: PathBuf,
    pub native_timeout: Duration,
    pub fallback_threads: usize,
    pub fallback_enabled: bool,
    pub force_fallback: bool,
    pub max_concurrent_runs: usize,
    pub benchmark_iterations: usize,
    pub benchmark_max_threads: usize,
    /// Fixed base seed for reproducible runs. `None` seeds from the clock.
    pub seed: Option<u64>,
}

impl EngineConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let native_timeout_ms = env_var_or("MC_NATIVE_TIMEOUT_MS", "120000")
            .parse::<u64>()
            .map_err(|e| EngineError::Config(format!("MC_NATIVE_TIMEOUT_MS: {e}")))?;

        let fallback_threads = env_var_or("MC_FALLBACK_THREADS", "1")
            .parse::<usize>()
            .map_err(|e| EngineError::Config(format!("MC_FALLBACK_THREADS: {e}")))?;

        let fallback_enabled = env_var_or("MC_FALLBACK_ENABLED", "true")
            .parse::<bool>()
            .map_err(|e| EngineError::Config(format!("MC_FALLBACK_ENABLED: {e}")))?;

        let force_fallback = env_var_or("MC_FORCE_FALLBACK", "false")
            .parse::<bool>()
            .map_err(|e| EngineError::Config(format!("MC_FORCE_FALLBACK: {e}")))?;

        let max_concurrent_runs = match std::env::var("MC_MAX_CONCURRENT_RUNS") {
            Ok(v) => v
                .parse::<usize>()
                .map_err(|e| EngineError::Config(format!("MC_MAX_CONCURRENT_RUNS: {e}")))?,
            Err(_) => hardware_threads(),
        };

        let benchmark_iterations = env_var_or("MC_BENCHMARK_ITERATIONS", "5")
            .parse::<usize>()
            .map_err(|e| EngineError::Config(format!("MC_BENCHMARK_ITERATIONS: {e}")))?;

        let benchmark_max_threads = env_var_or("MC_BENCHMARK_MAX_THREADS", "16")
            .parse::<usize>()
            .map_err(|e| EngineError::Config(format!("MC_BENCHMARK_MAX_THREADS: {e}")))?;

        let seed = seed_from_env()?;

        let native_engine_path = match std::env::var("MC_NATIVE_ENGINE_PATH") {
            Ok(p) => PathBuf::from(p),
            Err(_) => default_native_path(),
        };

        if max_concurrent_runs == 0 {
            return Err(EngineError::Config("MC_MAX_CONCURRENT_RUNS must be >= 1".into()));
        }
        if benchmark_iterations == 0 {
            return Err(EngineError::Config("MC_BENCHMARK_ITERATIONS must be >= 1".into()));
        }

        Ok(Self {
            native_engine_path,
            native_timeout: Duration::from_millis(native_timeout_ms),
            fallback_threads: fallback_threads.max(1),
            fallback_enabled,
            force_fallback,
            max_concurrent_runs,
            benchmark_iterations,
            benchmark_max_threads: benchmark_max_threads.max(1),
            seed,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            native_engine_path: default_native_path(),
            native_timeout: Duration::from_secs(120),
            fallback_threads: 1,
            fallback_enabled: true,
            force_fallback: false,
            max_concurrent_runs: hardware_threads(),
            benchmark_iterations: 5,
            benchmark_max_threads: 16,
            seed: None,
        }
    }
}

/// `MC_SEED`, if set. The engine binary reads only this variable.
pub fn seed_from_env() -> EngineResult<Option<u64>> {
    match std::env::var("MC_SEED") {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("MC_SEED: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Detected hardware concurrency, 4 when the platform cannot report it.
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// `mc_engine` next to the running executable.
fn default_native_path() -> PathBuf {
    let file_name = format!("{NATIVE_ENGINE_BIN}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
