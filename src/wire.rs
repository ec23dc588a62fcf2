//! Native engine wire protocol.
//!
//! Invocation (positional):
//!   S0 K r sigma T isCall(0|1) numTrials benchmarkMode(0|1) [threads] [iterations]
//!
//! Output is a single JSON line on stdout: `RunOutput` for a single run,
//! `BenchmarkOutput` in benchmark mode, `ErrorOutput` with a non-zero exit
//! on failure. Prices are rounded to 6 decimals, timings to 3.

use crate::benchmark::{TimedRun, TimingStats};
use crate::errors::{EngineError, EngineResult};
use crate::types::{ConfidenceInterval, EngineEstimate, PricingRequest};
use serde::de::DeserializeOwned;

pub const DEFAULT_ITERATIONS: usize = 5;

const USAGE: &str =
    "usage: mc_engine S0 K r sigma T isCall(0|1) numTrials benchmarkMode(0|1) [threads] [iterations]";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineArgs {
    /// `request.threads` carries the optional thread hint.
    pub request: PricingRequest,
    pub benchmark: bool,
    pub iterations: usize,
}

impl EngineArgs {
    pub fn single(request: &PricingRequest) -> Self {
        Self {
            request: *request,
            benchmark: false,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn benchmark(request: &PricingRequest, threads: usize, iterations: usize) -> Self {
        Self {
            request: PricingRequest { threads: Some(threads), ..*request },
            benchmark: true,
            iterations,
        }
    }

    /// Positional arguments. f64 `Display` is shortest round-trip, so values
    /// reach the engine bit-for-bit.
    pub fn to_argv(&self) -> Vec<String> {
        let r = &self.request;
        let mut argv = vec![
            r.spot.to_string(),
            r.strike.to_string(),
            r.rate.to_string(),
            r.sigma.to_string(),
            r.maturity.to_string(),
            flag(r.is_call).to_string(),
            r.num_trials.to_string(),
            flag(self.benchmark).to_string(),
            r.threads.unwrap_or(0).to_string(),
        ];
        if self.benchmark {
            argv.push(self.iterations.to_string());
        }
        argv
    }

    /// Shape checks only; market invariants are enforced by the kernel.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> EngineResult<Self> {
        if !(8..=10).contains(&args.len()) {
            return Err(EngineError::InvalidParameter(format!(
                "expected 8 to 10 arguments, got {}; {USAGE}",
                args.len()
            )));
        }
        let arg = |i: usize| args[i].as_ref().trim();

        let num_trials = parse_int("numTrials", arg(6))?;
        if num_trials <= 0 {
            return Err(EngineError::InvalidParameter(format!(
                "numTrials must be > 0, got {num_trials}"
            )));
        }

        let threads = match args.get(8) {
            Some(s) => match parse_int("threads", s.as_ref().trim())? {
                t if t > 0 => Some(t as usize),
                _ => None,
            },
            None => None,
        };

        let iterations = match args.get(9) {
            Some(s) => {
                let it = parse_int("iterations", s.as_ref().trim())?;
                if it <= 0 {
                    return Err(EngineError::InvalidParameter(format!(
                        "iterations must be > 0, got {it}"
                    )));
                }
                it as usize
            }
            None => DEFAULT_ITERATIONS,
        };

        let request = PricingRequest {
            spot: parse_f64("S0", arg(0))?,
            strike: parse_f64("K", arg(1))?,
            rate: parse_f64("r", arg(2))?,
            sigma: parse_f64("sigma", arg(3))?,
            maturity: parse_f64("T", arg(4))?,
            is_call: parse_flag("isCall", arg(5))?,
            num_trials: num_trials as u64,
            threads,
            validate_with_analytical: false,
        };

        Ok(Self {
            request,
            benchmark: parse_flag("benchmarkMode", arg(7))?,
            iterations,
        })
    }
}

#[inline]
fn flag(b: bool) -> u8 {
    u8::from(b)
}

fn parse_f64(name: &str, s: &str) -> EngineResult<f64> {
    s.parse::<f64>()
        .map_err(|_| EngineError::InvalidParameter(format!("{name} is not a number: {s:?}")))
}

fn parse_int(name: &str, s: &str) -> EngineResult<i64> {
    s.parse::<i64>()
        .map_err(|_| EngineError::InvalidParameter(format!("{name} is not an integer: {s:?}")))
}

fn parse_flag(name: &str, s: &str) -> EngineResult<bool> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(EngineError::InvalidParameter(format!(
            "{name} must be 0 or 1, got {other:?}"
        ))),
    }
}

/// Round half away from zero to `dp` decimal places.
#[inline]
pub fn round_dp(x: f64, dp: i32) -> f64 {
    let scale = 10f64.powi(dp);
    (x * scale).round() / scale
}

fn round_interval(ci: ConfidenceInterval) -> ConfidenceInterval {
    ConfidenceInterval {
        lower: round_dp(ci.lower, 6),
        upper: round_dp(ci.upper, 6),
    }
}

// ── Output messages ──

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub option_price: f64,
    pub confidence: ConfidenceInterval,
    pub threads_used: usize,
}

impl RunOutput {
    pub fn from_estimate(estimate: &EngineEstimate) -> Self {
        Self {
            option_price: round_dp(estimate.option_price, 6),
            confidence: round_interval(estimate.confidence),
            threads_used: estimate.threads_used,
        }
    }

    /// Rejects values that cannot be a valid estimate.
    pub fn into_estimate(self) -> EngineResult<EngineEstimate> {
        let finite = self.option_price.is_finite()
            && self.confidence.lower.is_finite()
            && self.confidence.upper.is_finite();
        if !finite || !self.confidence.contains(self.option_price) {
            return Err(EngineError::Parse(format!(
                "inconsistent engine output: price={} interval=[{}, {}]",
                self.option_price, self.confidence.lower, self.confidence.upper
            )));
        }
        Ok(EngineEstimate {
            option_price: self.option_price,
            confidence: self.confidence,
            threads_used: self.threads_used,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkOutput {
    pub statistics: Statistics,
    pub iterations: usize,
    pub threads_used: usize,
    pub runs: Vec<TimedRun>,
}

impl BenchmarkOutput {
    pub fn from_stats(stats: &TimingStats, threads_used: usize) -> Self {
        let runs = stats
            .runs
            .iter()
            .map(|r| TimedRun {
                iteration: r.iteration,
                execution_time: round_dp(r.execution_time, 3),
                option_price: round_dp(r.option_price, 6),
                confidence: round_interval(r.confidence),
            })
            .collect::<Vec<_>>();
        Self {
            statistics: Statistics {
                min: round_dp(stats.min, 3),
                max: round_dp(stats.max, 3),
                avg: round_dp(stats.avg, 3),
                median: round_dp(stats.median, 3),
            },
            iterations: runs.len(),
            threads_used,
            runs,
        }
    }

    pub fn into_stats(self) -> TimingStats {
        TimingStats {
            min: self.statistics.min,
            max: self.statistics.max,
            avg: self.statistics.avg,
            median: self.statistics.median,
            runs: self.runs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorOutput {
    pub error: String,
}

/// Decode the engine's stdout: the last non-empty line is the message.
/// An `{"error": ...}` line becomes `EngineExecution`.
pub fn decode<T: DeserializeOwned>(stdout: &str) -> EngineResult<T> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| EngineError::Parse("engine produced no output".into()))?;

    let value: serde_json::Value = serde_json::from_str(line)?;
    if let Some(msg) = value.get("error") {
        let msg = msg.as_str().map(str::to_owned).unwrap_or_else(|| msg.to_string());
        return Err(EngineError::EngineExecution(msg));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> PricingRequest {
        PricingRequest::new(100.0, 95.5, -0.0125, 0.2, 0.75, false, 250_000)
    }

    #[test]
    fn test_argv_layout() {
        let argv = EngineArgs::single(&req().with_threads(3)).to_argv();
        assert_eq!(argv, vec!["100", "95.5", "-0.0125", "0.2", "0.75", "0", "250000", "0", "3"]);

        let argv = EngineArgs::benchmark(&req(), 8, 5).to_argv();
        assert_eq!(&argv[7..], &["1", "8", "5"]);
    }

    #[test]
    fn test_argv_parses_back() {
        let args = EngineArgs::benchmark(&req(), 4, 7);
        let parsed = EngineArgs::parse(&args.to_argv()).unwrap();
        assert_eq!(parsed, args);
    }

    #[test]
    fn test_optional_arguments_default() {
        let parsed = EngineArgs::parse(&["100", "100", "0.05", "0.2", "1", "1", "1000", "0"]).unwrap();
        assert_eq!(parsed.request.threads, None);
        assert_eq!(parsed.iterations, DEFAULT_ITERATIONS);
        assert!(parsed.request.is_call);

        let parsed = EngineArgs::parse(&["100", "100", "0.05", "0.2", "1", "1", "1000", "0", "-2"]).unwrap();
        assert_eq!(parsed.request.threads, None, "non-positive thread hint means default");
    }

    #[test]
    fn test_malformed_arguments_rejected() {
        let cases: [&[&str]; 5] = [
            &["100", "100", "0.05"],
            &["abc", "100", "0.05", "0.2", "1", "1", "1000", "0"],
            &["100", "100", "0.05", "0.2", "1", "2", "1000", "0"],
            &["100", "100", "0.05", "0.2", "1", "1", "0", "0"],
            &["100", "100", "0.05", "0.2", "1", "1", "1000", "1", "4", "0"],
        ];
        for args in cases {
            let err = EngineArgs::parse(args).unwrap_err();
            assert!(err.is_caller_fault(), "{args:?} gave {err}");
        }
    }

    #[test]
    fn test_run_output_rounds_to_six_places() {
        let est = EngineEstimate {
            option_price: 10.123_456_789,
            confidence: ConfidenceInterval { lower: 10.000_000_4, upper: 10.246_913_7 },
            threads_used: 4,
        };
        let line = serde_json::to_string(&RunOutput::from_estimate(&est)).unwrap();
        assert_eq!(
            line,
            r#"{"optionPrice":10.123457,"confidence":{"lower":10.0,"upper":10.246914},"threadsUsed":4}"#
        );
    }

    #[test]
    fn test_decode_error_line() {
        let err = decode::<RunOutput>("{\"error\":\"Invalid input parameters\"}\n").unwrap_err();
        assert_eq!(err.kind(), "engine_execution");
        assert!(err.to_string().contains("Invalid input parameters"));
    }

    #[test]
    fn test_decode_rejects_garbage_and_empty() {
        assert_eq!(decode::<RunOutput>("not json").unwrap_err().kind(), "parse");
        assert_eq!(decode::<RunOutput>("\n  \n").unwrap_err().kind(), "parse");
    }

    #[test]
    fn test_decode_takes_last_line() {
        let out = "warming up\n{\"optionPrice\":1.5,\"confidence\":{\"lower\":1.4,\"upper\":1.6},\"threadsUsed\":2}\n";
        let run: RunOutput = decode(out).unwrap();
        assert_eq!(run.threads_used, 2);
        assert!(run.into_estimate().is_ok());
    }

    #[test]
    fn test_inconsistent_interval_rejected() {
        let run = RunOutput {
            option_price: 2.0,
            confidence: ConfidenceInterval { lower: 2.1, upper: 2.5 },
            threads_used: 1,
        };
        assert_eq!(run.into_estimate().unwrap_err().kind(), "parse");
    }
}
