use crate::errors::{EngineError, EngineResult};

// ── Request ──

/// One pricing request. Immutable once built; passed by reference.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PricingRequest {
    #[serde(rename = "S0")]
    pub spot: f64,
    #[serde(rename = "K")]
    pub strike: f64,
    #[serde(rename = "r")]
    pub rate: f64,
    pub sigma: f64,
    #[serde(rename = "T")]
    pub maturity: f64,
    #[serde(rename = "isCall")]
    pub is_call: bool,
    #[serde(rename = "numTrials")]
    pub num_trials: u64,
    /// Worker count hint for the native engine. `None` or 0 means hardware default.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(rename = "validateWithAnalytical", default)]
    pub validate_with_analytical: bool,
}

impl PricingRequest {
    pub fn new(
        spot: f64,
        strike: f64,
        rate: f64,
        sigma: f64,
        maturity: f64,
        is_call: bool,
        num_trials: u64,
    ) -> Self {
        Self {
            spot,
            strike,
            rate,
            sigma,
            maturity,
            is_call,
            num_trials,
            threads: None,
            validate_with_analytical: false,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_validation(mut self) -> Self {
        self.validate_with_analytical = true;
        self
    }

    /// Decode a request body and check its invariants. Any shape or type
    /// mismatch (negative or fractional `numTrials`, a string `S0`) is the
    /// caller's fault, so it surfaces as `InvalidParameter`, never `Parse`.
    pub fn from_json(body: &str) -> EngineResult<Self> {
        let request: Self = serde_json::from_str(body)
            .map_err(|e| EngineError::InvalidParameter(format!("malformed request: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    /// Checks every invariant. Runs before any sampling.
    pub fn validate(&self) -> EngineResult<()> {
        validate_market(self.spot, self.strike, self.rate, self.sigma, self.maturity)?;
        if self.num_trials == 0 {
            return Err(EngineError::InvalidParameter(
                "numTrials must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Positivity and finiteness checks shared by the kernel and the analytical pricer.
pub fn validate_market(spot: f64, strike: f64, rate: f64, sigma: f64, maturity: f64) -> EngineResult<()> {
    for (name, value) in [("S0", spot), ("K", strike), ("sigma", sigma), ("T", maturity)] {
        if !value.is_finite() || value <= 0.0 {
            return Err(EngineError::InvalidParameter(format!(
                "{name} must be a positive number, got {value}"
            )));
        }
    }
    if !rate.is_finite() {
        return Err(EngineError::InvalidParameter(format!(
            "r must be a finite number, got {rate}"
        )));
    }
    Ok(())
}

// ── Result ──

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Implementation {
    Native,
    Fallback,
}

impl std::fmt::Display for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Cross-check outcome. Either a comparison or an error message, never both.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Validation {
    #[serde(rename_all = "camelCase")]
    Report {
        analytical_price: f64,
        absolute_error: f64,
        relative_error: f64,
        is_within_confidence_interval: bool,
    },
    Failed { error: String },
}

/// Price estimate produced by either engine, before dispatch metadata is attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineEstimate {
    pub option_price: f64,
    pub confidence: ConfidenceInterval,
    pub threads_used: usize,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingResult {
    pub option_price: f64,
    pub confidence: ConfidenceInterval,
    pub implementation: Implementation,
    pub threads_used: usize,
    pub num_trials: u64,
    pub execution_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validation: Option<Validation>,
}

// ── Status ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultImplementation {
    Native,
    Fallback,
    None,
}

impl std::fmt::Display for DefaultImplementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Fallback => write!(f, "fallback"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub native_available: bool,
    pub default_implementation: DefaultImplementation,
    pub analytical_available: bool,
}
