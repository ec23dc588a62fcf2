/// Domain-specific error types for the pricing engine.
/// Every stage of a pricing call maps its failures here. The controller must:
/// - Reject bad input before any simulation work
/// - Swallow native-engine failures and degrade to the in-process engine
/// - Surface a failure only when no engine is left to try
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("native engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("native engine execution failed: {0}")]
    EngineExecution(String),

    #[error("engine failure: {0}")]
    EngineFailure(String),

    #[error("analytical validation failed: {0}")]
    Validation(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable identifier for collaborators that map errors to status codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::EngineExecution(_) => "engine_execution",
            Self::EngineFailure(_) => "engine_failure",
            Self::Validation(_) => "validation",
            Self::Cancelled => "cancelled",
            Self::Parse(_) => "parse",
            Self::Config(_) => "config",
        }
    }

    /// True when the caller supplied bad input and nothing was computed.
    #[inline]
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Self::InvalidParameter(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::EngineUnavailable(e.to_string())
        } else {
            EngineError::EngineExecution(e.to_string())
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
