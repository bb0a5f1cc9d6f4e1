use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the recognition adapter.
///
/// Every variant carries a stable category string (see [`EngineError::category`])
/// which is all the HTTP client ever sees; the message text stays in the logs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("recognition engine is not initialized")]
    NotReady,

    #[error("recognition engine failure: {0}")]
    Internal(String),

    #[error("recognition engine is already initialized")]
    AlreadyInitialized,

    #[error("recognition did not finish within {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument(_) => "InvalidArgument",
            EngineError::InvalidPayload(_) => "InvalidPayload",
            EngineError::NotReady => "EngineNotReady",
            EngineError::Internal(_) => "EngineInternal",
            EngineError::AlreadyInitialized => "AlreadyInitialized",
            EngineError::Timeout(_) => "Timeout",
        }
    }
}

/// Startup configuration errors. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must not be empty")]
    Empty { name: &'static str },

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
