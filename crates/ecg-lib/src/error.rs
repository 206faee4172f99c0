use thiserror::Error;

/// Failures raised by the analysis engine.
///
/// None of these are transient: every variant describes malformed input or a
/// configuration that cannot produce a result, so nothing here is retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Malformed or too-short signal, unresolvable threshold, bad filter design.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Too few valid epochs for shape clustering.
    #[error("insufficient data: {valid} valid epochs, clustering needs at least {required}")]
    InsufficientData { valid: usize, required: usize },
    /// A requested method is missing a collaborator it depends on.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
