use thiserror::Error;

/// Errors raised by the library itself. Every public API returns `anyhow::Result`, so callers that
/// care about the category can `downcast_ref::<DrizzleError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DrizzleError {
    /// A configuration value is out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required factory (network, optimizer, ...) was never set on a builder.
    #[error("missing factory: `{0}` has to be set before building the agent")]
    MissingFactory(&'static str),

    /// Shape or lifecycle contract broken, e.g. too many appends to the rollout storage.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A loss became NaN or infinite.
    #[error("non-finite {what}: {value}")]
    NonFinite { what: &'static str, value: f32 },

    /// An environment worker failed or went away.
    #[error("environment error: {0}")]
    Env(String),
}

impl DrizzleError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    pub fn env(message: impl Into<String>) -> Self {
        Self::Env(message.into())
    }
}

/// Returns `Ok(value)` when the value is finite, otherwise a `NonFinite` error.
pub fn ensure_finite(what: &'static str, value: f32) -> Result<f32, DrizzleError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DrizzleError::NonFinite { what, value })
    }
}
