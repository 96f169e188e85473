//! Error type for configuration and construction failures.
//!
//! Tensor-shape invariants are asserted where they are checked; everything a
//! user can get wrong through configuration surfaces as a [`DreamerError`].

use thiserror::Error;

/// Errors raised while loading, resolving or wiring a configuration.
#[derive(Debug, Error)]
pub enum DreamerError {
    /// A configuration value is not one of the recognised options.
    #[error("invalid value for `{key}`: {message}")]
    Config {
        /// Flat-namespaced configuration key, e.g. `actor.dist`.
        key: String,
        /// Human readable explanation.
        message: String,
    },

    /// A schedule string could not be parsed.
    #[error("invalid schedule `{0}`")]
    InvalidSchedule(String),

    /// `grad_heads` names a head that is not registered on the world model.
    #[error("unknown prediction head `{0}`")]
    UnknownHead(String),

    /// A head produced a distribution for a field the batch does not carry.
    #[error("batch has no field `{0}`")]
    MissingField(String),

    /// Reading a configuration file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A configuration document is not valid JSON for the expected schema.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DreamerError {
    /// Shorthand for a [`DreamerError::Config`] error.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DreamerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_key() {
        let err = DreamerError::config("actor_grad", "expected dynamics, reinforce or both");
        let text = err.to_string();
        assert!(text.contains("actor_grad"), "got: {}", text);
        assert!(text.contains("reinforce"), "got: {}", text);
    }

    #[test]
    fn json_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DreamerError = parse.into();
        assert!(matches!(err, DreamerError::Json(_)));
    }
}
