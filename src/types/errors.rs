//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the procflow core.
#[derive(Error, Debug)]
pub enum Error {
    /// Input validation errors (surface at process construction).
    #[error("validation error: {0}")]
    Validation(String),

    /// Output emitted on an undeclared port or with a mismatched type
    /// (surfaces at the `out()` call site).
    #[error("invalid output: {0}")]
    InvalidOutput(String),

    /// A required output port was never filled before finishing.
    #[error("missing required output: {0}")]
    MissingOutput(String),

    /// Invalid state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// A lifecycle hook override did not invoke its base behavior exactly
    /// once. This is a defect in a process implementation, never retried.
    #[error("hook contract violation: {0}")]
    HookContract(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_output(msg: impl Into<String>) -> Self {
        Self::InvalidOutput(msg.into())
    }

    pub fn missing_output(msg: impl Into<String>) -> Self {
        Self::MissingOutput(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn hook_contract(msg: impl Into<String>) -> Self {
        Self::HookContract(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a programmer-error hook contract violation,
    /// which must propagate instead of being captured into FAILED.
    pub fn is_hook_contract(&self) -> bool {
        matches!(self, Error::HookContract(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = Error::validation("port x missing");
        assert_eq!(err.to_string(), "validation error: port x missing");

        let err = Error::hook_contract("on_start was not called");
        assert!(err.is_hook_contract());
        assert!(err.to_string().contains("on_start"));
    }

    #[test]
    fn serde_errors_convert() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
