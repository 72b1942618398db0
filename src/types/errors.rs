//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and carry
//! their full context as a message. Variants are grouped by the failure
//! taxonomy the kernel routes on:
//!
//! - policy failures (`NotFound`, `NotEnabled`) are expected outcomes and are
//!   converted to boolean/`None` results at the actor boundary;
//! - `Fault` marks an error raised by a hosted lifecycle hook;
//! - `SystemFailure` marks a broken actor transport or resolver and is always
//!   escalated.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the Corvid kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Service target could not be resolved.
    #[error("not found: {0}")]
    NotFound(String),

    /// Service target resolved but is disabled.
    #[error("not enabled: {0}")]
    NotEnabled(String),

    /// A hosted lifecycle hook returned an error.
    #[error("service fault: {0}")]
    Fault(String),

    /// Actor transport or resolver infrastructure is broken; unrecoverable.
    #[error("system failure: {0}")]
    SystemFailure(String),

    /// Result cell was cancelled before completion.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Bounded wait elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

// Convenience constructors
impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_enabled(msg: impl Into<String>) -> Self {
        Self::NotEnabled(msg.into())
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        Self::Fault(msg.into())
    }

    pub fn system_failure(msg: impl Into<String>) -> Self {
        Self::SystemFailure(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a policy failure rather than a fault.
    pub fn is_policy_failure(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::NotEnabled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::not_found("unknown service {app/Worker}");
        assert_eq!(err.to_string(), "not found: unknown service {app/Worker}");

        let err = Error::system_failure("mailbox is gone");
        assert_eq!(err.to_string(), "system failure: mailbox is gone");
    }

    #[test]
    fn test_policy_failure_classification() {
        assert!(Error::not_found("x").is_policy_failure());
        assert!(Error::not_enabled("x").is_policy_failure());
        assert!(!Error::fault("x").is_policy_failure());
        assert!(!Error::system_failure("x").is_policy_failure());
    }
}
