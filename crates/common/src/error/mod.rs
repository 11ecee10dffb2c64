//! Common error types and classification shared by the platform modules.
//!
//! Module-specific errors compose with [`CommonError`] rather than duplicating
//! its variants, and implement [`ErrorClassification`] so callers can decide
//! whether to retry without matching on concrete types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Common error patterns shared across modules.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{resource_type} not found")]
    NotFound { resource_type: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result alias for [`CommonError`].
pub type CommonResult<T> = Result<T, CommonError>;

impl CommonError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into() }
    }

    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    pub fn not_found<T: Into<String>>(resource_type: T) -> Self {
        Self::NotFound { resource_type: resource_type.into() }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } => ErrorSeverity::Critical,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Validation { .. } | Self::NotFound { .. } => ErrorSeverity::Info,
            Self::Serialization { .. } | Self::Internal { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Standard interface for classifying errors by retryability and severity.
pub trait ErrorClassification {
    /// Whether retrying the same operation may succeed.
    fn is_retryable(&self) -> bool;

    /// Severity level for logging and alerting.
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error needs operator attention.
    fn is_critical(&self) -> bool;

    /// Suggested delay before retrying, when the error carries one.
    fn retry_after(&self) -> Option<Duration>;
}

/// Unified severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_retryable_warnings() {
        let err = CommonError::timeout("pool checkout", Duration::from_secs(5));
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(err.to_string().contains("pool checkout"));
    }

    #[test]
    fn config_errors_are_critical() {
        let err = CommonError::config("missing key");
        assert!(err.is_critical());
        assert!(!err.is_retryable());
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert_eq!(ErrorSeverity::Warning.to_string(), "warning");
    }
}
