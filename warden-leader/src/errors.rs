//! Error types for leader election operations.

use thiserror::Error;
use warden_core::{ConfigError, CoordinationError, JobResult, SupervisorError};

/// Result type for leader election operations
pub type LeaderResult<T> = Result<T, LeaderError>;

/// Errors that can occur during leader election operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaderError {
    /// The coordination service rejected or failed an operation
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// The service supervisor failed an operation
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// The election configuration is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The start job finished with something other than `done`
    #[error("Unit {unit} did not start: job finished with {result}")]
    StartRejected { unit: String, result: JobResult },

    /// The controller task has exited
    #[error("Election controller has stopped")]
    ControllerStopped,
}

impl LeaderError {
    /// Transient failures that the next poll cycle may resolve.
    pub fn is_retryable(&self) -> bool {
        match self {
            LeaderError::Coordination(e) => e.is_retryable(),
            LeaderError::Supervisor(SupervisorError::Unavailable { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_and_classification() {
        let error: LeaderError = CoordinationError::unavailable("timeout").into();
        assert!(error.is_retryable());
        assert_eq!(
            error.to_string(),
            "Coordination service unavailable: timeout"
        );

        let error = LeaderError::StartRejected {
            unit: "web.service".to_string(),
            result: JobResult::Dependency,
        };
        assert!(!error.is_retryable());
        assert_eq!(
            error.to_string(),
            "Unit web.service did not start: job finished with dependency"
        );
    }
}
