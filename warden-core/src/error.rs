//! # Error Types
//!
//! Closed error taxonomies for the two external collaborators (the coordination
//! service and the service supervisor) and for configuration validation.

use thiserror::Error;

/// Errors returned by a [`CoordinationClient`](crate::CoordinationClient).
///
/// Callers branch on the variant instead of inspecting backend-specific error
/// codes. `NotFound`, `AlreadyExists` and `PreconditionFailed` are expected
/// outcomes under concurrent peers; `Unavailable` is transient and is retried
/// on the next poll cycle.
///
/// # Examples
///
/// ```rust
/// use warden_core::CoordinationError;
///
/// let error = CoordinationError::unavailable("connection refused");
/// assert!(error.is_retryable());
/// assert!(!CoordinationError::not_found("/warden/web").is_retryable());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// The key does not exist (or has expired)
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// A create-if-absent found the key already present
    #[error("Key already exists: {key}")]
    AlreadyExists { key: String },

    /// A compare-and-swap or compare-and-delete lost against the stored value
    #[error("Precondition failed for {key}: {reason}")]
    PreconditionFailed { key: String, reason: String },

    /// Transport or availability failure talking to the coordination service
    #[error("Coordination service unavailable: {message}")]
    Unavailable { message: String },

    /// Any other backend failure
    #[error("Coordination error: {message}")]
    Other { message: String },
}

/// Result type for coordination operations.
pub type CoordResult<T> = std::result::Result<T, CoordinationError>;

impl CoordinationError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    pub fn precondition_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// True for the "key absent" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when another writer won a conditional operation.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::PreconditionFailed { .. }
        )
    }

    /// Transient failures that the next poll cycle may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors returned by a [`ServiceSupervisor`](crate::ServiceSupervisor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// The start job could not be submitted or did not complete
    #[error("Failed to start unit {unit}: {reason}")]
    StartFailed { unit: String, reason: String },

    /// The stop job could not be submitted or did not complete
    #[error("Failed to stop unit {unit}: {reason}")]
    StopFailed { unit: String, reason: String },

    /// The unit-change subscription reported an error
    #[error("Unit subscription error for {unit}: {reason}")]
    Subscription { unit: String, reason: String },

    /// The supervisor itself cannot be reached
    #[error("Supervisor unavailable: {message}")]
    Unavailable { message: String },
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

impl SupervisorError {
    pub fn start_failed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StartFailed {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn stop_failed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn subscription(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subscription {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Configuration errors. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The instance identifier is missing or malformed
    #[error("Invalid identifier {identifier:?}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// A single field failed validation
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// An environment variable could not be parsed
    #[error("Invalid value {value:?} for {variable}: {reason}")]
    InvalidEnvironment {
        variable: String,
        value: String,
        reason: String,
    },

    /// The host identity could not be resolved
    #[error("Cannot resolve host identity: {reason}")]
    HostIdentity { reason: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
