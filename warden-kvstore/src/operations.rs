//! # Store Operations and Error Types
//!
//! The conditional operations the lease store understands, the operation log
//! entries it keeps, and its error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_core::CoordinationError;

/// Operations that can be performed on the LeaseStore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOperation {
    /// Read a key
    Get { key: String },
    /// Create a key only if absent
    Create {
        key: String,
        value: String,
        ttl_secs: u64,
    },
    /// Replace the value and reset the TTL if the stored value matches
    CompareAndSwap {
        key: String,
        expected: String,
        new_value: String,
        ttl_secs: u64,
    },
    /// Delete if the stored value matches
    CompareAndDelete { key: String, expected: String },
}

impl StoreOperation {
    /// Get the key being operated on
    pub fn key(&self) -> &str {
        match self {
            StoreOperation::Get { key } => key,
            StoreOperation::Create { key, .. } => key,
            StoreOperation::CompareAndSwap { key, .. } => key,
            StoreOperation::CompareAndDelete { key, .. } => key,
        }
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        match self {
            StoreOperation::Get { .. } => "GET",
            StoreOperation::Create { .. } => "CREATE",
            StoreOperation::CompareAndSwap { .. } => "CAS",
            StoreOperation::CompareAndDelete { .. } => "CAD",
        }
    }

    /// Check if this operation modifies the store
    pub fn is_write_operation(&self) -> bool {
        !matches!(self, StoreOperation::Get { .. })
    }
}

/// Outcome recorded alongside each logged operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationOutcome {
    Applied,
    NotFound,
    Conflict,
    Rejected(String),
}

impl OperationOutcome {
    pub fn from_result<T>(result: &Result<T, CoordinationError>) -> Self {
        match result {
            Ok(_) => OperationOutcome::Applied,
            Err(e) if e.is_not_found() => OperationOutcome::NotFound,
            Err(e) if e.is_conflict() => OperationOutcome::Conflict,
            Err(e) => OperationOutcome::Rejected(e.to_string()),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, OperationOutcome::Applied)
    }
}

/// One entry of the store's operation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedOperation {
    pub operation: StoreOperation,
    pub outcome: OperationOutcome,
}

impl LoggedOperation {
    /// A write that actually changed the store.
    pub fn is_applied_write(&self) -> bool {
        self.operation.is_write_operation() && self.outcome.is_applied()
    }
}

/// Errors that can occur during LeaseStore operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Invalid key provided
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Value is too large to store
    #[error("Value too large")]
    ValueTooLarge,

    /// Store has reached maximum capacity
    #[error("Store is full")]
    StoreFull,

    /// Store has been switched off
    #[error("Store is unavailable")]
    Unavailable,
}

impl StoreError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Unavailable)
    }

    /// Check if this error indicates a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidKey(_) | StoreError::ValueTooLarge | StoreError::StoreFull
        )
    }
}

impl From<StoreError> for CoordinationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable => CoordinationError::unavailable(error.to_string()),
            other => CoordinationError::other(other.to_string()),
        }
    }
}
