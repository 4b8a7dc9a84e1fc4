//! JSON bodies of the etcd v2 keys API and their mapping onto the
//! coordination error taxonomy.

use serde::Deserialize;
use std::time::Duration;
use warden_core::{CoordinationError, LeaseKey, LeaseRecord};

/// `Key not found`
pub const ERROR_KEY_NOT_FOUND: u64 = 100;
/// `Compare failed`
pub const ERROR_TEST_FAILED: u64 = 101;
/// `Key already exists`
pub const ERROR_NODE_EXIST: u64 = 105;

/// Successful response of a keys API call
#[derive(Debug, Clone, Deserialize)]
pub struct KeysResponse {
    pub action: String,
    pub node: Option<Node>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    /// Seconds left before expiry, absent for permanent keys
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub modified_index: u64,
}

impl Node {
    pub fn into_record(self, key: &LeaseKey) -> LeaseRecord {
        let ttl_remaining = self
            .ttl
            .map(|seconds| Duration::from_secs(seconds.max(0) as u64));
        LeaseRecord::new(key.clone(), self.value.unwrap_or_default(), ttl_remaining)
            .with_modified_index(self.modified_index)
    }
}

/// Error body returned with 4xx statuses
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error_code: u64,
    pub message: String,
    #[serde(default)]
    pub cause: Option<String>,
}

impl ApiError {
    pub fn into_coordination(self, key: &LeaseKey) -> CoordinationError {
        match self.error_code {
            ERROR_KEY_NOT_FOUND => CoordinationError::not_found(key.as_str()),
            ERROR_NODE_EXIST => CoordinationError::already_exists(key.as_str()),
            ERROR_TEST_FAILED => CoordinationError::precondition_failed(
                key.as_str(),
                match self.cause {
                    Some(cause) => format!("{}: {}", self.message, cause),
                    None => self.message,
                },
            ),
            code => CoordinationError::other(format!("etcd error {}: {}", code, self.message)),
        }
    }
}
