//! # Core Types
//!
//! Identifiers and records shared by the lock manager, the election controller
//! and the coordination adapters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Key of the mutual-exclusion lock in the coordination service.
///
/// Fixed for the lifetime of the process.
///
/// # Examples
///
/// ```rust
/// use warden_core::LeaseKey;
///
/// let key = LeaseKey::new("/warden/web");
/// assert_eq!(key.as_str(), "/warden/web");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeaseKey(String);

impl LeaseKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LeaseKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for LeaseKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Token identifying this instance among its peers.
///
/// The token is written as the lease value, and ownership of the lease is
/// decided purely by comparing the stored value with this token. Two instances
/// configured with the same token are indistinguishable to the protocol.
///
/// # Examples
///
/// ```rust
/// use warden_core::InstanceToken;
///
/// let a = InstanceToken::new("node-a");
/// assert!(a.owns("node-a"));
/// assert!(!a.owns("node-b"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceToken(String);

impl InstanceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ownership test against a stored lease value.
    pub fn owns(&self, stored_value: &str) -> bool {
        self.0 == stored_value
    }
}

impl fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for InstanceToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Lease as observed in the coordination service at read time.
///
/// `ttl_remaining` is computed by the backend when the record is read; `None`
/// means the key carries no expiry at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub key: LeaseKey,
    pub value: String,
    pub ttl_remaining: Option<Duration>,
    pub modified_index: u64,
}

impl LeaseRecord {
    pub fn new(key: LeaseKey, value: impl Into<String>, ttl_remaining: Option<Duration>) -> Self {
        Self {
            key,
            value: value.into(),
            ttl_remaining,
            modified_index: 0,
        }
    }

    pub fn with_modified_index(mut self, index: u64) -> Self {
        self.modified_index = index;
        self
    }

    /// Whether `token` is the current holder.
    pub fn is_held_by(&self, token: &InstanceToken) -> bool {
        token.owns(&self.value)
    }

    /// Whether the remaining lifetime has dropped below `threshold`.
    ///
    /// A record without expiry is always due, so a renewal restores its TTL.
    pub fn needs_renewal(&self, threshold: Duration) -> bool {
        match self.ttl_remaining {
            Some(remaining) => remaining < threshold,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_is_value_equality() {
        let record = LeaseRecord::new(LeaseKey::new("/warden/web"), "node-a", None);
        assert!(record.is_held_by(&InstanceToken::new("node-a")));
        assert!(!record.is_held_by(&InstanceToken::new("node-A")));
    }

    #[test]
    fn test_needs_renewal_threshold() {
        let threshold = Duration::from_secs(15);
        let key = LeaseKey::new("/warden/web");

        let fresh = LeaseRecord::new(key.clone(), "a", Some(Duration::from_secs(29)));
        assert!(!fresh.needs_renewal(threshold));

        let exact = LeaseRecord::new(key.clone(), "a", Some(Duration::from_secs(15)));
        assert!(!exact.needs_renewal(threshold));

        let stale = LeaseRecord::new(key.clone(), "a", Some(Duration::from_secs(14)));
        assert!(stale.needs_renewal(threshold));

        let permanent = LeaseRecord::new(key, "a", None);
        assert!(permanent.needs_renewal(threshold));
    }
}
