//! # Warden Core - Leader Election Building Blocks
//!
//! Shared vocabulary for running one instance of a supervised service across a
//! group of peers, with at most one peer holding a time-bounded lease at a time.
//!
//! ## Components
//!
//! - **Types**: `LeaseKey`, `InstanceToken` and the observed `LeaseRecord`
//! - **Configuration**: `ElectionConfig` with identifier-derived defaults
//! - **Coordination**: the `CoordinationClient` trait over an atomic-conditional key-value store
//! - **Supervisor**: the `ServiceSupervisor` trait, unit states and an in-memory implementation
//! - **Error Handling**: closed error taxonomies for both collaborators
//!
//! ## Implementing a Coordination Backend
//!
//! ```rust
//! use async_trait::async_trait;
//! use warden_core::{
//!     CoordResult, CoordinationClient, CoordinationError, InstanceToken, LeaseKey, LeaseRecord,
//! };
//!
//! // A backend that never holds anything.
//! pub struct EmptyBackend;
//!
//! #[async_trait]
//! impl CoordinationClient for EmptyBackend {
//!     async fn get(&self, key: &LeaseKey) -> CoordResult<LeaseRecord> {
//!         Err(CoordinationError::not_found(key.as_str()))
//!     }
//!
//!     async fn create_if_absent(&self, _: &LeaseKey, _: &InstanceToken, _: u64) -> CoordResult<()> {
//!         Err(CoordinationError::unavailable("read-only"))
//!     }
//!
//!     async fn compare_and_swap(
//!         &self,
//!         key: &LeaseKey,
//!         _: &InstanceToken,
//!         _: u64,
//!         _: &InstanceToken,
//!     ) -> CoordResult<()> {
//!         Err(CoordinationError::not_found(key.as_str()))
//!     }
//!
//!     async fn compare_and_delete(&self, key: &LeaseKey, _: &InstanceToken) -> CoordResult<()> {
//!         Err(CoordinationError::not_found(key.as_str()))
//!     }
//! }
//! ```

pub mod config;
pub mod coordination;
pub mod error;
pub mod supervisor;
pub mod types;

// Re-export commonly used types for convenience
pub use config::ElectionConfig;
pub use coordination::CoordinationClient;
pub use error::*;
pub use supervisor::{
    ActiveState, InMemorySupervisor, JobResult, ServiceSupervisor, StartBehavior, UnitSnapshot,
    UnitStatus, UnitSubscription,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = ElectionConfig::for_identifier("web", "node-a").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.ttl(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_supervisor_through_trait_object() {
        let supervisor: std::sync::Arc<dyn ServiceSupervisor> =
            std::sync::Arc::new(InMemorySupervisor::new());

        let result = supervisor.start_unit("web.service").await.unwrap();
        assert!(result.is_done());
        supervisor.stop_unit("web.service").await.unwrap();
    }

    #[test]
    fn test_error_types() {
        let error = CoordinationError::unavailable("connection reset");
        assert!(error.is_retryable());

        let error = CoordinationError::precondition_failed("/warden/web", "compare failed");
        assert!(!error.is_retryable());
        assert!(error.is_conflict());
    }
}
