//! # Warden KVStore
//!
//! In-memory coordination backend implementing [`warden_core::CoordinationClient`].
//!
//! ## Features
//!
//! - **Conditional Writes**: create-if-absent, compare-and-swap and compare-and-delete
//! - **TTL Expiry**: keys expire against tokio's clock, so paused-time tests are deterministic
//! - **Change Notifications**: event-driven updates via message bus
//! - **Fault Switch**: `set_available(false)` turns every call into `Unavailable`
//! - **Operation Log**: recent operations and their outcomes for assertions
//!
//! ## Example
//!
//! ```rust
//! use warden_core::{CoordinationClient, InstanceToken, LeaseKey};
//! use warden_kvstore::LeaseStore;
//!
//! # tokio_test::block_on(async {
//! let store = LeaseStore::default();
//! let key = LeaseKey::new("/warden/web");
//! let a = InstanceToken::new("node-a");
//! let b = InstanceToken::new("node-b");
//!
//! store.create_if_absent(&key, &a, 30).await.unwrap();
//! assert!(store.create_if_absent(&key, &b, 30).await.unwrap_err().is_conflict());
//! assert!(store.compare_and_delete(&key, &b).await.is_err());
//!
//! store.compare_and_delete(&key, &a).await.unwrap();
//! assert!(store.peek("/warden/web").is_none());
//! # });
//! ```

pub mod notifications;
pub mod operations;
pub mod store;

pub use notifications::{
    ChangeNotification, ChangeType, NotificationBus, NotificationFilter, SubscriptionId,
};
pub use operations::{LoggedOperation, OperationOutcome, StoreError, StoreOperation};
pub use store::{LeaseStore, LeaseStoreConfig, StoreStats};
