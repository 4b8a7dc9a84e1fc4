use crate::error::CoordResult;
use crate::types::{InstanceToken, LeaseKey, LeaseRecord};
use async_trait::async_trait;

/// Atomic-conditional key-value interface of the coordination service.
///
/// Implementations must make every mutating operation atomic with respect to
/// the stored value: a create succeeds only if the key is absent, and a swap
/// or delete succeeds only if the stored value equals `expected`. Expired keys
/// behave exactly like absent ones.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Read the current record.
    ///
    /// # Returns
    /// * `Ok(record)` if the key exists and has not expired
    /// * `Err(CoordinationError::NotFound)` if it does not
    async fn get(&self, key: &LeaseKey) -> CoordResult<LeaseRecord>;

    /// Create the key with `value` and a `ttl_secs` lifetime, only if absent.
    ///
    /// Fails with `AlreadyExists` when another writer got there first.
    async fn create_if_absent(
        &self,
        key: &LeaseKey,
        value: &InstanceToken,
        ttl_secs: u64,
    ) -> CoordResult<()>;

    /// Replace the value and reset the lifetime, only if the stored value
    /// equals `expected`.
    async fn compare_and_swap(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
        ttl_secs: u64,
        new_value: &InstanceToken,
    ) -> CoordResult<()>;

    /// Delete the key, only if the stored value equals `expected`.
    async fn compare_and_delete(&self, key: &LeaseKey, expected: &InstanceToken)
        -> CoordResult<()>;
}

#[async_trait]
impl<T: CoordinationClient + ?Sized> CoordinationClient for std::sync::Arc<T> {
    async fn get(&self, key: &LeaseKey) -> CoordResult<LeaseRecord> {
        (**self).get(key).await
    }

    async fn create_if_absent(
        &self,
        key: &LeaseKey,
        value: &InstanceToken,
        ttl_secs: u64,
    ) -> CoordResult<()> {
        (**self).create_if_absent(key, value, ttl_secs).await
    }

    async fn compare_and_swap(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
        ttl_secs: u64,
        new_value: &InstanceToken,
    ) -> CoordResult<()> {
        (**self)
            .compare_and_swap(key, expected, ttl_secs, new_value)
            .await
    }

    async fn compare_and_delete(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
    ) -> CoordResult<()> {
        (**self).compare_and_delete(key, expected).await
    }
}
