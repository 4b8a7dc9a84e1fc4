//! # LeaseStore Implementation
//!
//! In-memory key-value coordination store with TTL expiry, conditional writes
//! and change notifications. Time is read from tokio's clock so paused-time
//! tests can drive expiry deterministically.

use crate::notifications::{ChangeNotification, ChangeType, NotificationBus};
use crate::operations::{LoggedOperation, OperationOutcome, StoreError, StoreOperation};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_core::{
    CoordResult, CoordinationClient, CoordinationError, InstanceToken, LeaseKey, LeaseRecord,
};

/// Configuration for the LeaseStore
#[derive(Debug, Clone)]
pub struct LeaseStoreConfig {
    /// Maximum number of keys to store
    pub max_keys: usize,
    /// Enable change notifications
    pub enable_notifications: bool,
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Number of recent operations kept in the operation log
    pub operation_log_capacity: usize,
}

impl Default for LeaseStoreConfig {
    fn default() -> Self {
        Self {
            max_keys: 10_000,
            enable_notifications: true,
            max_value_size: 4096,
            operation_log_capacity: 1024,
        }
    }
}

/// Stored value with lifetime metadata
#[derive(Debug, Clone)]
struct StoredLease {
    value: String,
    expires_at: Option<Instant>,
    modified_index: u64,
}

impl StoredLease {
    fn new(value: String, ttl_secs: u64, now: Instant, modified_index: u64) -> Self {
        Self {
            value,
            expires_at: expiry(ttl_secs, now),
            modified_index,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }

    fn to_record(&self, key: &LeaseKey, now: Instant) -> LeaseRecord {
        let remaining = self
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(now));
        LeaseRecord::new(key.clone(), self.value.clone(), remaining)
            .with_modified_index(self.modified_index)
    }
}

/// A TTL of zero stores the key without expiry.
fn expiry(ttl_secs: u64, now: Instant) -> Option<Instant> {
    (ttl_secs > 0).then(|| now + Duration::from_secs(ttl_secs))
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_keys: usize,
    /// Reads served
    pub reads: u64,
    /// Writes that changed the store
    pub writes: u64,
    /// Conditional writes lost against the stored value
    pub conflicts: u64,
    /// Keys removed because their TTL elapsed
    pub expirations: u64,
    /// Calls refused while the store was unavailable
    pub rejected: u64,
}

/// In-memory coordination backend
pub struct LeaseStore {
    config: LeaseStoreConfig,

    /// Main data storage
    data: DashMap<String, StoredLease>,

    /// etcd-style global modification index
    index: AtomicU64,

    stats: RwLock<StoreStats>,

    /// Notification bus for change events
    notification_bus: Arc<NotificationBus>,

    /// Fault switch; when false every call fails with `Unavailable`
    available: AtomicBool,

    operation_log: RwLock<VecDeque<LoggedOperation>>,
}

impl LeaseStore {
    pub fn new(config: LeaseStoreConfig) -> Self {
        info!("LeaseStore initialized with config: {:?}", config);
        Self {
            config,
            data: DashMap::new(),
            index: AtomicU64::new(0),
            stats: RwLock::new(StoreStats::default()),
            notification_bus: Arc::new(NotificationBus::new()),
            available: AtomicBool::new(true),
            operation_log: RwLock::new(VecDeque::new()),
        }
    }

    /// Switch the store on or off. While off every operation fails with
    /// `CoordinationError::Unavailable` and nothing is modified.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
        if available {
            info!("LeaseStore available");
        } else {
            warn!("LeaseStore switched to unavailable");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Unconditionally write a key, as an administrator or foreign writer would.
    pub fn put(&self, key: &str, value: &str, ttl_secs: u64) {
        let now = Instant::now();
        let index = self.next_index();
        let old = self
            .data
            .insert(key.to_string(), StoredLease::new(value.to_string(), ttl_secs, now, index));

        let change_type = if old.is_some() {
            ChangeType::Refreshed
        } else {
            ChangeType::Created
        };
        self.notify(key, change_type, old.map(|o| o.value), Some(value.to_string()), index);
        debug!("PUT operation: key={}, ttl={}", key, ttl_secs);
    }

    /// Unconditionally remove a key.
    pub fn remove(&self, key: &str) -> bool {
        match self.data.remove(key) {
            Some((_, old)) => {
                let index = self.next_index();
                self.notify(key, ChangeType::Deleted, Some(old.value), None, index);
                true
            }
            None => false,
        }
    }

    /// Current value of a live key, bypassing statistics and fault switches.
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.data
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Remove every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if let Some((_, old)) = self.data.remove_if(&key, |_, lease| lease.is_expired(now)) {
                self.record_expiry(&key, old);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get store statistics
    pub fn get_stats(&self) -> StoreStats {
        let mut stats = self.stats.read().clone();
        stats.total_keys = self.data.len();
        stats
    }

    /// Recent operations, oldest first
    pub fn operation_log(&self) -> Vec<LoggedOperation> {
        self.operation_log.read().iter().cloned().collect()
    }

    /// Get notification bus for subscribing to changes
    pub fn notification_bus(&self) -> Arc<NotificationBus> {
        self.notification_bus.clone()
    }

    // Private helper methods

    fn check_available(&self) -> CoordResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            self.stats.write().rejected += 1;
            Err(StoreError::Unavailable.into())
        }
    }

    fn validate_key(&self, key: &LeaseKey) -> Result<(), StoreError> {
        let key = key.as_str();
        if key.is_empty() {
            return Err(StoreError::InvalidKey("Key cannot be empty".to_string()));
        }
        if key.len() > 256 {
            return Err(StoreError::InvalidKey("Key too long".to_string()));
        }
        Ok(())
    }

    fn validate_value(&self, value: &InstanceToken) -> Result<(), StoreError> {
        if value.as_str().len() > self.config.max_value_size {
            return Err(StoreError::ValueTooLarge);
        }
        Ok(())
    }

    fn next_index(&self) -> u64 {
        self.index.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn notify(
        &self,
        key: &str,
        change_type: ChangeType,
        old_value: Option<String>,
        new_value: Option<String>,
        modified_index: u64,
    ) {
        if !self.config.enable_notifications {
            return;
        }
        self.notification_bus.publish(ChangeNotification {
            key: key.to_string(),
            change_type,
            old_value,
            new_value,
            modified_index,
        });
    }

    fn record_expiry(&self, key: &str, old: StoredLease) {
        self.stats.write().expirations += 1;
        debug!("Key expired: key={}, holder={}", key, old.value);
        self.notify(key, ChangeType::Expired, Some(old.value), None, old.modified_index);
    }

    fn log<T>(&self, operation: StoreOperation, result: &CoordResult<T>) {
        let outcome = OperationOutcome::from_result(result);
        {
            let mut stats = self.stats.write();
            if operation.is_write_operation() && outcome.is_applied() {
                stats.writes += 1;
            }
            if outcome == OperationOutcome::Conflict {
                stats.conflicts += 1;
            }
        }

        if self.config.operation_log_capacity == 0 {
            return;
        }
        let mut log = self.operation_log.write();
        if log.len() >= self.config.operation_log_capacity {
            log.pop_front();
        }
        log.push_back(LoggedOperation { operation, outcome });
    }

    /// Remove `key` if it has expired; true when the key is live.
    fn expire_stale(&self, key: &str, now: Instant) -> bool {
        match self.data.remove_if(key, |_, lease| lease.is_expired(now)) {
            Some((_, old)) => {
                self.record_expiry(key, old);
                false
            }
            None => self.data.contains_key(key),
        }
    }
}

impl Default for LeaseStore {
    fn default() -> Self {
        Self::new(LeaseStoreConfig::default())
    }
}

#[async_trait]
impl CoordinationClient for LeaseStore {
    async fn get(&self, key: &LeaseKey) -> CoordResult<LeaseRecord> {
        self.check_available()?;
        self.validate_key(key)?;
        self.stats.write().reads += 1;

        let now = Instant::now();
        let result = if self.expire_stale(key.as_str(), now) {
            self.data
                .get(key.as_str())
                .map(|entry| entry.to_record(key, now))
                .ok_or_else(|| CoordinationError::not_found(key.as_str()))
        } else {
            Err(CoordinationError::not_found(key.as_str()))
        };

        debug!("GET operation: key={}, found={}", key, result.is_ok());
        self.log(
            StoreOperation::Get {
                key: key.to_string(),
            },
            &result,
        );
        result
    }

    async fn create_if_absent(
        &self,
        key: &LeaseKey,
        value: &InstanceToken,
        ttl_secs: u64,
    ) -> CoordResult<()> {
        self.check_available()?;
        self.validate_key(key)?;
        self.validate_value(value)?;

        let now = Instant::now();
        self.expire_stale(key.as_str(), now);
        if self.data.len() >= self.config.max_keys && !self.data.contains_key(key.as_str()) {
            return Err(StoreError::StoreFull.into());
        }

        let result = match self.data.entry(key.to_string()) {
            Entry::Occupied(_) => Err(CoordinationError::already_exists(key.as_str())),
            Entry::Vacant(vacant) => {
                let index = self.next_index();
                vacant.insert(StoredLease::new(value.to_string(), ttl_secs, now, index));
                Ok(index)
            }
        };

        if let Ok(index) = result {
            self.notify(
                key.as_str(),
                ChangeType::Created,
                None,
                Some(value.to_string()),
                index,
            );
        }

        debug!("CREATE operation: key={}, created={}", key, result.is_ok());
        let result = result.map(|_| ());
        self.log(
            StoreOperation::Create {
                key: key.to_string(),
                value: value.to_string(),
                ttl_secs,
            },
            &result,
        );
        result
    }

    async fn compare_and_swap(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
        ttl_secs: u64,
        new_value: &InstanceToken,
    ) -> CoordResult<()> {
        self.check_available()?;
        self.validate_key(key)?;
        self.validate_value(new_value)?;

        let now = Instant::now();
        self.expire_stale(key.as_str(), now);

        let result = match self.data.get_mut(key.as_str()) {
            None => Err(CoordinationError::not_found(key.as_str())),
            Some(mut entry) if expected.owns(&entry.value) => {
                let old_value = std::mem::replace(&mut entry.value, new_value.to_string());
                entry.expires_at = expiry(ttl_secs, now);
                entry.modified_index = self.next_index();
                Ok((old_value, entry.modified_index))
            }
            Some(entry) => Err(CoordinationError::precondition_failed(
                key.as_str(),
                format!("compare failed: [{} != {}]", expected, entry.value),
            )),
        };

        if let Ok((old_value, index)) = &result {
            self.notify(
                key.as_str(),
                ChangeType::Refreshed,
                Some(old_value.clone()),
                Some(new_value.to_string()),
                *index,
            );
        }

        debug!("CAS operation: key={}, swapped={}", key, result.is_ok());
        let result = result.map(|_| ());
        self.log(
            StoreOperation::CompareAndSwap {
                key: key.to_string(),
                expected: expected.to_string(),
                new_value: new_value.to_string(),
                ttl_secs,
            },
            &result,
        );
        result
    }

    async fn compare_and_delete(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
    ) -> CoordResult<()> {
        self.check_available()?;
        self.validate_key(key)?;

        let now = Instant::now();
        self.expire_stale(key.as_str(), now);

        let result = match self.data.entry(key.to_string()) {
            Entry::Vacant(_) => Err(CoordinationError::not_found(key.as_str())),
            Entry::Occupied(occupied) if expected.owns(&occupied.get().value) => {
                let (_, old) = occupied.remove_entry();
                Ok(old)
            }
            Entry::Occupied(occupied) => Err(CoordinationError::precondition_failed(
                key.as_str(),
                format!("compare failed: [{} != {}]", expected, occupied.get().value),
            )),
        };

        if let Ok(old) = &result {
            let index = self.next_index();
            self.notify(
                key.as_str(),
                ChangeType::Deleted,
                Some(old.value.clone()),
                None,
                index,
            );
        }

        debug!("CAD operation: key={}, deleted={}", key, result.is_ok());
        let result = result.map(|_| ());
        self.log(
            StoreOperation::CompareAndDelete {
                key: key.to_string(),
                expected: expected.to_string(),
            },
            &result,
        );
        result
    }
}
