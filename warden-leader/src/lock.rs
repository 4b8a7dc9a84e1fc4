//! Lease state machine: acquire, renew and release one lock key.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_core::{
    CoordResult, CoordinationClient, ElectionConfig, InstanceToken, LeaseKey, LeaseRecord,
};

/// What the renewal step did on a cycle where this instance already held the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// Remaining lifetime is still above the threshold; nothing written
    NotDue,
    /// The lifetime was reset
    Renewed,
    /// The compare-and-swap failed; the lease may still expire on schedule
    Failed,
}

/// Outcome of one acquire-or-renew cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// The lease was absent and this instance created it
    Acquired,
    /// The lease already carried this instance's token
    Held { renewal: Renewal },
    /// Someone else holds the lease. `holder` is `None` when a create race was
    /// lost and the winner was not read back.
    NotHeld { holder: Option<String> },
}

impl LockStatus {
    pub fn is_leader(&self) -> bool {
        matches!(self, LockStatus::Acquired | LockStatus::Held { .. })
    }
}

/// Outcome of a release. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The stored value belongs to another instance; it was left alone
    NotOwner,
    /// The key had already expired or been deleted
    AlreadyGone,
}

/// Acquires, renews and releases the lease for one instance.
///
/// Every write is conditional on this instance's token, so a lease held by a
/// peer is never modified.
pub struct LockManager {
    client: Arc<dyn CoordinationClient>,
    key: LeaseKey,
    token: InstanceToken,
    ttl_secs: u64,
    renew_threshold: Duration,
}

impl LockManager {
    pub fn new(client: Arc<dyn CoordinationClient>, config: &ElectionConfig) -> Self {
        Self {
            client,
            key: config.lease_key.clone(),
            token: config.instance_token.clone(),
            ttl_secs: config.ttl_secs,
            renew_threshold: config.renew_threshold(),
        }
    }

    pub fn key(&self) -> &LeaseKey {
        &self.key
    }

    pub fn token(&self) -> &InstanceToken {
        &self.token
    }

    /// Run one acquire-or-renew cycle.
    ///
    /// Lost races and failed renewals are reported through [`LockStatus`];
    /// only errors other than "not found" on the initial read, and
    /// non-conflict errors on create, surface as `Err`.
    pub async fn acquire_or_renew(&self) -> CoordResult<LockStatus> {
        match self.client.get(&self.key).await {
            Ok(record) if record.is_held_by(&self.token) => Ok(LockStatus::Held {
                renewal: self.renew_if_due(&record).await,
            }),
            Ok(record) => {
                debug!("Lease {} is held by {}", self.key, record.value);
                Ok(LockStatus::NotHeld {
                    holder: Some(record.value),
                })
            }
            Err(e) if e.is_not_found() => self.try_acquire().await,
            Err(e) => Err(e),
        }
    }

    /// Delete the lease if, and only if, it still carries this instance's token.
    pub async fn release(&self) -> CoordResult<ReleaseOutcome> {
        match self.client.compare_and_delete(&self.key, &self.token).await {
            Ok(()) => {
                info!("Released lease {}", self.key);
                Ok(ReleaseOutcome::Released)
            }
            Err(e) if e.is_not_found() => {
                debug!("Lease {} already gone", self.key);
                Ok(ReleaseOutcome::AlreadyGone)
            }
            Err(e) if e.is_conflict() => {
                warn!("Lease {} is owned by another instance, not releasing", self.key);
                Ok(ReleaseOutcome::NotOwner)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_acquire(&self) -> CoordResult<LockStatus> {
        debug!("Trying to acquire lease {}", self.key);
        match self
            .client
            .create_if_absent(&self.key, &self.token, self.ttl_secs)
            .await
        {
            Ok(()) => {
                info!("Acquired lease {} as {}", self.key, self.token);
                Ok(LockStatus::Acquired)
            }
            Err(e) if e.is_conflict() => {
                debug!("Lost the race for lease {}", self.key);
                Ok(LockStatus::NotHeld { holder: None })
            }
            Err(e) => Err(e),
        }
    }

    async fn renew_if_due(&self, record: &LeaseRecord) -> Renewal {
        if !record.needs_renewal(self.renew_threshold) {
            return Renewal::NotDue;
        }

        match self
            .client
            .compare_and_swap(&self.key, &self.token, self.ttl_secs, &self.token)
            .await
        {
            Ok(()) => {
                debug!("Renewed lease {} for {}s", self.key, self.ttl_secs);
                Renewal::Renewed
            }
            Err(e) => {
                warn!("Could not renew lease {}: {}", self.key, e);
                Renewal::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use warden_core::CoordinationError;
    use warden_kvstore::LeaseStore;

    fn manager(store: &Arc<LeaseStore>, token: &str) -> LockManager {
        let config = ElectionConfig::for_identifier("web", token).unwrap();
        LockManager::new(store.clone(), &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_then_hold_without_writing() {
        let store = Arc::new(LeaseStore::default());
        let lock = manager(&store, "a");

        assert_eq!(lock.acquire_or_renew().await.unwrap(), LockStatus::Acquired);
        let writes = store.get_stats().writes;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            lock.acquire_or_renew().await.unwrap(),
            LockStatus::Held {
                renewal: Renewal::NotDue
            }
        );
        assert_eq!(store.get_stats().writes, writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_below_half_ttl() {
        let store = Arc::new(LeaseStore::default());
        let lock = manager(&store, "a");
        lock.acquire_or_renew().await.unwrap();

        tokio::time::advance(Duration::from_secs(16)).await;
        assert_eq!(
            lock.acquire_or_renew().await.unwrap(),
            LockStatus::Held {
                renewal: Renewal::Renewed
            }
        );

        let record = store.get(lock.key()).await.unwrap();
        assert_eq!(record.ttl_remaining, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_follower_sees_holder() {
        let store = Arc::new(LeaseStore::default());
        let a = manager(&store, "a");
        let b = manager(&store, "b");

        a.acquire_or_renew().await.unwrap();
        let status = b.acquire_or_renew().await.unwrap();
        assert_eq!(
            status,
            LockStatus::NotHeld {
                holder: Some("a".to_string())
            }
        );
        assert!(!status.is_leader());
    }

    #[tokio::test]
    async fn test_release_never_deletes_foreign_lease() {
        let store = Arc::new(LeaseStore::default());
        let a = manager(&store, "a");
        let b = manager(&store, "b");

        assert_eq!(b.release().await.unwrap(), ReleaseOutcome::AlreadyGone);

        a.acquire_or_renew().await.unwrap();
        assert_eq!(b.release().await.unwrap(), ReleaseOutcome::NotOwner);
        assert_eq!(store.peek("/warden/web").as_deref(), Some("a"));

        assert_eq!(a.release().await.unwrap(), ReleaseOutcome::Released);
        assert_eq!(a.release().await.unwrap(), ReleaseOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_backend_errors_surface() {
        let store = Arc::new(LeaseStore::default());
        let lock = manager(&store, "a");
        store.set_available(false);

        let err = lock.acquire_or_renew().await.unwrap_err();
        assert!(matches!(err, CoordinationError::Unavailable { .. }));
        assert!(lock.release().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_without_ttl_is_renewed() {
        let store = Arc::new(LeaseStore::default());
        store.put("/warden/web", "a", 0);
        let lock = manager(&store, "a");

        assert_eq!(
            lock.acquire_or_renew().await.unwrap(),
            LockStatus::Held {
                renewal: Renewal::Renewed
            }
        );
        let record = store.get(lock.key()).await.unwrap();
        assert_eq!(record.ttl_remaining, Some(Duration::from_secs(30)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_renews_only_below_half_ttl(ttl_secs in 2u64..600, elapsed_pct in 0u64..100) {
            let elapsed = Duration::from_secs(ttl_secs * elapsed_pct / 100);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let renewal = runtime.block_on(async {
                let store = Arc::new(LeaseStore::default());
                let config = ElectionConfig::for_identifier("web", "a")
                    .unwrap()
                    .with_ttl_secs(ttl_secs);
                let lock = LockManager::new(store.clone(), &config);
                lock.acquire_or_renew().await.unwrap();

                tokio::time::advance(elapsed).await;
                match lock.acquire_or_renew().await.unwrap() {
                    LockStatus::Held { renewal } => renewal,
                    other => panic!("lease lost: {:?}", other),
                }
            });

            let remaining = Duration::from_secs(ttl_secs) - elapsed;
            let expected = if remaining < Duration::from_secs(ttl_secs) / 2 {
                Renewal::Renewed
            } else {
                Renewal::NotDue
            };
            prop_assert_eq!(renewal, expected);
        }
    }
}
