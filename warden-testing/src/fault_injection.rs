use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use warden_core::{
    CoordResult, CoordinationClient, CoordinationError, InstanceToken, LeaseKey, LeaseRecord,
};

/// Faults a cluster test can inject. Node indexes refer to
/// [`ElectionCluster`](crate::ElectionCluster) members.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Every backend call from `node` fails as unavailable
    Partition { node: usize },
    /// Undo `Partition` and `BlockWrites` for `node`
    Heal { node: usize },
    /// Reads from `node` succeed but its writes fail
    BlockWrites { node: usize },
    /// Each backend call from `node` fails with probability `rate`
    FlakyBackend { node: usize, rate: f64 },
    /// The unit on `node` enters the failed state
    FailUnit { node: usize },
    /// Start jobs on `node` finish with `failed` from now on
    BreakUnit { node: usize },
    /// The shared store rejects every call
    BackendOutage,
    /// The shared store accepts calls again
    BackendRestore,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FaultStats {
    pub calls: u64,
    pub injected_failures: u64,
}

/// Coordination client wrapper that fails calls on demand.
///
/// Injected failures are always `Unavailable` and never reach the wrapped
/// client, so the backend state is untouched by a failed call.
pub struct FlakyCoordination<C> {
    inner: C,
    partitioned: AtomicBool,
    writes_blocked: AtomicBool,
    failure_rate: Mutex<f64>,
    stats: Mutex<FaultStats>,
}

impl<C: CoordinationClient> FlakyCoordination<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            partitioned: AtomicBool::new(false),
            writes_blocked: AtomicBool::new(false),
            failure_rate: Mutex::new(0.0),
            stats: Mutex::new(FaultStats::default()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn partition(&self) {
        self.partitioned.store(true, Ordering::SeqCst);
    }

    /// Clear the partition, the write block and the failure rate.
    pub fn heal(&self) {
        self.partitioned.store(false, Ordering::SeqCst);
        self.writes_blocked.store(false, Ordering::SeqCst);
        *self.failure_rate.lock() = 0.0;
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned.load(Ordering::SeqCst)
    }

    pub fn block_writes(&self, blocked: bool) {
        self.writes_blocked.store(blocked, Ordering::SeqCst);
    }

    /// Probability in `[0, 1]` that any call fails.
    pub fn set_failure_rate(&self, rate: f64) {
        *self.failure_rate.lock() = rate.clamp(0.0, 1.0);
    }

    pub fn stats(&self) -> FaultStats {
        self.stats.lock().clone()
    }

    fn check(&self, operation: &str, write: bool) -> CoordResult<()> {
        let rate = *self.failure_rate.lock();
        let fail = self.is_partitioned()
            || (write && self.writes_blocked.load(Ordering::SeqCst))
            || (rate > 0.0 && rand::thread_rng().gen_bool(rate));

        let mut stats = self.stats.lock();
        stats.calls += 1;
        if fail {
            stats.injected_failures += 1;
            debug!("Injected failure into {}", operation);
            return Err(CoordinationError::unavailable(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<C: CoordinationClient> CoordinationClient for FlakyCoordination<C> {
    async fn get(&self, key: &LeaseKey) -> CoordResult<LeaseRecord> {
        self.check("get", false)?;
        self.inner.get(key).await
    }

    async fn create_if_absent(
        &self,
        key: &LeaseKey,
        value: &InstanceToken,
        ttl_secs: u64,
    ) -> CoordResult<()> {
        self.check("create", true)?;
        self.inner.create_if_absent(key, value, ttl_secs).await
    }

    async fn compare_and_swap(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
        ttl_secs: u64,
        new_value: &InstanceToken,
    ) -> CoordResult<()> {
        self.check("compare_and_swap", true)?;
        self.inner
            .compare_and_swap(key, expected, ttl_secs, new_value)
            .await
    }

    async fn compare_and_delete(
        &self,
        key: &LeaseKey,
        expected: &InstanceToken,
    ) -> CoordResult<()> {
        self.check("compare_and_delete", true)?;
        self.inner.compare_and_delete(key, expected).await
    }
}
