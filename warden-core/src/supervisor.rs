//! # Service Supervisor Interface
//!
//! The start/stop/observe surface of the process supervisor that runs the
//! elected leader's unit, plus an in-memory implementation for tests and
//! embedding.

use crate::error::{SupervisorError, SupervisorResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// High-level activation state of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveState {
    Active,
    Reloading,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Other(String),
}

impl ActiveState {
    pub fn parse(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "reloading" => Self::Reloading,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            "activating" => Self::Activating,
            "deactivating" => Self::Deactivating,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Reloading => "reloading",
            Self::Inactive => "inactive",
            Self::Failed => "failed",
            Self::Activating => "activating",
            Self::Deactivating => "deactivating",
            Self::Other(other) => other,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a start or stop job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobResult {
    Done,
    Canceled,
    Timeout,
    Failed,
    Dependency,
    Skipped,
    Other(String),
}

impl JobResult {
    pub fn parse(value: &str) -> Self {
        match value {
            "done" => Self::Done,
            "canceled" => Self::Canceled,
            "timeout" => Self::Timeout,
            "failed" => Self::Failed,
            "dependency" => Self::Dependency,
            "skipped" => Self::Skipped,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Canceled => f.write_str("canceled"),
            Self::Timeout => f.write_str("timeout"),
            Self::Failed => f.write_str("failed"),
            Self::Dependency => f.write_str("dependency"),
            Self::Skipped => f.write_str("skipped"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Status of one unit as reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub load_state: String,
    pub active_state: ActiveState,
    pub sub_state: String,
}

impl UnitStatus {
    pub fn new(name: impl Into<String>, active_state: ActiveState) -> Self {
        let sub_state = match active_state {
            ActiveState::Active => "running",
            ActiveState::Failed => "failed",
            ActiveState::Inactive => "dead",
            _ => "",
        };
        Self {
            name: name.into(),
            load_state: "loaded".to_string(),
            active_state,
            sub_state: sub_state.to_string(),
        }
    }
}

/// Changed units keyed by name. `None` means the unit disappeared.
pub type UnitSnapshot = HashMap<String, Option<UnitStatus>>;

/// Stream of unit changes together with the parallel stream of errors.
///
/// Both streams are lazy and unbounded; dropping the subscription ends it.
#[derive(Debug)]
pub struct UnitSubscription {
    pub changes: mpsc::UnboundedReceiver<UnitSnapshot>,
    pub errors: mpsc::UnboundedReceiver<SupervisorError>,
}

/// Start/stop/observe operations of the process supervisor.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Start `unit` and wait for the job's terminal result.
    async fn start_unit(&self, unit: &str) -> SupervisorResult<JobResult>;

    /// Stop `unit` and wait for the job to finish.
    async fn stop_unit(&self, unit: &str) -> SupervisorResult<()>;

    /// Subscribe to status changes of `unit`, polled every `interval` where
    /// the supervisor does not push changes itself.
    async fn subscribe_unit_changes(
        &self,
        unit: &str,
        interval: Duration,
    ) -> SupervisorResult<UnitSubscription>;
}

#[async_trait]
impl<T: ServiceSupervisor + ?Sized> ServiceSupervisor for Arc<T> {
    async fn start_unit(&self, unit: &str) -> SupervisorResult<JobResult> {
        (**self).start_unit(unit).await
    }

    async fn stop_unit(&self, unit: &str) -> SupervisorResult<()> {
        (**self).stop_unit(unit).await
    }

    async fn subscribe_unit_changes(
        &self,
        unit: &str,
        interval: Duration,
    ) -> SupervisorResult<UnitSubscription> {
        (**self).subscribe_unit_changes(unit, interval).await
    }
}

/// Scripted outcome of the next start jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartBehavior {
    /// Start succeeds and the unit becomes active
    Succeed,
    /// Job completes with the given result; the unit ends up failed
    Result(JobResult),
    /// The start request itself errors
    Error(String),
}

struct Subscriber {
    unit: String,
    changes: mpsc::UnboundedSender<UnitSnapshot>,
    errors: mpsc::UnboundedSender<SupervisorError>,
}

impl Subscriber {
    fn is_closed(&self) -> bool {
        self.changes.is_closed()
    }
}

#[derive(Default)]
struct SupervisorInner {
    units: HashMap<String, UnitStatus>,
    start_behavior: Option<StartBehavior>,
    subscribe_error: Option<String>,
    start_calls: HashMap<String, u32>,
    stop_calls: HashMap<String, u32>,
    subscribers: Vec<Subscriber>,
}

/// In-memory supervisor that pushes unit changes to subscribers immediately.
///
/// Cloning shares the same units, so a test can keep one handle and give the
/// other to an election controller.
#[derive(Clone, Default)]
pub struct InMemorySupervisor {
    inner: Arc<Mutex<SupervisorInner>>,
}

impl InMemorySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script every following start job.
    pub fn set_start_behavior(&self, behavior: StartBehavior) {
        self.inner.lock().start_behavior = Some(behavior);
    }

    /// Make every following subscription attempt fail.
    pub fn fail_subscriptions(&self, reason: impl Into<String>) {
        self.inner.lock().subscribe_error = Some(reason.into());
    }

    /// Mark the unit failed and notify subscribers.
    pub fn fail_unit(&self, unit: &str) {
        self.set_state(unit, ActiveState::Failed);
    }

    /// Force a unit into `state` and notify subscribers.
    pub fn set_state(&self, unit: &str, state: ActiveState) {
        let mut inner = self.inner.lock();
        inner
            .units
            .insert(unit.to_string(), UnitStatus::new(unit, state));
        Self::publish(&mut inner, unit);
    }

    /// Remove the unit entirely and notify subscribers.
    pub fn remove_unit(&self, unit: &str) {
        let mut inner = self.inner.lock();
        inner.units.remove(unit);
        Self::publish(&mut inner, unit);
    }

    /// Deliver an error on every subscription watching `unit`.
    pub fn inject_error(&self, unit: &str, reason: &str) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.is_closed());
        for subscriber in inner.subscribers.iter().filter(|s| s.unit == unit) {
            let _ = subscriber
                .errors
                .send(SupervisorError::subscription(unit, reason));
        }
    }

    pub fn unit_state(&self, unit: &str) -> Option<ActiveState> {
        self.inner
            .lock()
            .units
            .get(unit)
            .map(|status| status.active_state.clone())
    }

    pub fn is_running(&self, unit: &str) -> bool {
        self.unit_state(unit) == Some(ActiveState::Active)
    }

    pub fn start_count(&self, unit: &str) -> u32 {
        self.inner.lock().start_calls.get(unit).copied().unwrap_or(0)
    }

    pub fn stop_count(&self, unit: &str) -> u32 {
        self.inner.lock().stop_calls.get(unit).copied().unwrap_or(0)
    }

    /// Number of subscriptions whose receivers are still alive.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.is_closed());
        inner.subscribers.len()
    }

    fn snapshot(inner: &SupervisorInner, unit: &str) -> UnitSnapshot {
        let mut snapshot = HashMap::new();
        snapshot.insert(unit.to_string(), inner.units.get(unit).cloned());
        snapshot
    }

    fn publish(inner: &mut SupervisorInner, unit: &str) {
        let snapshot = Self::snapshot(inner, unit);
        inner.subscribers.retain(|s| !s.is_closed());
        for subscriber in inner.subscribers.iter().filter(|s| s.unit == unit) {
            let _ = subscriber.changes.send(snapshot.clone());
        }
        debug!("Published change for unit {}", unit);
    }
}

#[async_trait]
impl ServiceSupervisor for InMemorySupervisor {
    async fn start_unit(&self, unit: &str) -> SupervisorResult<JobResult> {
        let mut inner = self.inner.lock();
        *inner.start_calls.entry(unit.to_string()).or_default() += 1;

        let behavior = inner
            .start_behavior
            .clone()
            .unwrap_or(StartBehavior::Succeed);

        match behavior {
            StartBehavior::Succeed => {
                inner
                    .units
                    .insert(unit.to_string(), UnitStatus::new(unit, ActiveState::Active));
                Self::publish(&mut inner, unit);
                Ok(JobResult::Done)
            }
            StartBehavior::Result(result) => {
                inner
                    .units
                    .insert(unit.to_string(), UnitStatus::new(unit, ActiveState::Failed));
                Self::publish(&mut inner, unit);
                Ok(result)
            }
            StartBehavior::Error(reason) => Err(SupervisorError::start_failed(unit, reason)),
        }
    }

    async fn stop_unit(&self, unit: &str) -> SupervisorResult<()> {
        let mut inner = self.inner.lock();
        *inner.stop_calls.entry(unit.to_string()).or_default() += 1;

        if let Some(status) = inner.units.get_mut(unit) {
            *status = UnitStatus::new(unit, ActiveState::Inactive);
            Self::publish(&mut inner, unit);
        }
        Ok(())
    }

    async fn subscribe_unit_changes(
        &self,
        unit: &str,
        _interval: Duration,
    ) -> SupervisorResult<UnitSubscription> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.subscribe_error.clone() {
            return Err(SupervisorError::subscription(unit, reason));
        }

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let _ = changes_tx.send(Self::snapshot(&inner, unit));
        inner.subscribers.push(Subscriber {
            unit: unit.to_string(),
            changes: changes_tx,
            errors: errors_tx,
        });

        Ok(UnitSubscription {
            changes: changes_rx,
            errors: errors_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: &str = "web.service";

    #[test]
    fn test_state_parsing() {
        assert_eq!(ActiveState::parse("failed"), ActiveState::Failed);
        assert_eq!(
            ActiveState::parse("maintenance"),
            ActiveState::Other("maintenance".to_string())
        );
        assert_eq!(ActiveState::Active.to_string(), "active");
        assert!(JobResult::parse("done").is_done());
        assert_eq!(JobResult::parse("dependency"), JobResult::Dependency);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_recorded() {
        let supervisor = InMemorySupervisor::new();

        let result = supervisor.start_unit(UNIT).await.unwrap();
        assert_eq!(result, JobResult::Done);
        assert!(supervisor.is_running(UNIT));

        supervisor.stop_unit(UNIT).await.unwrap();
        assert_eq!(supervisor.unit_state(UNIT), Some(ActiveState::Inactive));
        assert_eq!(supervisor.start_count(UNIT), 1);
        assert_eq!(supervisor.stop_count(UNIT), 1);
    }

    #[tokio::test]
    async fn test_scripted_start_failure() {
        let supervisor = InMemorySupervisor::new();
        supervisor.set_start_behavior(StartBehavior::Result(JobResult::Failed));
        assert_eq!(
            supervisor.start_unit(UNIT).await.unwrap(),
            JobResult::Failed
        );

        supervisor.set_start_behavior(StartBehavior::Error("no such unit".to_string()));
        assert!(matches!(
            supervisor.start_unit(UNIT).await,
            Err(SupervisorError::StartFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_subscription_receives_initial_snapshot_and_changes() {
        let supervisor = InMemorySupervisor::new();
        supervisor.start_unit(UNIT).await.unwrap();

        let mut subscription = supervisor
            .subscribe_unit_changes(UNIT, Duration::from_secs(1))
            .await
            .unwrap();

        let initial = subscription.changes.recv().await.unwrap();
        assert_eq!(
            initial[UNIT].as_ref().map(|s| s.active_state.clone()),
            Some(ActiveState::Active)
        );

        supervisor.fail_unit(UNIT);
        let changed = subscription.changes.recv().await.unwrap();
        assert!(changed[UNIT].as_ref().unwrap().active_state.is_failed());

        supervisor.remove_unit(UNIT);
        let removed = subscription.changes.recv().await.unwrap();
        assert!(removed[UNIT].is_none());

        supervisor.inject_error(UNIT, "bus disconnected");
        let error = subscription.errors.recv().await.unwrap();
        assert!(matches!(error, SupervisorError::Subscription { .. }));
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_pruned() {
        let supervisor = InMemorySupervisor::new();
        let subscription = supervisor
            .subscribe_unit_changes(UNIT, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(supervisor.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(supervisor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_failure() {
        let supervisor = InMemorySupervisor::new();
        supervisor.fail_subscriptions("dbus unavailable");
        assert!(supervisor
            .subscribe_unit_changes(UNIT, Duration::from_secs(1))
            .await
            .is_err());
    }
}
