//! Election controller: the single owner of leadership state.
//!
//! The controller runs as one task. It polls the lease on a fixed interval,
//! receives fault reports from the health monitor over a channel and performs
//! every Follower/Leader transition itself, so no two code paths can race on
//! the leadership flag.

use crate::health::{HealthMonitor, MonitorEvent};
use crate::lock::{LockManager, LockStatus, Renewal};
use crate::notifications::{LeaderNotificationBus, LeadershipChange, ReleaseReason};
use crate::{LeaderError, LeaderResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::{
    CoordinationClient, ElectionConfig, InstanceToken, JobResult, ServiceSupervisor,
};

/// Leadership state of this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ElectionState {
    Follower,
    /// `term` increases on every Follower to Leader edge
    Leader { term: u64 },
}

impl ElectionState {
    pub fn is_leader(&self) -> bool {
        matches!(self, ElectionState::Leader { .. })
    }

    pub fn term(&self) -> Option<u64> {
        match self {
            ElectionState::Leader { term } => Some(*term),
            ElectionState::Follower => None,
        }
    }
}

/// Statistics about election activity
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ElectionStats {
    pub cycles: u64,
    pub acquisitions: u64,
    pub renewals: u64,
    pub renewal_failures: u64,
    pub start_failures: u64,
    pub unit_faults: u64,
    pub leases_lost: u64,
    pub releases: u64,
    pub backend_errors: u64,
}

struct ActiveMonitor {
    term: u64,
    cancel: CancellationToken,
}

/// Drives one instance through the election.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use warden_core::{ElectionConfig, InMemorySupervisor};
/// use warden_kvstore::LeaseStore;
/// use warden_leader::ElectionController;
///
/// # async fn example() -> warden_leader::LeaderResult<()> {
/// let config = ElectionConfig::for_identifier("web", "node-a")?;
/// let controller = ElectionController::new(
///     config,
///     Arc::new(LeaseStore::default()),
///     Arc::new(InMemorySupervisor::new()),
/// )?;
///
/// let handle = controller.handle();
/// let task = tokio::spawn(controller.run());
///
/// handle.wait_for(|state| state.is_leader()).await?;
/// handle.shutdown();
/// let _stats = task.await;
/// # Ok(())
/// # }
/// ```
pub struct ElectionController {
    config: ElectionConfig,
    lock: LockManager,
    supervisor: Arc<dyn ServiceSupervisor>,
    state_tx: watch::Sender<ElectionState>,
    stats: Arc<RwLock<ElectionStats>>,
    notifications: Arc<LeaderNotificationBus>,
    shutdown: CancellationToken,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    events_rx: mpsc::UnboundedReceiver<MonitorEvent>,
    term: u64,
    monitor: Option<ActiveMonitor>,
    /// Conservative estimate of when the lease expires server-side
    lease_deadline: Option<Instant>,
}

impl ElectionController {
    pub fn new(
        config: ElectionConfig,
        client: Arc<dyn CoordinationClient>,
        supervisor: Arc<dyn ServiceSupervisor>,
    ) -> LeaderResult<Self> {
        config.validate()?;

        let lock = LockManager::new(client, &config);
        let (state_tx, _) = watch::channel(ElectionState::Follower);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            lock,
            supervisor,
            state_tx,
            stats: Arc::new(RwLock::new(ElectionStats::default())),
            notifications: Arc::new(LeaderNotificationBus::new()),
            shutdown: CancellationToken::new(),
            events_tx,
            events_rx,
            term: 0,
            monitor: None,
            lease_deadline: None,
        })
    }

    /// Stop when `token` is cancelled instead of using a private token.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn handle(&self) -> ElectionHandle {
        ElectionHandle {
            state_rx: self.state_tx.subscribe(),
            stats: self.stats.clone(),
            notifications: self.notifications.clone(),
            shutdown: self.shutdown.clone(),
            token: self.config.instance_token.clone(),
        }
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    /// Run until the shutdown token is cancelled. A leader stops its unit and
    /// releases the lease before this returns.
    pub async fn run(mut self) -> ElectionStats {
        info!(
            key = %self.config.lease_key,
            token = %self.config.instance_token,
            unit = %self.config.unit_name,
            ttl = self.config.ttl_secs,
            poll_interval = ?self.config.poll_interval,
            "Starting election controller"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step_down_at = self.step_down_at();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = self.events_rx.recv() => self.on_monitor_event(event).await,
                _ = sleep_until_some(step_down_at) => self.on_lease_deadline().await,
                _ = ticker.tick() => self.poll_once().await,
            }
        }

        self.demote(ReleaseReason::Shutdown).await;
        info!("Election controller stopped");
        let stats = self.stats.read().clone();
        stats
    }

    /// One acquire-or-renew cycle and the transition it implies.
    pub async fn poll_once(&mut self) {
        let cycle_started = Instant::now();
        self.stats.write().cycles += 1;

        match self.lock.acquire_or_renew().await {
            Err(e) => {
                self.stats.write().backend_errors += 1;
                warn!("Lease check for {} failed: {}", self.lock.key(), e);
                if let ElectionState::Leader { term } = self.state() {
                    self.check_lease_expiry(term).await;
                }
            }
            Ok(status) => match self.state() {
                ElectionState::Follower if status.is_leader() => {
                    self.promote(&status, cycle_started).await
                }
                ElectionState::Follower => {
                    if let LockStatus::NotHeld { holder: Some(holder) } = &status {
                        debug!("Following {}", holder);
                    }
                }
                ElectionState::Leader { term } => {
                    self.on_leader_cycle(term, &status, cycle_started).await
                }
            },
        }
    }

    async fn on_leader_cycle(&mut self, term: u64, status: &LockStatus, cycle_started: Instant) {
        match status {
            LockStatus::Acquired => {
                warn!(
                    "Lease {} was re-created during term {}; still leading",
                    self.lock.key(),
                    term
                );
                self.confirm(status, cycle_started);
            }
            LockStatus::Held {
                renewal: Renewal::NotDue,
            } => self.confirm(status, cycle_started),
            LockStatus::Held {
                renewal: Renewal::Renewed,
            } => {
                self.confirm(status, cycle_started);
                self.stats.write().renewals += 1;
                self.notify(LeadershipChange::Renewed { term }).await;
            }
            LockStatus::Held {
                renewal: Renewal::Failed,
            } => {
                self.stats.write().renewal_failures += 1;
                self.notify(LeadershipChange::RenewalFailed { term }).await;
                self.check_lease_expiry(term).await;
            }
            LockStatus::NotHeld { holder } => {
                error!(
                    "Lease {} is now held by {}; stopping {}",
                    self.lock.key(),
                    holder.as_deref().unwrap_or("another instance"),
                    self.config.unit_name
                );
                self.stats.write().leases_lost += 1;
                self.notify(LeadershipChange::LeaseLost {
                    term,
                    holder: holder.clone(),
                })
                .await;
                self.demote(ReleaseReason::LeaseLost).await;
            }
        }
    }

    async fn on_monitor_event(&mut self, event: MonitorEvent) {
        match self.state() {
            ElectionState::Leader { term } if term == event.term => {
                self.stats.write().unit_faults += 1;
                error!(
                    "Unit {} faulted: {}. Releasing lease",
                    self.config.unit_name, event.fault
                );
                self.demote(ReleaseReason::UnitFault(event.fault.to_string()))
                    .await;
            }
            state => debug!(
                "Ignoring monitor event from term {} in state {:?}",
                event.term, state
            ),
        }
    }

    async fn promote(&mut self, status: &LockStatus, cycle_started: Instant) {
        info!(
            "Lease {} won, starting {}",
            self.lock.key(),
            self.config.unit_name
        );

        if let Err(e) = self.start_unit().await {
            error!("Cannot start {}: {}. Releasing lease", self.config.unit_name, e);
            self.stats.write().start_failures += 1;
            self.stop_unit().await;
            self.release_lease().await;
            self.notify(LeadershipChange::StartFailed {
                reason: e.to_string(),
            })
            .await;
            return;
        }

        self.term += 1;
        let term = self.term;
        self.lease_deadline = None;
        self.confirm(status, cycle_started);
        if self.lease_deadline.is_none() {
            self.lease_deadline = Some(cycle_started);
        }

        self.state_tx.send_replace(ElectionState::Leader { term });
        self.spawn_monitor(term);
        self.stats.write().acquisitions += 1;

        info!("Became leader for term {}", term);
        self.notify(LeadershipChange::Acquired { term }).await;
    }

    /// Leave leadership: stop the unit, clear the flag and cancel the monitor,
    /// then release the lease. Does nothing while Follower.
    async fn demote(&mut self, reason: ReleaseReason) {
        let ElectionState::Leader { term } = self.state() else {
            return;
        };
        info!("Leaving leadership of term {}: {}", term, reason);

        self.stop_unit().await;

        self.state_tx.send_replace(ElectionState::Follower);
        if let Some(monitor) = self.monitor.take() {
            debug!("Cancelling monitor for term {}", monitor.term);
            monitor.cancel.cancel();
        }
        self.lease_deadline = None;

        self.release_lease().await;
        self.stats.write().releases += 1;
        self.notify(LeadershipChange::Released { term, reason }).await;
    }

    /// The lease deadline passed between two polls.
    async fn on_lease_deadline(&mut self) {
        if let ElectionState::Leader { term } = self.state() {
            self.check_lease_expiry(term).await;
        }
    }

    async fn check_lease_expiry(&mut self, term: u64) {
        let expired = self
            .step_down_at()
            .map_or(true, |step_down_at| Instant::now() >= step_down_at);

        if expired {
            error!(
                "Lease {} could not be confirmed before expiry during term {}",
                self.lock.key(),
                term
            );
            self.demote(ReleaseReason::RenewalExpired).await;
        }
    }

    /// When a leader that has not confirmed its lease gives up. Leaves
    /// `ttl/10` before the estimated expiry so the unit is stopped before any
    /// peer can acquire the lease.
    fn step_down_at(&self) -> Option<Instant> {
        if !self.state().is_leader() {
            return None;
        }
        let margin = self.config.ttl() / 10;
        self.lease_deadline
            .map(|deadline| deadline.checked_sub(margin).unwrap_or(deadline))
    }

    /// Push the lease deadline forward based on what this cycle observed.
    fn confirm(&mut self, status: &LockStatus, cycle_started: Instant) {
        let estimate = match status {
            LockStatus::Acquired
            | LockStatus::Held {
                renewal: Renewal::Renewed,
            } => cycle_started + self.config.ttl(),
            LockStatus::Held {
                renewal: Renewal::NotDue,
            } => cycle_started + self.config.renew_threshold(),
            _ => return,
        };

        self.lease_deadline = Some(match self.lease_deadline {
            Some(current) => current.max(estimate),
            None => estimate,
        });
    }

    fn spawn_monitor(&mut self, term: u64) {
        let cancel = self.shutdown.child_token();
        let monitor = HealthMonitor::new(
            self.config.unit_name.clone(),
            term,
            self.config.poll_interval,
            self.supervisor.clone(),
            self.events_tx.clone(),
            cancel.clone(),
        );
        tokio::spawn(monitor.run());
        self.monitor = Some(ActiveMonitor { term, cancel });
    }

    async fn start_unit(&self) -> LeaderResult<()> {
        match self.supervisor.start_unit(&self.config.unit_name).await? {
            JobResult::Done => {
                info!("Unit {} started", self.config.unit_name);
                Ok(())
            }
            result => Err(LeaderError::StartRejected {
                unit: self.config.unit_name.clone(),
                result,
            }),
        }
    }

    async fn stop_unit(&self) {
        if let Err(e) = self.supervisor.stop_unit(&self.config.unit_name).await {
            warn!("Cannot stop {}: {}", self.config.unit_name, e);
        }
    }

    async fn release_lease(&self) {
        match self.lock.release().await {
            Ok(outcome) => debug!("Release of {}: {:?}", self.lock.key(), outcome),
            Err(e) => warn!("Cannot release lease {}: {}", self.lock.key(), e),
        }
    }

    async fn notify(&self, change: LeadershipChange) {
        self.notifications
            .notify(&self.config.instance_token, change)
            .await;
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Read-only view of a running controller plus its shutdown switch.
#[derive(Clone)]
pub struct ElectionHandle {
    state_rx: watch::Receiver<ElectionState>,
    stats: Arc<RwLock<ElectionStats>>,
    notifications: Arc<LeaderNotificationBus>,
    shutdown: CancellationToken,
    token: InstanceToken,
}

impl ElectionHandle {
    pub fn state(&self) -> ElectionState {
        *self.state_rx.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.state().is_leader()
    }

    pub fn token(&self) -> &InstanceToken {
        &self.token
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state_rx.clone()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ElectionState) -> bool,
    ) -> LeaderResult<ElectionState> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map(|state| *state)
            .map_err(|_| LeaderError::ControllerStopped);
        state
    }

    pub fn stats(&self) -> ElectionStats {
        self.stats.read().clone()
    }

    pub fn notifications(&self) -> Arc<LeaderNotificationBus> {
        self.notifications.clone()
    }

    /// Ask the controller to stop. A leader releases its lease first.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
