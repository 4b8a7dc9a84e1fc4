//! Health monitoring of the supervised unit while this instance leads.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use warden_core::{ServiceSupervisor, UnitSnapshot, UnitSubscription};

/// Why the monitor considers the unit unhealthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitFault {
    /// The supervisor reports the unit as failed
    Failed { sub_state: String },

    /// The unit disappeared from the supervisor
    Disappeared,

    /// The supervisor reported an error on the subscription
    SubscriptionError { reason: String },

    /// The change stream ended
    StreamClosed,
}

impl fmt::Display for UnitFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitFault::Failed { sub_state } if sub_state.is_empty() => write!(f, "unit failed"),
            UnitFault::Failed { sub_state } => write!(f, "unit failed ({})", sub_state),
            UnitFault::Disappeared => write!(f, "unit disappeared"),
            UnitFault::SubscriptionError { reason } => {
                write!(f, "unit subscription error: {}", reason)
            }
            UnitFault::StreamClosed => write!(f, "unit change stream closed"),
        }
    }
}

/// Fault report sent from a monitor to the controller.
///
/// `term` identifies the leadership period the monitor was spawned for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent {
    pub term: u64,
    pub fault: UnitFault,
}

/// Judge one snapshot. A snapshot that does not mention the unit, or maps it
/// to `None`, means the unit is gone.
pub fn assess_snapshot(unit: &str, snapshot: &UnitSnapshot) -> Option<UnitFault> {
    match snapshot.get(unit) {
        None | Some(None) => Some(UnitFault::Disappeared),
        Some(Some(status)) if status.active_state.is_failed() => Some(UnitFault::Failed {
            sub_state: status.sub_state.clone(),
        }),
        Some(Some(status)) => {
            debug!(
                "Unit {} is {} ({})",
                unit, status.active_state, status.sub_state
            );
            None
        }
    }
}

/// Watches the unit for one leadership term and reports at most one fault.
pub struct HealthMonitor {
    unit: String,
    term: u64,
    interval: Duration,
    supervisor: Arc<dyn ServiceSupervisor>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(
        unit: impl Into<String>,
        term: u64,
        interval: Duration,
        supervisor: Arc<dyn ServiceSupervisor>,
        events: mpsc::UnboundedSender<MonitorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            unit: unit.into(),
            term,
            interval,
            supervisor,
            events,
            cancel,
        }
    }

    /// Subscribe and watch until a fault is found or the token is cancelled.
    ///
    /// Returns the reported fault, or `None` when cancelled.
    pub async fn run(self) -> Option<UnitFault> {
        info!("Starting monitor for {} (term {})", self.unit, self.term);

        let subscription = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            subscription = self.supervisor.subscribe_unit_changes(&self.unit, self.interval) => subscription,
        };

        let fault = match subscription {
            Ok(subscription) => self.watch(subscription).await,
            Err(e) => Some(UnitFault::SubscriptionError {
                reason: e.to_string(),
            }),
        };

        match fault {
            Some(fault) => {
                error!(
                    "Unit {} faulted during term {}: {}",
                    self.unit, self.term, fault
                );
                let _ = self.events.send(MonitorEvent {
                    term: self.term,
                    fault: fault.clone(),
                });
                Some(fault)
            }
            None => {
                debug!("Monitor for {} (term {}) cancelled", self.unit, self.term);
                None
            }
        }
    }

    async fn watch(&self, mut subscription: UnitSubscription) -> Option<UnitFault> {
        let mut errors_open = true;

        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            let fault = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                change = subscription.changes.recv() => match change {
                    Some(snapshot) => assess_snapshot(&self.unit, &snapshot),
                    None => Some(UnitFault::StreamClosed),
                },
                error = subscription.errors.recv(), if errors_open => match error {
                    Some(e) => Some(UnitFault::SubscriptionError { reason: e.to_string() }),
                    None => {
                        errors_open = false;
                        None
                    }
                },
            };

            if fault.is_some() {
                return fault;
            }
        }
    }
}
