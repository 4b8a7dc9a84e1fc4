//! Notification system for leadership changes.

use crate::LeaderResult;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;
use warden_core::InstanceToken;

/// Why a leader gave up its lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The health monitor reported a unit fault
    UnitFault(String),
    /// Another instance holds the lease
    LeaseLost,
    /// The lease could not be renewed for a full TTL
    RenewalExpired,
    /// The controller is shutting down
    Shutdown,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseReason::UnitFault(fault) => write!(f, "{}", fault),
            ReleaseReason::LeaseLost => write!(f, "lease held by another instance"),
            ReleaseReason::RenewalExpired => write!(f, "lease could not be renewed before expiry"),
            ReleaseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Types of leadership-related notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipChange {
    /// This instance became leader and its unit started
    Acquired { term: u64 },

    /// The lease lifetime was reset
    Renewed { term: u64 },

    /// A renewal attempt failed; leadership continues until expiry
    RenewalFailed { term: u64 },

    /// The lease was found carrying another instance's token
    LeaseLost {
        term: u64,
        holder: Option<String>,
    },

    /// The lease was won but the unit did not start
    StartFailed { reason: String },

    /// Leadership ended and the lease was released
    Released { term: u64, reason: ReleaseReason },
}

impl LeadershipChange {
    /// Edges between Follower and Leader, as opposed to steady-state events.
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            LeadershipChange::Acquired { .. } | LeadershipChange::Released { .. }
        )
    }

    pub fn term(&self) -> Option<u64> {
        match self {
            LeadershipChange::Acquired { term }
            | LeadershipChange::Renewed { term }
            | LeadershipChange::RenewalFailed { term }
            | LeadershipChange::LeaseLost { term, .. }
            | LeadershipChange::Released { term, .. } => Some(*term),
            LeadershipChange::StartFailed { .. } => None,
        }
    }
}

/// A leadership change stamped with its origin
#[derive(Debug, Clone)]
pub struct LeaderNotification {
    pub token: InstanceToken,
    pub change: LeadershipChange,
    pub timestamp: u64,
}

/// Subscription filter for notifications
#[derive(Clone)]
pub enum NotificationFilter {
    /// Subscribe to all notifications
    All,

    /// Only Follower/Leader edges
    Transitions,

    /// Only notifications about one leadership term
    Term(u64),

    /// Custom filter function
    Custom(Arc<dyn Fn(&LeaderNotification) -> bool + Send + Sync>),
}

impl NotificationFilter {
    pub fn matches(&self, notification: &LeaderNotification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Transitions => notification.change.is_transition(),
            NotificationFilter::Term(term) => notification.change.term() == Some(*term),
            NotificationFilter::Custom(func) => func(notification),
        }
    }
}

/// Unique identifier for a subscription
pub type SubscriptionId = Uuid;

/// Statistics about notification delivery
#[derive(Debug, Default, Clone)]
pub struct NotificationStats {
    pub notifications_sent: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub active_subscriptions: usize,
    pub total_subscriptions: u64,
}

type SubscriberMap =
    HashMap<SubscriptionId, (NotificationFilter, mpsc::UnboundedSender<LeaderNotification>)>;

/// Notification bus for leadership events
pub struct LeaderNotificationBus {
    broadcast_tx: broadcast::Sender<LeaderNotification>,
    subscribers: Arc<RwLock<SubscriberMap>>,
    stats: Arc<RwLock<NotificationStats>>,
}

impl Default for LeaderNotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderNotificationBus {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create with custom broadcast buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);

        Self {
            broadcast_tx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NotificationStats::default())),
        }
    }

    /// Subscribe to notifications with a filter
    pub async fn subscribe(
        &self,
        filter: NotificationFilter,
    ) -> LeaderResult<(SubscriptionId, mpsc::UnboundedReceiver<LeaderNotification>)> {
        let subscription_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(subscription_id, (filter, tx));

            let mut stats = self.stats.write().await;
            stats.active_subscriptions = subscribers.len();
            stats.total_subscriptions += 1;
        }

        debug!("Created subscription {} with filter", subscription_id);
        Ok((subscription_id, rx))
    }

    /// Unsubscribe from notifications
    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> LeaderResult<()> {
        let mut subscribers = self.subscribers.write().await;

        if subscribers.remove(&subscription_id).is_some() {
            debug!("Removed subscription {}", subscription_id);
            self.stats.write().await.active_subscriptions = subscribers.len();
        }

        Ok(())
    }

    /// Receiver for every notification published from now on
    pub fn broadcast_receiver(&self) -> broadcast::Receiver<LeaderNotification> {
        self.broadcast_tx.subscribe()
    }

    /// Publish a change made by `token`
    pub async fn notify(&self, token: &InstanceToken, change: LeadershipChange) {
        let notification = LeaderNotification {
            token: token.clone(),
            change,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as u64)
                .unwrap_or_default(),
        };
        self.broadcast(notification).await;
    }

    /// Get notification statistics
    pub async fn get_stats(&self) -> NotificationStats {
        self.stats.read().await.clone()
    }

    /// Get number of active subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn broadcast(&self, notification: LeaderNotification) {
        self.stats.write().await.notifications_sent += 1;

        // No broadcast receivers is fine
        let _ = self.broadcast_tx.send(notification.clone());

        let mut delivered = 0;
        let mut dropped = 0;
        {
            let subscribers = self.subscribers.read().await;
            for (filter, tx) in subscribers.values() {
                if filter.matches(&notification) {
                    match tx.send(notification.clone()) {
                        Ok(_) => delivered += 1,
                        Err(_) => {
                            dropped += 1;
                            warn!("Failed to deliver notification to subscriber");
                        }
                    }
                }
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.notifications_delivered += delivered;
            stats.notifications_dropped += dropped;
        }

        debug!(
            "Broadcast {:?}: delivered={}, dropped={}",
            notification.change, delivered, dropped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> InstanceToken {
        InstanceToken::new("node-a")
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = LeaderNotificationBus::new();

        let (id, _rx) = bus.subscribe(NotificationFilter::All).await.unwrap();
        assert_eq!(bus.subscription_count().await, 1);

        bus.unsubscribe(id).await.unwrap();
        assert_eq!(bus.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_transition_filter() {
        let bus = LeaderNotificationBus::new();
        let (_all, mut all_rx) = bus.subscribe(NotificationFilter::All).await.unwrap();
        let (_edges, mut edges_rx) = bus
            .subscribe(NotificationFilter::Transitions)
            .await
            .unwrap();

        bus.notify(&token(), LeadershipChange::Acquired { term: 1 })
            .await;
        bus.notify(&token(), LeadershipChange::Renewed { term: 1 })
            .await;
        bus.notify(
            &token(),
            LeadershipChange::Released {
                term: 1,
                reason: ReleaseReason::Shutdown,
            },
        )
        .await;

        assert!(matches!(
            edges_rx.try_recv().unwrap().change,
            LeadershipChange::Acquired { term: 1 }
        ));
        assert!(matches!(
            edges_rx.try_recv().unwrap().change,
            LeadershipChange::Released { .. }
        ));
        assert!(edges_rx.try_recv().is_err());

        for _ in 0..3 {
            assert_eq!(all_rx.try_recv().unwrap().token, token());
        }
    }

    #[tokio::test]
    async fn test_term_and_custom_filters() {
        let bus = LeaderNotificationBus::new();
        let (_t, mut term_rx) = bus.subscribe(NotificationFilter::Term(2)).await.unwrap();
        let (_c, mut custom_rx) = bus
            .subscribe(NotificationFilter::Custom(Arc::new(|n| {
                matches!(n.change, LeadershipChange::StartFailed { .. })
            })))
            .await
            .unwrap();

        bus.notify(&token(), LeadershipChange::Acquired { term: 1 })
            .await;
        bus.notify(&token(), LeadershipChange::RenewalFailed { term: 2 })
            .await;
        bus.notify(
            &token(),
            LeadershipChange::StartFailed {
                reason: "job failed".to_string(),
            },
        )
        .await;

        assert_eq!(
            term_rx.try_recv().unwrap().change,
            LeadershipChange::RenewalFailed { term: 2 }
        );
        assert!(term_rx.try_recv().is_err());
        assert!(custom_rx.try_recv().is_ok());
        assert!(custom_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stats_count_dropped() {
        let bus = LeaderNotificationBus::new();
        let (_id, rx) = bus.subscribe(NotificationFilter::All).await.unwrap();
        drop(rx);

        bus.notify(&token(), LeadershipChange::Renewed { term: 1 })
            .await;

        let stats = bus.get_stats().await;
        assert_eq!(stats.notifications_sent, 1);
        assert_eq!(stats.notifications_dropped, 1);
        assert_eq!(stats.total_subscriptions, 1);
    }

    #[test]
    fn test_release_reason_display() {
        assert_eq!(ReleaseReason::Shutdown.to_string(), "shutdown");
        assert_eq!(
            ReleaseReason::UnitFault("unit failed".to_string()).to_string(),
            "unit failed"
        );
    }
}
