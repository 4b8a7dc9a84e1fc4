//! # Change Notification System
//!
//! Event-driven notification system for lease store changes using a message bus pattern.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Types of changes that can occur in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Refreshed,
    Deleted,
    Expired,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Created => write!(f, "CREATED"),
            ChangeType::Refreshed => write!(f, "REFRESHED"),
            ChangeType::Deleted => write!(f, "DELETED"),
            ChangeType::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Notification about a change in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub key: String,
    pub change_type: ChangeType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub modified_index: u64,
}

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter for notifications
#[derive(Debug, Clone)]
pub enum NotificationFilter {
    /// All notifications
    All,
    /// Only notifications for specific key
    Key(String),
    /// Only notifications of specific type
    ChangeType(ChangeType),
    /// Any of the filters can match
    Or(Vec<NotificationFilter>),
}

impl NotificationFilter {
    /// Check if a notification matches this filter
    pub fn matches(&self, notification: &ChangeNotification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Key(key) => notification.key == *key,
            NotificationFilter::ChangeType(change_type) => {
                notification.change_type == *change_type
            }
            NotificationFilter::Or(filters) => filters.iter().any(|f| f.matches(notification)),
        }
    }
}

/// Subscription to notifications
pub struct Subscription {
    pub id: SubscriptionId,
    pub filter: NotificationFilter,
    pub receiver: mpsc::UnboundedReceiver<ChangeNotification>,
}

/// Statistics about the notification bus
#[derive(Debug, Clone, Default)]
pub struct NotificationStats {
    pub total_notifications_sent: u64,
    pub total_subscribers: usize,
    pub dropped_notifications: u64,
}

type SubscriberMap =
    HashMap<SubscriptionId, (NotificationFilter, mpsc::UnboundedSender<ChangeNotification>)>;

/// Message bus for distributing change notifications
pub struct NotificationBus {
    /// Broadcast channel for all notifications
    broadcast_tx: broadcast::Sender<ChangeNotification>,

    /// Individual subscriber channels
    subscribers: Arc<RwLock<SubscriberMap>>,

    /// Statistics
    stats: Arc<RwLock<NotificationStats>>,
}

impl NotificationBus {
    /// Create a new notification bus
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1000);

        Self {
            broadcast_tx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NotificationStats::default())),
        }
    }

    /// Subscribe to notifications with a filter
    pub fn subscribe(&self, filter: NotificationFilter) -> Subscription {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers.write().insert(id, (filter.clone(), tx));
        self.stats.write().total_subscribers += 1;

        debug!("New subscription created: {:?} with filter: {:?}", id, filter);

        Subscription {
            id,
            filter,
            receiver: rx,
        }
    }

    /// Subscribe to all notifications
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(NotificationFilter::All)
    }

    /// Subscribe to notifications for a specific key
    pub fn subscribe_key(&self, key: &str) -> Subscription {
        self.subscribe(NotificationFilter::Key(key.to_string()))
    }

    /// Unsubscribe from notifications
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) {
        if self.subscribers.write().remove(&subscription_id).is_some() {
            let mut stats = self.stats.write();
            stats.total_subscribers = stats.total_subscribers.saturating_sub(1);
            debug!("Subscription removed: {:?}", subscription_id);
        }
    }

    /// Publish a notification to all subscribers.
    ///
    /// Never blocks, so it is safe to call while a store entry is locked.
    pub fn publish(&self, notification: ChangeNotification) {
        self.stats.write().total_notifications_sent += 1;

        // No broadcast receivers is fine
        let _ = self.broadcast_tx.send(notification.clone());

        let mut dropped_count = 0;
        {
            let subscribers = self.subscribers.read();
            for (filter, sender) in subscribers.values() {
                if filter.matches(&notification) && sender.send(notification.clone()).is_err() {
                    dropped_count += 1;
                }
            }
        }

        if dropped_count > 0 {
            self.stats.write().dropped_notifications += dropped_count;
            debug!(
                "Dropped {} notifications due to closed channels",
                dropped_count
            );
        }

        debug!(
            "Published notification: key={}, type={}",
            notification.key, notification.change_type
        );
    }

    /// Get a broadcast receiver for all notifications
    pub fn broadcast_receiver(&self) -> broadcast::Receiver<ChangeNotification> {
        self.broadcast_tx.subscribe()
    }

    /// Get current statistics
    pub fn get_stats(&self) -> NotificationStats {
        let stats = self.stats.read();
        NotificationStats {
            total_notifications_sent: stats.total_notifications_sent,
            total_subscribers: self.subscribers.read().len(),
            dropped_notifications: stats.dropped_notifications,
        }
    }

    /// Clean up closed subscriber channels
    pub fn cleanup_closed_subscribers(&self) {
        let mut subscribers = self.subscribers.write();
        let initial_count = subscribers.len();
        subscribers.retain(|_, (_, sender)| !sender.is_closed());

        let removed = initial_count - subscribers.len();
        if removed > 0 {
            debug!("Cleaned up {} closed subscriber channels", removed);
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(key: &str, change_type: ChangeType) -> ChangeNotification {
        ChangeNotification {
            key: key.to_string(),
            change_type,
            old_value: None,
            new_value: Some("node-a".to_string()),
            modified_index: 1,
        }
    }

    #[tokio::test]
    async fn test_notification_bus_basic() {
        let bus = NotificationBus::new();
        let mut subscription = bus.subscribe_all();

        bus.publish(notification("/warden/web", ChangeType::Created));

        let received = subscription.receiver.recv().await.unwrap();
        assert_eq!(received.key, "/warden/web");
        assert_eq!(received.change_type, ChangeType::Created);
    }

    #[tokio::test]
    async fn test_notification_filtering() {
        let bus = NotificationBus::new();
        let mut key_subscription = bus.subscribe_key("/warden/db");
        let mut expiry_subscription = bus.subscribe(NotificationFilter::ChangeType(ChangeType::Expired));

        bus.publish(notification("/warden/web", ChangeType::Created));
        bus.publish(notification("/warden/db", ChangeType::Refreshed));
        bus.publish(notification("/warden/web", ChangeType::Expired));

        let received = key_subscription.receiver.recv().await.unwrap();
        assert_eq!(received.key, "/warden/db");
        assert!(key_subscription.receiver.try_recv().is_err());

        let received = expiry_subscription.receiver.recv().await.unwrap();
        assert_eq!(received.change_type, ChangeType::Expired);
        assert_eq!(received.key, "/warden/web");
    }

    #[tokio::test]
    async fn test_notification_stats_and_cleanup() {
        let bus = NotificationBus::new();
        let subscription = bus.subscribe_all();
        let kept = bus.subscribe_all();

        drop(subscription);
        bus.publish(notification("/warden/web", ChangeType::Deleted));

        let stats = bus.get_stats();
        assert_eq!(stats.total_notifications_sent, 1);
        assert_eq!(stats.dropped_notifications, 1);

        bus.cleanup_closed_subscribers();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(kept.id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_notification_filter_logic() {
        let n = notification("/warden/web", ChangeType::Refreshed);

        assert!(NotificationFilter::All.matches(&n));
        assert!(NotificationFilter::Key("/warden/web".to_string()).matches(&n));
        assert!(!NotificationFilter::Key("/warden/db".to_string()).matches(&n));
        assert!(!NotificationFilter::ChangeType(ChangeType::Created).matches(&n));

        let or_filter = NotificationFilter::Or(vec![
            NotificationFilter::Key("/warden/db".to_string()),
            NotificationFilter::ChangeType(ChangeType::Refreshed),
        ]);
        assert!(or_filter.matches(&n));
    }
}
