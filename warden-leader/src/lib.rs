//! # Warden Leader
//!
//! Lease-based leader election bound to a supervised unit.
//!
//! This crate provides:
//! - The lock manager: acquire, renew and release of one lease key
//! - The election controller: the single task that owns leadership state
//! - Unit health monitoring for the current leadership term
//! - A notification bus for leadership changes
//!
//! The controller only talks to the outside world through the
//! [`CoordinationClient`](warden_core::CoordinationClient) and
//! [`ServiceSupervisor`](warden_core::ServiceSupervisor) traits.

pub mod controller;
pub mod errors;
pub mod health;
pub mod lock;
pub mod notifications;

pub use controller::{ElectionController, ElectionHandle, ElectionState, ElectionStats};
pub use errors::{LeaderError, LeaderResult};
pub use health::{assess_snapshot, HealthMonitor, MonitorEvent, UnitFault};
pub use lock::{LockManager, LockStatus, ReleaseOutcome, Renewal};
pub use notifications::{
    LeaderNotification, LeaderNotificationBus, LeadershipChange, NotificationFilter,
    ReleaseReason,
};
