//! Test support for running several election participants against one
//! in-memory coordination store.
//!
//! - [`ElectionCluster`] wires N controllers to a shared [`LeaseStore`] and
//!   gives each its own [`InMemorySupervisor`]
//! - [`FlakyCoordination`] wraps any coordination client to partition it,
//!   block its writes or fail calls at random
//!
//! [`LeaseStore`]: warden_kvstore::LeaseStore
//! [`InMemorySupervisor`]: warden_core::InMemorySupervisor

pub mod cluster;
pub mod fault_injection;

pub use cluster::{ClusterConfig, ClusterNode, ElectionCluster};
pub use fault_injection::{Fault, FaultStats, FlakyCoordination};

/// Install a WARN-level subscriber once per test binary.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}
