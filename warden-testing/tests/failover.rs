//! Leadership moving between instances after unit faults, start failures and
//! partitions.

use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use warden_leader::{ElectionState, LeadershipChange, NotificationFilter, ReleaseReason};
use warden_testing::{init_test_logging, ClusterConfig, ElectionCluster, Fault};

fn ordered() -> ClusterConfig {
    ClusterConfig {
        shuffle_start: false,
        ..ClusterConfig::default()
    }
}

/// Start node 0 alone so it wins, then the others.
async fn cluster_led_by_first() -> ElectionCluster {
    let mut cluster = ElectionCluster::new(ordered()).unwrap();
    cluster.start_node(0);
    assert_eq!(
        cluster.wait_for_leader(Duration::from_secs(1)).await,
        Some(0)
    );
    for node in 1..cluster.len() {
        cluster.start_node(node);
    }
    cluster
}

#[tokio::test(start_paused = true)]
async fn test_unit_fault_moves_leadership() {
    init_test_logging();
    let cluster = cluster_led_by_first().await;
    let (_id, mut transitions) = cluster
        .node(0)
        .handle
        .notifications()
        .subscribe(NotificationFilter::Transitions)
        .await
        .unwrap();

    // B and C stay followers while A renews
    sleep(Duration::from_secs(62)).await;
    assert_eq!(cluster.leaders(), vec![0]);
    assert_eq!(cluster.state_of(1), ElectionState::Follower);
    assert_eq!(cluster.state_of(2), ElectionState::Follower);

    // A's unit keeps failing from now on, so A cannot win again
    cluster.inject(Fault::BreakUnit { node: 0 });
    cluster.inject(Fault::FailUnit { node: 0 });
    let failed_at = Instant::now();

    let released = loop {
        let notification = transitions.recv().await.unwrap();
        if let LeadershipChange::Released { reason, .. } = notification.change {
            break reason;
        }
    };
    assert!(matches!(released, ReleaseReason::UnitFault(_)));
    // The monitor reacts to the pushed change, not to the next poll
    assert!(failed_at.elapsed() < Duration::from_secs(1));
    assert_eq!(cluster.node(0).supervisor.stop_count(cluster.unit()), 1);

    let next = cluster
        .wait_for_leader(Duration::from_secs(6))
        .await
        .expect("B or C takes over on its next poll");
    assert!(next == 1 || next == 2);
    assert_eq!(cluster.holder(), Some(next));
    cluster.check_exclusion().unwrap();

    let stats = cluster.shutdown().await;
    assert_eq!(stats[0].unit_faults, 1);
    assert_eq!(stats[0].releases, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_never_leads() {
    init_test_logging();
    let mut cluster = ElectionCluster::new(ordered()).unwrap();
    cluster.inject(Fault::BreakUnit { node: 0 });

    let (_id, mut notifications) = cluster
        .node(0)
        .handle
        .notifications()
        .subscribe(NotificationFilter::All)
        .await
        .unwrap();
    cluster.start_node(0);

    let first = notifications.recv().await.unwrap();
    assert!(matches!(first.change, LeadershipChange::StartFailed { .. }));
    // Released before the next poll could renew it
    assert_eq!(cluster.holder(), None);
    assert_eq!(cluster.state_of(0), ElectionState::Follower);

    cluster.start_node(1);
    cluster.start_node(2);
    let leader = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .unwrap();
    assert_ne!(leader, 0);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(cluster.leaders(), vec![leader]);
    assert_eq!(
        cluster.node(0).supervisor.start_count(cluster.unit()),
        1,
        "node-0 never wins the lease again while another node holds it"
    );

    let stats = cluster.shutdown().await;
    assert_eq!(stats[0].start_failures, 1);
    assert_eq!(stats[0].acquisitions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_partitioned_leader_steps_down_before_takeover() {
    init_test_logging();
    let cluster = cluster_led_by_first().await;
    let mut states = cluster.node(0).handle.subscribe();

    cluster.inject(Fault::Partition { node: 0 });
    let partitioned_at = Instant::now();

    states
        .wait_for(|state| !state.is_leader())
        .await
        .unwrap();
    let stepped_down_after = partitioned_at.elapsed();
    assert!(stepped_down_after <= Duration::from_secs(30));
    assert!(!cluster.node(0).supervisor.is_running(cluster.unit()));

    let next = cluster
        .wait_for_leader(Duration::from_secs(40))
        .await
        .unwrap();
    assert_ne!(next, 0);
    cluster.check_exclusion().unwrap();

    // Back from the partition, the old leader follows
    cluster.inject(Fault::Heal { node: 0 });
    sleep(Duration::from_secs(30)).await;
    assert_eq!(cluster.leaders(), vec![next]);
    assert_eq!(cluster.state_of(0), ElectionState::Follower);

    cluster.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_leader_stops_before_expiry_with_offset_polls() {
    init_test_logging();
    let mut cluster = ElectionCluster::new(ClusterConfig {
        size: 2,
        poll_interval: Duration::from_secs(7),
        ..ordered()
    })
    .unwrap();
    let started = Instant::now();
    cluster.start_node(0);
    assert_eq!(
        cluster.wait_for_leader(Duration::from_secs(1)).await,
        Some(0)
    );

    // A 30s TTL is no multiple of 7s and node-1 polls 3s after node-0
    sleep_until(started + Duration::from_secs(3)).await;
    cluster.start_node(1);

    // node-0 renews at 21s, so the lease expires at 51s and node-1 polls at 52s
    sleep_until(started + Duration::from_secs(22)).await;
    cluster.inject(Fault::Partition { node: 0 });

    sleep(Duration::from_millis(50)).await;
    for _ in 0..600 {
        if let Err(violation) = cluster.check_exclusion() {
            panic!("at {:?}: {}", started.elapsed(), violation);
        }
        sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(cluster.leaders(), vec![1]);
    assert_eq!(cluster.state_of(0), ElectionState::Follower);

    let stats = cluster.shutdown().await;
    assert_eq!(stats[0].acquisitions, 1);
    assert_eq!(stats[0].renewals, 1);
    assert_eq!(stats[1].acquisitions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_renewals_demote_leader() {
    init_test_logging();
    let cluster = cluster_led_by_first().await;

    cluster.inject(Fault::BlockWrites { node: 0 });
    sleep(Duration::from_secs(45)).await;

    assert_eq!(cluster.state_of(0), ElectionState::Follower);
    let next = cluster
        .wait_for_leader(Duration::from_secs(10))
        .await
        .unwrap();
    assert_ne!(next, 0);
    cluster.check_exclusion().unwrap();

    let stats = cluster.shutdown().await;
    assert!(stats[0].renewal_failures >= 1);
    assert_eq!(stats[0].releases, 1);
}
