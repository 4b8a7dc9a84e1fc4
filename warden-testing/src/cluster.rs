use crate::fault_injection::{Fault, FlakyCoordination};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::info;
use warden_core::{
    ElectionConfig, InMemorySupervisor, InstanceToken, JobResult, StartBehavior,
};
use warden_kvstore::LeaseStore;
use warden_leader::{
    ElectionController, ElectionHandle, ElectionState, ElectionStats, LeaderResult,
};

/// Shape of a test cluster
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub size: usize,
    pub identifier: String,
    pub ttl_secs: u64,
    pub poll_interval: Duration,
    /// Spawn controllers in random order
    pub shuffle_start: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            size: 3,
            identifier: "web".to_string(),
            ttl_secs: 30,
            poll_interval: Duration::from_secs(5),
            shuffle_start: true,
        }
    }
}

impl ClusterConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// One election participant with its own supervisor and backend connection.
pub struct ClusterNode {
    pub token: InstanceToken,
    pub supervisor: InMemorySupervisor,
    pub coordination: Arc<FlakyCoordination<Arc<LeaseStore>>>,
    pub handle: ElectionHandle,
    controller: Option<ElectionController>,
    task: Option<JoinHandle<ElectionStats>>,
}

impl ClusterNode {
    pub fn is_started(&self) -> bool {
        self.task.is_some()
    }

    pub fn is_leader(&self) -> bool {
        self.handle.is_leader()
    }
}

/// N controllers sharing one [`LeaseStore`].
pub struct ElectionCluster {
    config: ClusterConfig,
    store: Arc<LeaseStore>,
    unit: String,
    lease_key: String,
    nodes: Vec<ClusterNode>,
}

impl ElectionCluster {
    /// Build the cluster without starting any controller.
    pub fn new(config: ClusterConfig) -> LeaderResult<Self> {
        let store = Arc::new(LeaseStore::default());
        let mut nodes = Vec::with_capacity(config.size);
        let mut unit = String::new();
        let mut lease_key = String::new();

        for index in 0..config.size {
            let token = InstanceToken::new(format!("node-{}", index));
            let election = ElectionConfig::for_identifier(&config.identifier, token.clone())?
                .with_ttl_secs(config.ttl_secs)
                .with_poll_interval(config.poll_interval);
            unit = election.unit_name.clone();
            lease_key = election.lease_key.as_str().to_string();

            let supervisor = InMemorySupervisor::new();
            let coordination = Arc::new(FlakyCoordination::new(store.clone()));
            let controller = ElectionController::new(
                election,
                coordination.clone(),
                Arc::new(supervisor.clone()),
            )?;

            nodes.push(ClusterNode {
                token,
                supervisor,
                coordination,
                handle: controller.handle(),
                controller: Some(controller),
                task: None,
            });
        }

        Ok(Self {
            config,
            store,
            unit,
            lease_key,
            nodes,
        })
    }

    /// Build and start every node.
    pub fn start(config: ClusterConfig) -> LeaderResult<Self> {
        let mut cluster = Self::new(config)?;
        cluster.start_all();
        Ok(cluster)
    }

    pub fn start_all(&mut self) {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        if self.config.shuffle_start {
            order.shuffle(&mut rand::thread_rng());
        }
        for index in order {
            self.start_node(index);
        }
    }

    /// Spawn the controller of `index`. Starting twice does nothing.
    pub fn start_node(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        if let Some(controller) = node.controller.take() {
            info!("Starting {}", node.token);
            node.task = Some(tokio::spawn(controller.run()));
        }
    }

    /// Shut one node down and return its final statistics.
    pub async fn stop_node(&mut self, index: usize) -> Option<ElectionStats> {
        let node = &mut self.nodes[index];
        node.handle.shutdown();
        match node.task.take() {
            Some(task) => task.await.ok(),
            None => None,
        }
    }

    pub async fn shutdown(mut self) -> Vec<ElectionStats> {
        let mut stats = Vec::new();
        for index in 0..self.nodes.len() {
            if let Some(node_stats) = self.stop_node(index).await {
                stats.push(node_stats);
            }
        }
        stats
    }

    pub fn store(&self) -> &Arc<LeaseStore> {
        &self.store
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn lease_key(&self) -> &str {
        &self.lease_key
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn node(&self, index: usize) -> &ClusterNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes whose controller is in the Leader state
    pub fn leaders(&self) -> Vec<usize> {
        self.indexes(|node| node.is_leader())
    }

    /// Nodes whose supervised unit is currently running
    pub fn running_units(&self) -> Vec<usize> {
        let unit = self.unit.clone();
        self.indexes(move |node| node.supervisor.is_running(&unit))
    }

    /// Node whose token is stored in the lease, if any
    pub fn holder(&self) -> Option<usize> {
        let value = self.store.peek(&self.lease_key)?;
        self.nodes.iter().position(|node| node.token.owns(&value))
    }

    pub fn state_of(&self, index: usize) -> ElectionState {
        self.nodes[index].handle.state()
    }

    /// At most one leader and at most one running unit, and a running unit
    /// belongs to the lease holder.
    pub fn check_exclusion(&self) -> Result<(), String> {
        let leaders = self.leaders();
        if leaders.len() > 1 {
            return Err(format!("several leaders: {:?}", leaders));
        }

        let running = self.running_units();
        match running.as_slice() {
            [] => Ok(()),
            [node] if self.holder() == Some(*node) => Ok(()),
            [node] => Err(format!(
                "unit running on node-{} but the lease is held by {:?}",
                node,
                self.store.peek(&self.lease_key)
            )),
            several => Err(format!("unit running on several nodes: {:?}", several)),
        }
    }

    /// Wait until exactly one node leads, for at most `within`.
    pub async fn wait_for_leader(&self, within: Duration) -> Option<usize> {
        let deadline = Instant::now() + within;
        loop {
            if let [leader] = self.leaders().as_slice() {
                return Some(*leader);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Wait until nobody leads, for at most `within`.
    pub async fn wait_for_no_leader(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if self.leaders().is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn inject(&self, fault: Fault) {
        info!("Injecting {:?}", fault);
        match fault {
            Fault::Partition { node } => self.nodes[node].coordination.partition(),
            Fault::Heal { node } => self.nodes[node].coordination.heal(),
            Fault::BlockWrites { node } => self.nodes[node].coordination.block_writes(true),
            Fault::FlakyBackend { node, rate } => {
                self.nodes[node].coordination.set_failure_rate(rate)
            }
            Fault::FailUnit { node } => self.nodes[node].supervisor.fail_unit(&self.unit),
            Fault::BreakUnit { node } => self.nodes[node]
                .supervisor
                .set_start_behavior(StartBehavior::Result(JobResult::Failed)),
            Fault::BackendOutage => self.store.set_available(false),
            Fault::BackendRestore => self.store.set_available(true),
        }
    }

    fn indexes(&self, predicate: impl Fn(&ClusterNode) -> bool) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| predicate(node))
            .map(|(index, _)| index)
            .collect()
    }
}
