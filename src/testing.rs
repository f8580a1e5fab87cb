//! Testing utilities for Raft cluster integration tests.
//!
//! Provides [`TestCluster`] for spinning up in-process clusters over the
//! in-memory transport, with every node's run loop and request pump
//! spawned, and its applied commands observable.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::log::MemoryLog;
use crate::node::{RaftNode, Role};
use crate::state_machine::{AppliedCommands, TestStateMachine};
use crate::store::MemoryStore;
use crate::transport::inmemory::{create_cluster_with_timeout, InMemoryTransport};
use crate::NodeId;

/// A single node in a [`TestCluster`].
pub struct TestNode {
    pub id: NodeId,
    pub node: RaftNode<InMemoryTransport>,
    /// Commands the node's state machine has applied, in order.
    pub applied: AppliedCommands,
    run_task: JoinHandle<Result<(), RaftError>>,
    serve_task: JoinHandle<()>,
}

/// An in-process cluster of running Raft nodes.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Spin up `count` nodes with identical fast timeouts.
    pub fn with_nodes(count: usize) -> Self {
        Self::with_configs(vec![Self::default_config(); count])
    }

    /// Spin up one node per config. Giving one node a much shorter
    /// election timeout than the rest makes it the deterministic winner of
    /// the first election.
    pub fn with_configs(configs: Vec<RaftConfig>) -> Self {
        let node_ids: Vec<NodeId> = (1..=configs.len())
            .map(|i| NodeId::new(format!("n{}", i)))
            .collect();

        // RPC timeout below the smallest heartbeat interval keeps calls to
        // dead peers from stalling a round.
        let rpc_timeout = configs
            .iter()
            .map(|c| c.rpc_timeout)
            .min()
            .unwrap_or(Duration::from_millis(50));
        let (mut transports, mut handles) =
            create_cluster_with_timeout(&node_ids, Some(rpc_timeout));

        let mut nodes = Vec::new();
        for (id, config) in node_ids.iter().zip(configs) {
            let peers: Vec<NodeId> = node_ids.iter().filter(|p| *p != id).cloned().collect();
            let applied: AppliedCommands = Default::default();

            let node = RaftNode::new(
                id.clone(),
                peers,
                Box::new(MemoryLog::new()),
                Box::new(MemoryStore::new()),
                Box::new(TestStateMachine::new_shared(applied.clone())),
                transports.remove(id).unwrap(),
                config,
            )
            .expect("memory-backed node construction cannot fail");

            let serve_task = handles.remove(id).unwrap().serve(node.clone());
            let run_node = node.clone();
            let run_task = tokio::spawn(async move { run_node.run().await });

            nodes.push(TestNode {
                id: id.clone(),
                node,
                applied,
                run_task,
                serve_task,
            });
        }

        TestCluster { nodes }
    }

    /// Election timeouts an order of magnitude over the heartbeat, small
    /// enough that paused-time tests converge quickly.
    pub fn default_config() -> RaftConfig {
        RaftConfig::default()
            .with_election_timeout(Duration::from_millis(150), Duration::from_millis(300))
            .with_commit_timeout(Duration::from_millis(500))
    }

    /// Index of the current leader, if exactly one node claims the role.
    pub async fn leader(&self) -> Option<usize> {
        let mut leader = None;
        for (i, entry) in self.nodes.iter().enumerate() {
            if entry.node.role().await == Role::Leader {
                if leader.is_some() {
                    return None;
                }
                leader = Some(i);
            }
        }
        leader
    }

    /// Poll until a leader emerges or `timeout` passes.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(leader) = self.leader().await {
                return Some(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until every node's commit index reaches `index`.
    pub async fn wait_for_commit(&self, index: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut all = true;
            for entry in &self.nodes {
                if entry.node.commit_index().await < index {
                    all = false;
                    break;
                }
            }
            if all {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop every node and wait for its tasks to finish.
    pub async fn shutdown(self) {
        for entry in &self.nodes {
            entry.node.stop();
        }
        for entry in self.nodes {
            let _ = entry.run_task.await;
            let _ = entry.serve_task.await;
        }
    }
}
