//! The Raft node: supervisor, role loops, RPC handlers and the apply loop.
//!
//! A [`RaftNode`] is a cheap cloneable handle over the shared node state.
//! One clone drives [`RaftNode::run`]; any number of others submit commands
//! via [`RaftNode::handle`] or dispatch incoming RPCs into
//! [`RaftNode::request_vote`] / [`RaftNode::append_entries`] from whatever
//! transport front-end the deployment wires up.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, Notify};

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::log::{Command, Log, LogEntry};
use crate::state_machine::StateMachine;
use crate::store::Store;
use crate::transport::Transport;
use crate::NodeId;

mod apply;
mod handlers;
mod replication;
mod roles;
mod state;

pub use state::Role;

use state::NodeState;

pub(crate) struct NodeInner<T: Transport> {
    pub id: NodeId,
    pub peers: Vec<NodeId>,
    pub config: RaftConfig,
    pub transport: T,

    pub state: Mutex<NodeState>,
    pub state_machine: Mutex<Box<dyn StateMachine>>,

    /// Signalled on every commit-index advance; the apply loop waits here.
    pub apply_notify: Notify,

    /// Fan-in from RPC handlers to the active role loop: "saw a higher
    /// term, step down". Bounded at 1; handlers drop the nudge when full.
    pub step_down_tx: mpsc::Sender<u64>,
    step_down_rx: std::sync::Mutex<Option<mpsc::Receiver<u64>>>,

    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

/// A single Raft consensus node.
pub struct RaftNode<T: Transport> {
    pub(crate) inner: Arc<NodeInner<T>>,
}

impl<T: Transport> Clone for RaftNode<T> {
    fn clone(&self) -> Self {
        RaftNode {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport + 'static> RaftNode<T> {
    /// Create a node. `peers` are the other members of the cluster; the
    /// transport resolves their addresses.
    pub fn new(
        id: NodeId,
        peers: Vec<NodeId>,
        log: Box<dyn Log>,
        store: Box<dyn Store>,
        state_machine: Box<dyn StateMachine>,
        transport: T,
        config: RaftConfig,
    ) -> Result<Self, RaftError> {
        let state = NodeState::new(store, log)?;
        let (step_down_tx, step_down_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        Ok(RaftNode {
            inner: Arc::new(NodeInner {
                id,
                peers,
                config,
                transport,
                state: Mutex::new(state),
                state_machine: Mutex::new(state_machine),
                apply_notify: Notify::new(),
                step_down_tx,
                step_down_rx: std::sync::Mutex::new(Some(step_down_rx)),
                stop_tx,
                stop_rx,
            }),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    /// Drive the node: spawns the apply loop, then runs the role state
    /// machine until [`stop`](Self::stop) is called or the durable store
    /// fails. Call once.
    pub async fn run(&self) -> Result<(), RaftError> {
        let Some(mut step_down_rx) = self.inner.step_down_rx.lock().unwrap().take() else {
            return Err(RaftError::Stopped);
        };

        let apply_task = tokio::spawn(self.clone().apply_loop());

        let result = self.role_loop(&mut step_down_rx).await;

        // Make sure the apply loop (and anything waiting on done) winds
        // down even when we exit on a fatal store error.
        self.stop();
        let _ = apply_task.await;

        match result {
            Err(RaftError::Stopped) => Ok(()),
            other => other,
        }
    }

    async fn role_loop(&self, step_down: &mut mpsc::Receiver<u64>) -> Result<(), RaftError> {
        tracing::info!(id = %self.inner.id, "raft node starting as follower");
        let mut role = Role::Follower;
        loop {
            role = match role {
                Role::Follower => self.run_follower(step_down).await?,
                Role::Candidate => self.run_candidate(step_down).await?,
                Role::Leader => self.run_leader(step_down).await?,
            };
        }
    }

    /// Signal shutdown. All loops observe it at their next suspension
    /// point.
    pub fn stop(&self) {
        let _ = self.inner.stop_tx.send(true);
    }

    /// Resolves once the node has been stopped.
    pub async fn done(&self) {
        let mut rx = self.inner.stop_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_rx.borrow()
    }

    /// Submit commands for replication.
    ///
    /// On the leader this appends the commands to the local log and returns
    /// once a majority of the cluster has them, or
    /// [`RaftError::CommitTimeout`] at the configured deadline. Application
    /// to the state machine happens asynchronously afterwards. Non-leaders
    /// reject with [`RaftError::NotLeader`].
    pub async fn handle(&self, commands: Vec<Command>) -> Result<(), RaftError> {
        if self.is_stopped() {
            return Err(RaftError::Stopped);
        }
        if commands.is_empty() {
            return Ok(());
        }
        {
            let mut st = self.inner.state.lock().await;
            if st.role != Role::Leader {
                return Err(RaftError::NotLeader {
                    leader_hint: st.leader_hint.clone(),
                });
            }
            let term = st.current_term;
            let entries: Vec<LogEntry> = commands
                .into_iter()
                .map(|command| LogEntry::new(term, command))
                .collect();
            // Durable in the local log before anything goes out to peers.
            st.log.append(entries)?;
        }
        self.broadcast_append(self.inner.config.commit_timeout).await
    }

    /// Current role, for status endpoints and tests.
    pub async fn role(&self) -> Role {
        self.inner.state.lock().await.role
    }

    pub async fn current_term(&self) -> u64 {
        self.inner.state.lock().await.current_term
    }

    pub async fn commit_index(&self) -> u64 {
        self.inner.state.lock().await.commit_index
    }

    pub async fn last_applied(&self) -> u64 {
        self.inner.state.lock().await.last_applied
    }

    pub async fn voted_for(&self) -> Option<NodeId> {
        self.inner.state.lock().await.voted_for.clone()
    }

    /// Index and term of the last log entry.
    pub async fn last_log(&self) -> Result<(u64, u64), RaftError> {
        Ok(self.inner.state.lock().await.log.last()?)
    }

    /// Committed-and-beyond log inspection for status endpoints and tests;
    /// the range is `(from, to]`.
    pub async fn log_entries(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, RaftError> {
        Ok(self.inner.state.lock().await.log.range_get(from, to)?)
    }

    /// Votes needed for a majority, counting this node.
    pub(crate) fn majority(&self) -> usize {
        (self.inner.peers.len() + 1) / 2 + 1
    }

    /// Wake the active role loop because a handler observed `term` and
    /// stepped down. Best effort: the channel is bounded at 1 and an
    /// already-pending nudge is enough.
    pub(crate) fn nudge_step_down(&self, term: u64) {
        let _ = self.inner.step_down_tx.try_send(term);
    }
}
