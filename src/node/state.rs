//! Shared per-node consensus state.

use std::collections::HashMap;
use std::fmt;

use tokio::time::Instant;

use crate::log::{Log, LogError};
use crate::store::{Store, StoreError};
use crate::NodeId;

/// The role a node is currently acting in. Exactly one role is active per
/// node at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Volatile leader bookkeeping, created on conversion to leader and
/// discarded on step-down.
#[derive(Debug)]
pub(crate) struct LeaderVolatile {
    /// For each peer, index of the next log entry to send.
    pub next_index: HashMap<NodeId, u64>,
    /// For each peer, highest log index known to be replicated there.
    pub match_index: HashMap<NodeId, u64>,
}

/// Consensus state shared between the role loop, the RPC handlers, the
/// replication rounds and the apply loop. Guarded by one mutex; never held
/// across an outbound RPC.
pub(crate) struct NodeState {
    pub store: Box<dyn Store>,
    pub log: Box<dyn Log>,

    /// Cache of the durable term; writes go through `set_current_term`.
    pub current_term: u64,
    /// Cache of the durable vote; writes go through `set_voted_for`.
    pub voted_for: Option<NodeId>,

    /// Highest log index known committed. Monotonic.
    pub commit_index: u64,
    /// Highest log index applied to the state machine. Monotonic.
    pub last_applied: u64,

    pub role: Role,
    /// Last observed leader, used as a redirect hint for clients.
    pub leader_hint: Option<NodeId>,
    /// Last valid leader contact (or vote grant); the follower election
    /// timer measures from here.
    pub last_heartbeat: Instant,

    pub leader: Option<LeaderVolatile>,
}

impl NodeState {
    /// Load persistent state from the store. Nodes always boot as
    /// followers: resuming leadership from a stale `voted_for == self`
    /// could seat a leader of an old term.
    pub fn new(store: Box<dyn Store>, log: Box<dyn Log>) -> Result<Self, StoreError> {
        let current_term = store.current_term()?;
        let voted_for = store.voted_for()?;
        Ok(NodeState {
            store,
            log,
            current_term,
            voted_for,
            commit_index: 0,
            last_applied: 0,
            role: Role::Follower,
            leader_hint: None,
            last_heartbeat: Instant::now(),
            leader: None,
        })
    }

    /// Persist and cache the current term. Terms never decrease.
    pub fn set_current_term(&mut self, term: u64) -> Result<(), StoreError> {
        debug_assert!(term >= self.current_term);
        self.store.set_current_term(term)?;
        self.current_term = term;
        Ok(())
    }

    /// Persist and cache the vote.
    pub fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<(), StoreError> {
        self.store.set_voted_for(voted_for.clone())?;
        self.voted_for = voted_for;
        Ok(())
    }

    /// Observed a term above ours: adopt it, clear the vote, convert to
    /// follower.
    pub fn adopt_term(&mut self, term: u64) -> Result<(), StoreError> {
        self.set_current_term(term)?;
        self.set_voted_for(None)?;
        self.step_down();
        Ok(())
    }

    /// Convert to follower, dropping any leader bookkeeping.
    pub fn step_down(&mut self) {
        self.role = Role::Follower;
        self.leader = None;
    }

    /// Convert to leader: reinitialize `next_index`/`match_index` for every
    /// peer.
    pub fn become_leader(&mut self, id: &NodeId, peers: &[NodeId]) -> Result<(), LogError> {
        let (last_index, _) = self.log.last()?;
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in peers {
            next_index.insert(peer.clone(), last_index + 1);
            match_index.insert(peer.clone(), 0);
        }
        self.leader = Some(LeaderVolatile {
            next_index,
            match_index,
        });
        self.role = Role::Leader;
        self.leader_hint = Some(id.clone());
        Ok(())
    }
}
