//! A small Raft consensus module.
//!
//! The crate implements the per-node Raft state machine: leader election,
//! log replication and commit advancement over a fixed set of peers. The
//! pieces a deployment supplies are pluggable traits: the [`log::Log`]
//! backend, the [`store::Store`] for durable term/vote state, the
//! [`transport::Transport`] carrying the two RPCs, and the
//! [`state_machine::StateMachine`] that committed commands are applied to.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod log;
pub mod node;
pub mod rpc;
pub mod state_machine;
pub mod store;
pub mod transport;

/// Testing utilities for integration tests.
pub mod testing;

pub use config::RaftConfig;
pub use error::RaftError;
pub use node::RaftNode;

/// Identifier of a single Raft node. Opaque to the core; deployments
/// typically use a hostname or a small integer rendered as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(id)
    }
}
