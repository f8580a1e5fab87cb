//! Client-visible error taxonomy.

use thiserror::Error;

use crate::log::LogError;
use crate::store::StoreError;
use crate::NodeId;

/// Errors surfaced by the consensus module.
///
/// Protocol-level rejections (term mismatch, log inconsistency) are normal
/// control flow and never appear here; transport failures are absorbed by
/// the replication rounds and retried on the next tick.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RaftError {
    /// The module is shutting down.
    #[error("raft consensus module has been stopped")]
    Stopped,

    /// The leader failed to replicate to a majority within the deadline.
    /// Retryable by the client.
    #[error("commit timed out before reaching a majority")]
    CommitTimeout,

    /// A command was submitted to a node that is not the leader. Carries
    /// the last-known leader as a redirect hint when one is known.
    #[error("not the leader (known leader: {leader_hint:?})")]
    NotLeader { leader_hint: Option<NodeId> },

    /// The durable store failed. Fatal: the node must not keep operating
    /// on state it could not persist.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The log backend failed.
    #[error(transparent)]
    Log(#[from] LogError),
}
