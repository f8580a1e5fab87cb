//! Durable storage for the two persistent consensus items.
//!
//! Raft requires `current_term` and `voted_for` to be on stable storage
//! before any RPC response that depends on them is sent. Everything else the
//! core tracks is volatile.

use thiserror::Error;

use crate::NodeId;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors reported by a store backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// I/O failure (disk full, permission denied, ...).
    #[error("store i/o error: {0}")]
    Io(String),

    /// Persisted data failed validation.
    #[error("store corruption: {0}")]
    Corruption(String),
}

/// Durable store for `current_term` and `voted_for`.
///
/// Writes must be durable (fsync semantics) before returning.
pub trait Store: Send {
    /// Latest term this node has seen; 0 on first boot.
    fn current_term(&self) -> Result<u64, StoreError>;

    /// Persist the current term.
    fn set_current_term(&mut self, term: u64) -> Result<(), StoreError>;

    /// Candidate this node voted for in the current term, if any.
    fn voted_for(&self) -> Result<Option<NodeId>, StoreError>;

    /// Persist the vote.
    fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<(), StoreError>;
}
