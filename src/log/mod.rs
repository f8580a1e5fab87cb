//! The replicated log abstraction.
//!
//! Raft treats the log as an ordered, append-mostly sequence of entries.
//! Entries are 1-indexed with no gaps, and terms never decrease along the
//! sequence; index 0 is the sentinel "before the first entry" and is defined
//! to carry term 0.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub use memory::MemoryLog;

/// Opaque command payload carried by a log entry.
pub type Command = Vec<u8>;

/// A single replicated log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 1.
    pub index: u64,
    /// Term in which the entry was created by a leader.
    pub term: u64,
    /// Command for the state machine; opaque to the core.
    pub command: Command,
    /// Wall-clock time the entry was appended. Informational only.
    pub append_time: SystemTime,
}

impl LogEntry {
    /// Build an entry for the given term; the index is assigned by the log
    /// on append.
    pub fn new(term: u64, command: Command) -> Self {
        LogEntry {
            index: 0,
            term,
            command,
            append_time: SystemTime::now(),
        }
    }
}

/// Errors reported by a log backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LogError {
    /// `append_at` was asked to truncate after an index past the log's end.
    #[error("append point {prev_index} is beyond the last log index {last_index}")]
    TruncateBeyondEnd { prev_index: u64, last_index: u64 },

    /// Entries handed to `append_at` do not continue the log contiguously.
    #[error("entry index {index} does not follow {expected}")]
    NonContiguous { index: u64, expected: u64 },

    /// Backend-specific failure (I/O, corruption).
    #[error("log backend error: {0}")]
    Backend(String),
}

/// Storage backend for the replicated log.
///
/// Implementations serialize mutations internally; `append` and `append_at`
/// are never invoked concurrently by the core.
pub trait Log: Send {
    /// Term of the entry at `index`, or `None` if no such entry exists.
    /// Index 0 is defined to have term 0.
    fn get(&self, index: u64) -> Result<Option<u64>, LogError>;

    /// True iff the log contains an entry at `index` with `term`.
    /// `(0, 0)` always matches.
    fn matches(&self, index: u64, term: u64) -> Result<bool, LogError> {
        Ok(self.get(index)? == Some(term))
    }

    /// Index and term of the last entry; `(0, 0)` for an empty log.
    fn last(&self) -> Result<(u64, u64), LogError>;

    /// Entries in the half-open-below, closed-above range `(i, j]`.
    /// Empty if `j <= i` or the range runs past the end of the log.
    fn range_get(&self, i: u64, j: u64) -> Result<Vec<LogEntry>, LogError>;

    /// Append entries at the end of the log, assigning contiguous indices
    /// after the current last entry.
    fn append(&mut self, entries: Vec<LogEntry>) -> Result<(), LogError>;

    /// Truncate everything strictly after `prev_index`, then append
    /// `entries`. Fails if `prev_index` is past the end of the log.
    fn append_at(&mut self, prev_index: u64, entries: Vec<LogEntry>) -> Result<(), LogError>;
}
