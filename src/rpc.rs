//! Wire types for the two Raft RPCs.
//!
//! The transport carries these structs verbatim; encoding is
//! transport-specific.

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::NodeId;

/// RequestVote RPC arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    /// Candidate's term
    pub term: u64,
    /// Candidate requesting the vote
    pub candidate_id: NodeId,
    /// Index of the candidate's last log entry
    pub last_log_index: u64,
    /// Term of the candidate's last log entry
    pub last_log_term: u64,
}

/// RequestVote RPC results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResult {
    /// Current term, for the candidate to update itself
    pub term: u64,
    /// True means the candidate received the vote
    pub vote_granted: bool,
}

/// AppendEntries RPC arguments. Empty `entries` is a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    /// Leader's term
    pub term: u64,
    /// Leader's ID, so followers can redirect clients
    pub leader_id: NodeId,
    /// Index of the log entry immediately preceding the new ones
    pub prev_log_index: u64,
    /// Term of the entry at `prev_log_index`
    pub prev_log_term: u64,
    /// Entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit index
    pub leader_commit: u64,
}

/// AppendEntries RPC results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResult {
    /// Current term, for the leader to update itself
    pub term: u64,
    /// True if the follower contained an entry matching `prev_log_index`
    /// and `prev_log_term`
    pub success: bool,
}
