//! Transport abstraction for Raft RPC communication.
//!
//! The contract is at-most-once delivery per call with independent per-call
//! failure; no ordering across calls is required. Implementations apply
//! their own per-call timeout, which should not exceed the heartbeat
//! interval.

use async_trait::async_trait;
use thiserror::Error;

use crate::rpc::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
use crate::NodeId;

pub mod http;
pub mod inmemory;

pub use http::HttpTransport;
pub use inmemory::InMemoryTransport;

/// Errors that can occur during transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the target node failed.
    #[error("connection to peer failed")]
    ConnectionFailed,
    /// The call timed out.
    #[error("rpc timed out")]
    Timeout,
    /// No address is known for the target node.
    #[error("peer not found")]
    NodeNotFound,
}

/// Client side of the two Raft RPCs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a RequestVote RPC to a peer node.
    async fn request_vote(
        &self,
        target: &NodeId,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, TransportError>;

    /// Send an AppendEntries RPC to a peer node.
    async fn append_entries(
        &self,
        target: &NodeId,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, TransportError>;
}
