//! HTTP transport for Raft RPC.
//!
//! Uses axum for the server side and reqwest for the client. Bodies are
//! JSON.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use super::{Transport, TransportError};
use crate::node::RaftNode;
use crate::rpc::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
use crate::NodeId;

/// HTTP client side of the Raft RPCs.
pub struct HttpTransport {
    /// Peer addresses, e.g. "127.0.0.1:8001".
    peers: HashMap<NodeId, String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(peers: HashMap<NodeId, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build http client");
        HttpTransport { peers, client }
    }

    async fn call<A, R>(&self, target: &NodeId, path: &str, args: &A) -> Result<R, TransportError>
    where
        A: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let addr = self.peers.get(target).ok_or(TransportError::NodeNotFound)?;
        let url = format!("http://{}{}", addr, path);

        let response = self.client.post(&url).json(args).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::ConnectionFailed
            }
        })?;

        response
            .json::<R>()
            .await
            .map_err(|_| TransportError::ConnectionFailed)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request_vote(
        &self,
        target: &NodeId,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, TransportError> {
        self.call(target, "/raft/request_vote", &args).await
    }

    async fn append_entries(
        &self,
        target: &NodeId,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, TransportError> {
        self.call(target, "/raft/append_entries", &args).await
    }
}

/// Build an axum router dispatching the Raft RPC endpoints into a node's
/// handlers.
pub fn router<T: Transport + 'static>(node: RaftNode<T>) -> Router {
    Router::new()
        .route("/raft/request_vote", post(handle_request_vote::<T>))
        .route("/raft/append_entries", post(handle_append_entries::<T>))
        .with_state(node)
}

async fn handle_request_vote<T: Transport + 'static>(
    State(node): State<RaftNode<T>>,
    Json(args): Json<RequestVoteArgs>,
) -> Result<Json<RequestVoteResult>, StatusCode> {
    node.request_vote(args)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn handle_append_entries<T: Transport + 'static>(
    State(node): State<RaftNode<T>>,
    Json(args): Json<AppendEntriesArgs>,
) -> Result<Json<AppendEntriesResult>, StatusCode> {
    node.append_entries(args)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
