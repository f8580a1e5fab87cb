//! In-memory transport for tests.
//!
//! Calls travel over per-node mpsc channels; each node runs a pump that
//! dispatches incoming requests into its RPC handlers. An optional per-call
//! timeout simulates unreachable peers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Transport, TransportError};
use crate::node::RaftNode;
use crate::rpc::{AppendEntriesArgs, AppendEntriesResult, RequestVoteArgs, RequestVoteResult};
use crate::NodeId;

/// Request types that can be sent to a node.
pub enum Request {
    RequestVote {
        args: RequestVoteArgs,
        reply: oneshot::Sender<RequestVoteResult>,
    },
    AppendEntries {
        args: AppendEntriesArgs,
        reply: oneshot::Sender<AppendEntriesResult>,
    },
}

/// In-memory transport that uses channels for communication.
pub struct InMemoryTransport {
    senders: HashMap<NodeId, mpsc::Sender<Request>>,
    timeout: Option<Duration>,
}

impl InMemoryTransport {
    pub fn new(senders: HashMap<NodeId, mpsc::Sender<Request>>) -> Self {
        Self {
            senders,
            timeout: None,
        }
    }

    pub fn with_timeout(
        senders: HashMap<NodeId, mpsc::Sender<Request>>,
        timeout: Duration,
    ) -> Self {
        Self {
            senders,
            timeout: Some(timeout),
        }
    }

    async fn deliver<R>(
        &self,
        target: &NodeId,
        request: Request,
        reply_rx: oneshot::Receiver<R>,
    ) -> Result<R, TransportError> {
        let sender = self
            .senders
            .get(target)
            .ok_or(TransportError::NodeNotFound)?;
        sender
            .send(request)
            .await
            .map_err(|_| TransportError::ConnectionFailed)?;

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply_rx)
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|_| TransportError::ConnectionFailed),
            None => reply_rx.await.map_err(|_| TransportError::ConnectionFailed),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn request_vote(
        &self,
        target: &NodeId,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteResult, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.deliver(
            target,
            Request::RequestVote {
                args,
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }

    async fn append_entries(
        &self,
        target: &NodeId,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesResult, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.deliver(
            target,
            Request::AppendEntries {
                args,
                reply: reply_tx,
            },
            reply_rx,
        )
        .await
    }
}

/// Receiving end of a node's request channel.
pub struct NodeHandle {
    receiver: mpsc::Receiver<Request>,
}

impl NodeHandle {
    /// Dispatch one incoming request into the node's handlers. Returns
    /// false once the channel is closed.
    pub async fn process_one(&mut self, node: &RaftNode<InMemoryTransport>) -> bool {
        match self.receiver.recv().await {
            Some(request) => {
                dispatch(request, node).await;
                true
            }
            None => false,
        }
    }

    /// Spawn a pump dispatching requests until the node stops or the
    /// channel closes. This is the "RPC server listener" of the in-memory
    /// transport.
    pub fn serve(mut self, node: RaftNode<InMemoryTransport>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = node.done() => return,
                    request = self.receiver.recv() => match request {
                        Some(request) => dispatch(request, &node).await,
                        None => return,
                    }
                }
            }
        })
    }
}

async fn dispatch(request: Request, node: &RaftNode<InMemoryTransport>) {
    match request {
        Request::RequestVote { args, reply } => match node.request_vote(args).await {
            Ok(result) => {
                let _ = reply.send(result);
            }
            Err(err) => tracing::warn!(id = %node.id(), %err, "request vote handler failed"),
        },
        Request::AppendEntries { args, reply } => match node.append_entries(args).await {
            Ok(result) => {
                let _ = reply.send(result);
            }
            Err(err) => tracing::warn!(id = %node.id(), %err, "append entries handler failed"),
        },
    }
}

/// Create transports and request pumps for a cluster of nodes.
pub fn create_cluster(
    node_ids: &[NodeId],
) -> (HashMap<NodeId, InMemoryTransport>, HashMap<NodeId, NodeHandle>) {
    create_cluster_with_timeout(node_ids, None)
}

/// Create transports and request pumps with an optional per-call timeout.
pub fn create_cluster_with_timeout(
    node_ids: &[NodeId],
    timeout: Option<Duration>,
) -> (HashMap<NodeId, InMemoryTransport>, HashMap<NodeId, NodeHandle>) {
    let mut senders: HashMap<NodeId, mpsc::Sender<Request>> = HashMap::new();
    let mut handles: HashMap<NodeId, NodeHandle> = HashMap::new();

    for id in node_ids {
        let (tx, rx) = mpsc::channel(32);
        senders.insert(id.clone(), tx);
        handles.insert(id.clone(), NodeHandle { receiver: rx });
    }

    let mut transports: HashMap<NodeId, InMemoryTransport> = HashMap::new();
    for id in node_ids {
        let other_senders: HashMap<NodeId, mpsc::Sender<Request>> = senders
            .iter()
            .filter(|(peer, _)| *peer != id)
            .map(|(peer, tx)| (peer.clone(), tx.clone()))
            .collect();
        let transport = match timeout {
            Some(t) => InMemoryTransport::with_timeout(other_senders, t),
            None => InMemoryTransport::new(other_senders),
        };
        transports.insert(id.clone(), transport);
    }

    (transports, handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn call_to_unprocessed_peer_times_out() {
        let ids = vec![NodeId::from("a"), NodeId::from("b")];
        let (mut transports, _handles) =
            create_cluster_with_timeout(&ids, Some(Duration::from_millis(100)));

        let transport = transports.remove(&NodeId::from("a")).unwrap();
        let args = RequestVoteArgs {
            term: 1,
            candidate_id: NodeId::from("a"),
            last_log_index: 0,
            last_log_term: 0,
        };

        let result = transport.request_vote(&NodeId::from("b"), args).await;
        assert_eq!(result.unwrap_err(), TransportError::Timeout);
    }

    #[tokio::test]
    async fn unknown_peer_is_rejected() {
        let ids = vec![NodeId::from("a")];
        let (mut transports, _handles) = create_cluster(&ids);

        let transport = transports.remove(&NodeId::from("a")).unwrap();
        let args = RequestVoteArgs {
            term: 1,
            candidate_id: NodeId::from("a"),
            last_log_index: 0,
            last_log_term: 0,
        };

        let result = transport.request_vote(&NodeId::from("zz"), args).await;
        assert_eq!(result.unwrap_err(), TransportError::NodeNotFound);
    }
}
