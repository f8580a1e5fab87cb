//! Raft node binary.
//!
//! Runs a single node over the HTTP transport with file-backed persistent
//! state, plus a minimal client submit endpoint.
//!
//! Example for a 3-node cluster:
//!   raft-server --id n1 --listen 127.0.0.1:8001 --data-dir /tmp/raft1 --peers n2=127.0.0.1:8002,n3=127.0.0.1:8003
//!   raft-server --id n2 --listen 127.0.0.1:8002 --data-dir /tmp/raft2 --peers n1=127.0.0.1:8001,n3=127.0.0.1:8003
//!   raft-server --id n3 --listen 127.0.0.1:8003 --data-dir /tmp/raft3 --peers n1=127.0.0.1:8001,n2=127.0.0.1:8002

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing_subscriber::EnvFilter;

use raft_lite::config::RaftConfig;
use raft_lite::error::RaftError;
use raft_lite::log::MemoryLog;
use raft_lite::node::RaftNode;
use raft_lite::state_machine::{StateMachine, TestStateMachine};
use raft_lite::store::FileStore;
use raft_lite::transport::http::{router, HttpTransport};
use raft_lite::transport::Transport;
use raft_lite::NodeId;

struct Args {
    id: NodeId,
    listen: SocketAddr,
    data_dir: String,
    peers: HashMap<NodeId, String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();

    let mut id: Option<NodeId> = None;
    let mut listen: Option<SocketAddr> = None;
    let mut data_dir: Option<String> = None;
    let mut peers: HashMap<NodeId, String> = HashMap::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--id" => {
                id = Some(NodeId::from(args[i + 1].as_str()));
                i += 2;
            }
            "--listen" => {
                listen = Some(args[i + 1].parse().expect("invalid listen address"));
                i += 2;
            }
            "--data-dir" => {
                data_dir = Some(args[i + 1].clone());
                i += 2;
            }
            "--peers" => {
                // Format: n2=127.0.0.1:8002,n3=127.0.0.1:8003
                for peer_spec in args[i + 1].split(',') {
                    let parts: Vec<&str> = peer_spec.split('=').collect();
                    if parts.len() == 2 {
                        peers.insert(NodeId::from(parts[0]), parts[1].to_string());
                    }
                }
                i += 2;
            }
            other => {
                eprintln!("unknown argument: {}", other);
                i += 1;
            }
        }
    }

    Args {
        id: id.expect("--id is required"),
        listen: listen.expect("--listen is required"),
        data_dir: data_dir.expect("--data-dir is required"),
        peers,
    }
}

/// Commands arrive as strings over the demo endpoint.
async fn submit<T: Transport + 'static>(
    State(node): State<RaftNode<T>>,
    Json(commands): Json<Vec<String>>,
) -> Result<StatusCode, (StatusCode, String)> {
    let commands = commands.into_iter().map(|c| c.into_bytes()).collect();
    match node.handle(commands).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(err @ RaftError::NotLeader { .. }) => {
            Err((StatusCode::TEMPORARY_REDIRECT, err.to_string()))
        }
        Err(err) => Err((StatusCode::SERVICE_UNAVAILABLE, err.to_string())),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = parse_args();
    tracing::info!(id = %args.id, listen = %args.listen, peers = ?args.peers, "starting raft node");

    let store = FileStore::new(&args.data_dir).expect("failed to open store");
    let state_machine: Box<dyn StateMachine> = Box::new(TestStateMachine::new());

    let peer_ids: Vec<NodeId> = args.peers.keys().cloned().collect();
    let transport = HttpTransport::new(args.peers, RaftConfig::default().rpc_timeout);

    let node = RaftNode::new(
        args.id,
        peer_ids,
        Box::new(MemoryLog::new()),
        Box::new(store),
        state_machine,
        transport,
        RaftConfig::default(),
    )
    .expect("failed to initialize node");

    let app = router(node.clone()).merge(
        Router::new()
            .route("/client/submit", post(submit::<HttpTransport>))
            .with_state(node.clone()),
    );

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .expect("failed to bind listener");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("http server failed");
    });

    if let Err(err) = node.run().await {
        tracing::error!(%err, "raft node terminated");
        std::process::exit(1);
    }
}
