#![cfg(feature = "bench")]

//! Internal helpers for Criterion benchmarks.
//!
//! These helpers populate a [`Registry`] with connections backed by
//! `tokio::io::DuplexStream`, allowing the benchmarks to exercise the
//! broadcast code paths without binding real sockets. Each connection's peer
//! end is drained by a spawned reader so frame writes complete at full speed.

use std::{net::SocketAddr, sync::Arc};

use futures::StreamExt;
use tokio::io::DuplexStream;
use tokio_tungstenite::{tungstenite::protocol::Role, WebSocketStream};

use crate::{conn::Connection, registry::Registry};

/// Stream type used for in-process benchmarking.
pub type BenchStream = DuplexStream;

/// A registry seeded with mock connections, some of them grouped.
#[derive(Clone)]
pub struct RegistryContext {
    /// Registry instance that benchmarks invoke.
    pub registry: Arc<Registry<BenchStream>>,
}

impl RegistryContext {
    /// Creates a context with `client_count` registered connections.
    pub async fn with_clients(client_count: usize) -> Self {
        let registry = Arc::new(Registry::new());
        for _ in 0..client_count {
            create_client(&registry).await;
        }
        Self { registry }
    }

    /// Creates a context where `member_count` of the connections have joined
    /// `group`.
    pub async fn with_group(group: &str, member_count: usize) -> Self {
        let ctx = Self::with_clients(member_count).await;
        for conn in ctx.registry.all().await {
            ctx.registry
                .join(conn.id(), group)
                .await
                .expect("connection is registered");
        }
        ctx
    }
}

async fn create_client(registry: &Arc<Registry<BenchStream>>) {
    let (stream, peer) = tokio::io::duplex(1024 * 1024);
    let ws_stream = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
    let peer_ws = WebSocketStream::from_raw_socket(peer, Role::Client, None).await;

    // Drain the peer end so writes never stall on a full duplex buffer.
    tokio::spawn(async move {
        let mut peer_ws = peer_ws;
        while let Some(frame) = peer_ws.next().await {
            if frame.is_err() {
                break;
            }
        }
    });

    let addr: SocketAddr = "127.0.0.1:0".parse().expect("valid loopback addr");
    let (conn, reader) = Connection::split(ws_stream, addr);
    // The read half is unused; benchmarks only write.
    drop(reader);
    registry.add_connection(conn).await;
}
