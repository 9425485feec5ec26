//! Persistent WebSocket channel runtime.
//!
//! `gale` turns an upgraded request/response exchange into a long-lived,
//! message-oriented session, runs a per-connection event loop driven by
//! user-supplied callbacks, and keeps a process-wide registry of live
//! connections organized into named groups for selective or full broadcast.
//!
//! ## Components
//!
//! - [`conn::Connection`]: one persistent session. Owns the write half of
//!   the stream behind an exclusive per-connection write lock and exposes a
//!   cancellable lifetime token.
//! - [`registry::Registry`]: the shared directory of live connections plus
//!   group membership, with query and broadcast operations that never hold
//!   the registry lock across socket I/O.
//! - [`channel::Channel`]: the per-connection state machine invoking
//!   `on_connect`, `on_message`, `on_error`, and `on_disconnect` in a fixed
//!   order, with `on_disconnect` guaranteed to run exactly once.
//! - [`serve::ChannelRoute`]: glue between the routing layer's collaborators
//!   (parameter decoding, authentication, upgrade) and the channel runtime,
//!   plus a standalone TCP listener.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gale::{channel::ChannelHandlers, registry::Registry, serve::ChannelRoute};
//! use std::sync::Arc;
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(Registry::new());
//!     let reg = Arc::clone(&registry);
//!
//!     let handlers = ChannelHandlers::<TcpStream, ()>::builder()
//!         .on_message(move |conn, msg, _ctx| {
//!             let registry = Arc::clone(&reg);
//!             async move {
//!                 // Everyone in "lobby" sees every message.
//!                 registry.join(conn.id(), "lobby").await?;
//!                 if let Some(text) = msg.as_text() {
//!                     registry.broadcast_to_group_text("lobby", text).await?;
//!                 }
//!                 Ok(())
//!             }
//!         })
//!         .on_disconnect(|id, _ctx, cause| async move {
//!             match cause {
//!                 Some(cause) => eprintln!("{id} dropped: {cause}"),
//!                 None => eprintln!("{id} left"),
//!             }
//!         })
//!         .build()
//!         .expect("on_message is set");
//!
//!     let route = ChannelRoute::new(handlers, registry);
//!     route.listen(3001, |_addr| ()).await.expect("listen");
//! }
//! ```

pub mod channel;
pub mod conn;
pub mod error;
pub mod registry;
pub mod serve;
pub mod types;

pub mod bench_support;

#[cfg(test)]
mod tests;
