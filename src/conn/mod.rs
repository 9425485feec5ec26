//! A single persistent WebSocket session.
//!
//! [`Connection`] owns the write half of an upgraded stream behind a
//! per-connection write lock, a process-unique id, and a cancellable lifetime
//! token. Connections are created by the channel runtime when a stream is
//! upgraded and handed to handlers as `Arc<Connection<T>>`; the read half
//! stays with the channel's message loop. See `channel::Channel` for where
//! connections are produced and `registry::Registry` for where they are
//! looked up.

use std::{fmt::Debug, net::SocketAddr, sync::Arc};

use futures::{stream::SplitSink, stream::SplitStream, SinkExt, StreamExt};
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::{error::SendError, types::ConnState};

/// Write half of the WebSocket stream, shared behind the connection's
/// exclusive write lock.
pub(crate) type SinkHalf<T> = Arc<Mutex<SplitSink<WebSocketStream<T>, Message>>>;

/// A live, bidirectional session with one peer.
///
/// At most one in-flight write proceeds at a time per connection; once the
/// lifetime token is cancelled the underlying stream is closed and further
/// writes fail with [`SendError::Closed`] instead of blocking.
///
/// ## Example
///
/// ```rust
/// use gale::conn::Connection;
/// use tokio::net::TcpStream;
///
/// async fn greet(conn: &Connection<TcpStream>) {
///     let _ = conn.send_text("welcome").await;
/// }
/// ```
#[derive(Debug)]
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    /// Process-unique identifier, assigned at creation and never reused
    /// while the connection is live.
    id: String,

    /// The write half of the upgraded stream.
    writer: SinkHalf<T>,

    /// The remote address of the connection.
    addr: SocketAddr,

    state: Arc<Mutex<ConnState>>,

    /// Cancellable lifetime handle; cancelled exactly once, on close.
    cancel: CancellationToken,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    /// Splits an upgraded stream into a connection and its read half.
    ///
    /// The read half is driven by the channel's message loop; everything
    /// write-shaped goes through the returned connection.
    pub(crate) fn split(
        ws: WebSocketStream<T>,
        addr: SocketAddr,
    ) -> (Arc<Self>, SplitStream<WebSocketStream<T>>) {
        let (writer, reader) = ws.split();
        let conn = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            writer: Arc::new(Mutex::new(writer)),
            addr,
            state: Arc::new(Mutex::new(ConnState::Connecting)),
            cancel: CancellationToken::new(),
        });
        (conn, reader)
    }

    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the remote address of this connection.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnState {
        *self.state.lock().await
    }

    pub(crate) async fn set_state(&self, next: ConnState) {
        let mut state = self.state.lock().await;
        *state = next;
    }

    /// Returns the cancellable lifetime handle for this connection.
    ///
    /// The token is cancelled when the connection closes, whatever the
    /// reason. Long-running application logic inside a callback can observe
    /// it to stop work that no longer has a recipient:
    ///
    /// ```rust
    /// use gale::conn::Connection;
    /// use tokio::net::TcpStream;
    ///
    /// async fn pump(conn: &Connection<TcpStream>) {
    ///     let lifetime = conn.cancellation_token();
    ///     loop {
    ///         tokio::select! {
    ///             _ = lifetime.cancelled() => break,
    ///             _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
    ///                 let _ = conn.send_text("tick").await;
    ///             }
    ///         }
    ///     }
    /// }
    /// ```
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns `true` once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sends a UTF-8 text frame to the peer.
    ///
    /// Fails with [`SendError::Closed`] when the connection has been closed,
    /// without waiting on the write lock.
    pub async fn send_text<S>(&self, text: S) -> Result<(), SendError>
    where
        S: Into<String>,
    {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let text: String = text.into();
        let mut writer = self.writer.lock().await;
        writer.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Sends a binary frame to the peer.
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(Message::Binary(data.into())).await?;
        Ok(())
    }

    /// Serializes `value` as JSON and sends it as a text frame.
    ///
    /// Serialization happens before the write lock is acquired; an
    /// unencodable value fails with [`SendError::Encode`] without touching
    /// the wire.
    pub async fn send_json<V>(&self, value: &V) -> Result<(), SendError>
    where
        V: Serialize + ?Sized,
    {
        let json = serde_json::to_string(value)?;
        self.send_text(json).await
    }

    /// Closes the connection.
    ///
    /// Sends a close frame, shuts the stream down, and cancels the lifetime
    /// token. Safe to call any number of times; calls after the first are
    /// no-ops. Transport errors while closing are logged and swallowed, since
    /// a peer that is already gone is indistinguishable from a clean close.
    pub async fn close(&self) {
        {
            // The state mutex is the gate: exactly one caller moves the
            // connection into Closing and performs the shutdown.
            let mut state = self.state.lock().await;
            if matches!(*state, ConnState::Closing | ConnState::Closed) {
                return;
            }
            *state = ConnState::Closing;
        }
        self.cancel.cancel();
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!(conn_id = %self.id, error = %e, "close frame not delivered");
            }
            if let Err(e) = writer.close().await {
                debug!(conn_id = %self.id, error = %e, "stream shutdown failed");
            }
        }
        self.set_state(ConnState::Closed).await;
        debug!(conn_id = %self.id, "connection closed");
    }
}
