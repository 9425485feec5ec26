//! Per-connection lifecycle: the callback bundle and the state machine that
//! drives it.
//!
//! A [`Channel`] owns one connection for its entire lifetime and walks it
//! through `Connecting → Connected → Draining → Disconnected`, invoking the
//! user callbacks from [`ChannelHandlers`] in a fixed order:
//!
//! 1. `on_connect` (optional). An error skips the message loop entirely.
//! 2. The connection is registered and the read loop starts. Every text or
//!    binary frame invokes `on_message`, strictly in arrival order and never
//!    concurrently for one connection.
//! 3. `on_message` errors are routed through `on_error`, which returns `true`
//!    to keep reading or `false` to stop. A missing `on_error` means stop.
//!    Read failures from the stream are always terminal.
//! 4. On every exit path the connection is deregistered, closed, and
//!    `on_disconnect` runs exactly once, with the terminal cause or `None`
//!    for a clean close. This holds even when a callback panics.
//!
//! Each channel runs on its own task; channels for different connections
//! execute concurrently with one another.

use std::{fmt::Debug, future::Future, net::SocketAddr, panic::AssertUnwindSafe, pin::Pin, sync::Arc};

use futures::{stream::SplitStream, FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    conn::Connection,
    error::{CallbackPanic, ConfigError, HandlerError, SharedHandlerError},
    registry::Registry,
    types::{ChannelState, ConnState, MessageData},
};

/// Boxed future returned by the stored callbacks.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type ConnectFn<T, P, A> = Box<
    dyn Fn(Arc<Connection<T>>, Arc<ChannelContext<P, A>>) -> BoxFuture<Result<(), HandlerError>>
        + Send
        + Sync,
>;
type MessageFn<T, P, A> = Box<
    dyn Fn(
            Arc<Connection<T>>,
            MessageData,
            Arc<ChannelContext<P, A>>,
        ) -> BoxFuture<Result<(), HandlerError>>
        + Send
        + Sync,
>;
type ErrorFn<T> =
    Box<dyn Fn(Arc<Connection<T>>, SharedHandlerError) -> BoxFuture<bool> + Send + Sync>;
type DisconnectFn<P, A> = Box<
    dyn Fn(String, Arc<ChannelContext<P, A>>, Option<SharedHandlerError>) -> BoxFuture<()>
        + Send
        + Sync,
>;

/// Per-connection request context threaded into every callback.
///
/// `params` is the typed value produced by the route's parameter-decoding
/// collaborator. `auth` carries the authenticated principal on authenticated
/// routes and is `None` on unauthenticated ones (where `A` defaults to `()`).
#[derive(Debug)]
pub struct ChannelContext<P, A = ()> {
    /// Route-supplied parameters, decoded before the upgrade.
    pub params: P,
    /// Authenticated principal, present on authenticated routes.
    pub auth: Option<A>,
}

/// The callback bundle for a channel route.
///
/// `on_message` is mandatory; the other three callbacks are optional. Built
/// through [`ChannelHandlers::builder`], which fails at construction time
/// when `on_message` is missing.
///
/// ## Example
///
/// ```rust
/// use gale::channel::ChannelHandlers;
/// use tokio::net::TcpStream;
///
/// let handlers = ChannelHandlers::<TcpStream, ()>::builder()
///     .on_message(|conn, msg, _ctx| async move {
///         if let Some(text) = msg.as_text() {
///             conn.send_text(format!("echo: {text}")).await?;
///         }
///         Ok(())
///     })
///     .build()
///     .expect("on_message is set");
/// # drop(handlers);
/// ```
pub struct ChannelHandlers<T, P, A = ()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    pub(crate) on_connect: Option<ConnectFn<T, P, A>>,
    pub(crate) on_message: MessageFn<T, P, A>,
    pub(crate) on_error: Option<ErrorFn<T>>,
    pub(crate) on_disconnect: Option<DisconnectFn<P, A>>,
}

impl<T, P, A> ChannelHandlers<T, P, A>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    /// Starts building a handler bundle.
    pub fn builder() -> ChannelHandlersBuilder<T, P, A> {
        ChannelHandlersBuilder {
            on_connect: None,
            on_message: None,
            on_error: None,
            on_disconnect: None,
        }
    }
}

/// Builder for [`ChannelHandlers`].
pub struct ChannelHandlersBuilder<T, P, A = ()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    on_connect: Option<ConnectFn<T, P, A>>,
    on_message: Option<MessageFn<T, P, A>>,
    on_error: Option<ErrorFn<T>>,
    on_disconnect: Option<DisconnectFn<P, A>>,
}

impl<T, P, A> ChannelHandlersBuilder<T, P, A>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    /// Called once the stream is upgraded, before the connection is
    /// registered. Returning an error rejects the connection: the message
    /// loop never starts and the channel drains straight to disconnect.
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Connection<T>>, Arc<ChannelContext<P, A>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_connect = Some(Box::new(move |conn, ctx| Box::pin(f(conn, ctx))));
        self
    }

    /// Called for every inbound text or binary frame. Mandatory.
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Connection<T>>, MessageData, Arc<ChannelContext<P, A>>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_message = Some(Box::new(move |conn, msg, ctx| Box::pin(f(conn, msg, ctx))));
        self
    }

    /// Called when `on_message` returns an error. Return `true` to keep the
    /// read loop running, `false` to treat the error as terminal. Without
    /// this callback every `on_message` error is terminal.
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Connection<T>>, SharedHandlerError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.on_error = Some(Box::new(move |conn, err| Box::pin(f(conn, err))));
        self
    }

    /// Called exactly once when the channel ends, on every exit path. The
    /// connection is already deregistered and closed; only its id is passed.
    /// `cause` is `None` for a clean close.
    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(String, Arc<ChannelContext<P, A>>, Option<SharedHandlerError>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_disconnect = Some(Box::new(move |id, ctx, cause| Box::pin(f(id, ctx, cause))));
        self
    }

    /// Validates the bundle. Fails fast with
    /// [`ConfigError::MissingMessageHandler`] when `on_message` was never
    /// set, before any connection is attempted.
    pub fn build(self) -> Result<ChannelHandlers<T, P, A>, ConfigError> {
        let on_message = self.on_message.ok_or(ConfigError::MissingMessageHandler)?;
        Ok(ChannelHandlers {
            on_connect: self.on_connect,
            on_message,
            on_error: self.on_error,
            on_disconnect: self.on_disconnect,
        })
    }
}

/// The per-connection state machine.
///
/// Constructed by the handler adapter from an upgraded stream and consumed by
/// [`Channel::run`], which drives the connection until it disconnects.
pub struct Channel<T, P, A = ()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    conn: Arc<Connection<T>>,
    reader: SplitStream<WebSocketStream<T>>,
    handlers: Arc<ChannelHandlers<T, P, A>>,
    registry: Arc<Registry<T>>,
    ctx: Arc<ChannelContext<P, A>>,
    state: ChannelState,
}

impl<T, P> Channel<T, P, ()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
    P: Send + Sync + 'static,
{
    /// Wraps an upgraded stream for an unauthenticated route.
    pub fn new(
        ws: WebSocketStream<T>,
        addr: SocketAddr,
        handlers: Arc<ChannelHandlers<T, P, ()>>,
        registry: Arc<Registry<T>>,
        params: P,
    ) -> Self {
        Self::assemble(ws, addr, handlers, registry, ChannelContext { params, auth: None })
    }
}

impl<T, P, A> Channel<T, P, A>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
    P: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    /// Wraps an upgraded stream for an authenticated route, threading the
    /// principal produced by the authentication collaborator.
    pub fn with_auth(
        ws: WebSocketStream<T>,
        addr: SocketAddr,
        handlers: Arc<ChannelHandlers<T, P, A>>,
        registry: Arc<Registry<T>>,
        params: P,
        principal: A,
    ) -> Self {
        Self::assemble(
            ws,
            addr,
            handlers,
            registry,
            ChannelContext {
                params,
                auth: Some(principal),
            },
        )
    }

    fn assemble(
        ws: WebSocketStream<T>,
        addr: SocketAddr,
        handlers: Arc<ChannelHandlers<T, P, A>>,
        registry: Arc<Registry<T>>,
        ctx: ChannelContext<P, A>,
    ) -> Self {
        let (conn, reader) = Connection::split(ws, addr);
        Self {
            conn,
            reader,
            handlers,
            registry,
            ctx: Arc::new(ctx),
            state: ChannelState::Connecting,
        }
    }

    /// The connection this channel drives.
    pub fn connection(&self) -> &Arc<Connection<T>> {
        &self.conn
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Drives the connection to completion.
    ///
    /// Runs `on_connect`, the read loop, and the guaranteed disconnect
    /// sequence. Returns when the channel is [`ChannelState::Disconnected`].
    pub async fn run(mut self) {
        debug!(conn_id = %self.conn.id(), addr = %self.conn.addr(), "channel starting");
        let cause = self.drive().await;
        self.shutdown(cause).await;
    }

    /// Connect phase plus read loop. Returns the terminal cause, or `None`
    /// for a clean close.
    async fn drive(&mut self) -> Option<SharedHandlerError> {
        if let Some(on_connect) = &self.handlers.on_connect {
            let fut = on_connect(Arc::clone(&self.conn), Arc::clone(&self.ctx));
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(conn_id = %self.conn.id(), error = %e, "on_connect rejected connection");
                    return Some(SharedHandlerError::from(e));
                }
                Err(payload) => return Some(CallbackPanic::from_payload("on_connect", payload)),
            }
        }

        // Registered only after a successful on_connect, so broadcasts never
        // reach a connection whose connect phase is still running.
        self.state = ChannelState::Connected;
        self.registry.add_connection(Arc::clone(&self.conn)).await;
        self.conn.set_state(ConnState::Open).await;
        info!(conn_id = %self.conn.id(), addr = %self.conn.addr(), "channel connected");

        let lifetime = self.conn.cancellation_token();
        loop {
            let frame = tokio::select! {
                _ = lifetime.cancelled() => return None,
                frame = self.reader.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(cause) = self.dispatch(MessageData::Text(text.to_string())).await {
                        return Some(cause);
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Some(cause) = self.dispatch(MessageData::Binary(bytes.to_vec())).await {
                        return Some(cause);
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Err(e)) => {
                    // Stream-level failure: always terminal, never routed
                    // through on_error.
                    warn!(conn_id = %self.conn.id(), error = %e, "read failed");
                    return Some(Arc::new(e) as SharedHandlerError);
                }
            }
        }
    }

    /// Delivers one message and applies the error policy. Returns the
    /// terminal cause when the loop must stop.
    async fn dispatch(&self, data: MessageData) -> Option<SharedHandlerError> {
        let fut = (self.handlers.on_message)(Arc::clone(&self.conn), data, Arc::clone(&self.ctx));
        let cause: SharedHandlerError = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => return None,
            Ok(Err(e)) => SharedHandlerError::from(e),
            Err(payload) => return Some(CallbackPanic::from_payload("on_message", payload)),
        };

        let Some(on_error) = &self.handlers.on_error else {
            return Some(cause);
        };
        let decide = on_error(Arc::clone(&self.conn), Arc::clone(&cause));
        match AssertUnwindSafe(decide).catch_unwind().await {
            Ok(true) => {
                debug!(conn_id = %self.conn.id(), error = %cause, "on_error resumed the loop");
                None
            }
            Ok(false) => Some(cause),
            Err(payload) => Some(CallbackPanic::from_payload("on_error", payload)),
        }
    }

    /// Guaranteed disconnect sequence: deregister, close, `on_disconnect`.
    /// Runs on every exit path, including callback panics.
    async fn shutdown(&mut self, cause: Option<SharedHandlerError>) {
        self.state = ChannelState::Draining;
        self.registry.remove_connection(self.conn.id()).await;
        self.conn.close().await;

        if let Some(on_disconnect) = &self.handlers.on_disconnect {
            let fut = on_disconnect(
                self.conn.id().to_string(),
                Arc::clone(&self.ctx),
                cause.clone(),
            );
            if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
                warn!(conn_id = %self.conn.id(), "on_disconnect panicked");
            }
        }

        self.state = ChannelState::Disconnected;
        match &cause {
            Some(cause) => info!(conn_id = %self.conn.id(), cause = %cause, "channel closed"),
            None => info!(conn_id = %self.conn.id(), "channel closed"),
        }
    }
}
