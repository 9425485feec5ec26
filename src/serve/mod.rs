//! Glue between the request-routing layer and the channel runtime.
//!
//! A [`ChannelRoute`] pairs a handler bundle with the shared registry. The
//! routing layer hands it a request plus the collaborator closures (parameter
//! decoding, authentication, protocol upgrade); the route rejects the request
//! with the collaborator's error *before* the upgrade is attempted, because
//! once the stream is upgraded no request/response-style error can reach the
//! peer anymore. On success it constructs a [`Channel`] and drives the
//! connection to completion.
//!
//! For running without an HTTP framework, [`ChannelRoute::listen`] provides a
//! plain TCP accept loop that performs the WebSocket handshake itself.

use std::{fmt::Debug, future::Future, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{info, warn};

use crate::{
    channel::{Channel, ChannelHandlers},
    error::{HandlerError, ServeError},
    registry::Registry,
};

/// One channel endpoint: a handler bundle plus the process-wide registry.
///
/// ## Example
///
/// ```rust,no_run
/// use gale::{channel::ChannelHandlers, registry::Registry, serve::ChannelRoute};
/// use std::sync::Arc;
/// use tokio::net::TcpStream;
///
/// #[tokio::main]
/// async fn main() {
///     let handlers = ChannelHandlers::<TcpStream, std::net::SocketAddr>::builder()
///         .on_message(|conn, msg, _ctx| async move {
///             if let Some(text) = msg.as_text() {
///                 conn.send_text(format!("echo: {text}")).await?;
///             }
///             Ok(())
///         })
///         .build()
///         .expect("on_message is set");
///
///     let route = ChannelRoute::new(handlers, Arc::new(Registry::new()));
///     route.listen(3001, |addr| addr).await.expect("listen");
/// }
/// ```
pub struct ChannelRoute<T, P, A = ()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    handlers: Arc<ChannelHandlers<T, P, A>>,
    registry: Arc<Registry<T>>,
}

impl<T, P, A> ChannelRoute<T, P, A>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
    P: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    /// Creates a route from a validated handler bundle and the shared
    /// registry.
    pub fn new(handlers: ChannelHandlers<T, P, A>, registry: Arc<Registry<T>>) -> Self {
        Self {
            handlers: Arc::new(handlers),
            registry,
        }
    }

    /// The registry this route registers connections into.
    pub fn registry(&self) -> &Arc<Registry<T>> {
        &self.registry
    }

    /// Serves one authenticated request.
    ///
    /// Collaborators run in order: `decode` produces the typed params,
    /// `authenticate` produces the principal, and only then does `upgrade`
    /// consume the request. A failure in either of the first two rejects the
    /// request before any socket work begins. After the upgrade the channel
    /// runs to completion on the calling task.
    pub async fn serve_with_auth<R, D, Au, U, Fut>(
        &self,
        request: R,
        addr: SocketAddr,
        decode: D,
        authenticate: Au,
        upgrade: U,
    ) -> Result<(), ServeError>
    where
        D: FnOnce(&R) -> Result<P, HandlerError>,
        Au: FnOnce(&R) -> Result<A, HandlerError>,
        U: FnOnce(R) -> Fut,
        Fut: Future<Output = Result<WebSocketStream<T>, HandlerError>>,
    {
        let params = decode(&request).map_err(ServeError::Decode)?;
        let principal = authenticate(&request).map_err(ServeError::Auth)?;
        let ws = upgrade(request).await.map_err(ServeError::Upgrade)?;

        Channel::with_auth(
            ws,
            addr,
            Arc::clone(&self.handlers),
            Arc::clone(&self.registry),
            params,
            principal,
        )
        .run()
        .await;
        Ok(())
    }
}

impl<T, P> ChannelRoute<T, P, ()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
    P: Send + Sync + 'static,
{
    /// Serves one unauthenticated request: decode params, upgrade, run.
    ///
    /// Decoding failures reject the request before the upgrade is attempted.
    pub async fn serve<R, D, U, Fut>(
        &self,
        request: R,
        addr: SocketAddr,
        decode: D,
        upgrade: U,
    ) -> Result<(), ServeError>
    where
        D: FnOnce(&R) -> Result<P, HandlerError>,
        U: FnOnce(R) -> Fut,
        Fut: Future<Output = Result<WebSocketStream<T>, HandlerError>>,
    {
        let params = decode(&request).map_err(ServeError::Decode)?;
        let ws = upgrade(request).await.map_err(ServeError::Upgrade)?;

        Channel::new(
            ws,
            addr,
            Arc::clone(&self.handlers),
            Arc::clone(&self.registry),
            params,
        )
        .run()
        .await;
        Ok(())
    }
}

impl<P> ChannelRoute<TcpStream, P, ()>
where
    P: Send + Sync + 'static,
{
    /// Standalone accept loop for running the route without a surrounding
    /// HTTP framework.
    ///
    /// Binds the port, performs the WebSocket handshake on every accepted
    /// stream, and spawns one channel task per connection. `params_for`
    /// stands in for the parameter-decoding collaborator, deriving the
    /// params value from the peer address. Handshake failures are logged and
    /// the stream is dropped.
    pub async fn listen<F>(&self, port: u16, params_for: F) -> Result<(), ServeError>
    where
        F: Fn(SocketAddr) -> P + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        info!(port, "channel route listening");

        while let Ok((stream, addr)) = listener.accept().await {
            let handlers = Arc::clone(&self.handlers);
            let registry = Arc::clone(&self.registry);
            let params = params_for(addr);
            tokio::spawn(async move {
                match accept_async(stream).await {
                    Ok(ws) => Channel::new(ws, addr, handlers, registry, params).run().await,
                    Err(e) => warn!(%addr, error = %e, "websocket handshake failed"),
                }
            });
        }

        Ok(())
    }
}
