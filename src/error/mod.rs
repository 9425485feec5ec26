//! Error types for the channel runtime.
//!
//! Every failure mode has its own type so callers can match on what actually
//! went wrong: per-connection write failures ([`SendError`]), registry lookups
//! ([`RegistryError`]), partial broadcast delivery ([`BroadcastError`]),
//! handler configuration mistakes ([`ConfigError`]), and pre-upgrade request
//! rejections ([`ServeError`]).

use thiserror::Error;

/// An error returned by a user-supplied callback.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A terminal cause shared between the error policy and `on_disconnect`.
pub type SharedHandlerError = std::sync::Arc<dyn std::error::Error + Send + Sync>;

/// A write to a single connection failed.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection was closed before the write was attempted.
    #[error("connection is closed")]
    Closed,

    /// JSON serialization failed. Raised before the write lock is taken and
    /// before any bytes hit the wire.
    #[error("failed to encode JSON payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The underlying WebSocket transport rejected the frame.
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A registry operation referenced a connection that is not registered.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No connection with this id is currently in the registry.
    #[error("connection {0} is not registered")]
    ConnectionNotFound(String),
}

/// Aggregate result of a broadcast where some recipients failed.
///
/// Delivery to the successful recipients is not rolled back; the caller
/// decides whether a partial delivery is worth logging, alerting, or ignoring.
#[derive(Debug, Error)]
#[error("broadcast failed for {failed} of {total} recipients")]
pub struct BroadcastError {
    /// Number of recipients whose write failed.
    pub failed: usize,
    /// Number of recipients the broadcast targeted.
    pub total: usize,
    /// Connection id and error for each failed recipient.
    pub failures: Vec<(String, SendError)>,
}

/// The handler bundle was constructed incorrectly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Every channel needs an `on_message` callback; building without one
    /// fails here rather than at the first connection.
    #[error("channel handlers require an on_message callback")]
    MissingMessageHandler,
}

/// A request was rejected before (or during) the protocol upgrade.
///
/// These are the only channel failures that can still be communicated to the
/// peer over the original request/response exchange. Once the upgrade has
/// completed, failures are local to the connection and it simply closes.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The parameter-decoding collaborator rejected the request.
    #[error("failed to decode route params: {0}")]
    Decode(#[source] HandlerError),

    /// The authentication collaborator rejected the request.
    #[error("authentication failed: {0}")]
    Auth(#[source] HandlerError),

    /// The upgrade collaborator failed to produce a connection.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[source] HandlerError),

    /// The standalone listener could not bind its port.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// A user callback panicked instead of returning an error.
///
/// The panic is caught so the disconnect guarantee still holds; this type
/// carries the panic message as the terminal cause handed to `on_disconnect`.
#[derive(Debug, Error)]
#[error("{stage} callback panicked: {message}")]
pub struct CallbackPanic {
    /// Which callback panicked (`on_connect`, `on_message`, `on_error`).
    pub stage: &'static str,
    /// The panic payload, when it was a string.
    pub message: String,
}

impl CallbackPanic {
    pub(crate) fn from_payload(
        stage: &'static str,
        payload: Box<dyn std::any::Any + Send>,
    ) -> SharedHandlerError {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        std::sync::Arc::new(CallbackPanic { stage, message })
    }
}
