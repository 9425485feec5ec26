//! Shared value types used across the connection, registry, and channel modules.

use std::fmt::Display;

/// A single inbound message delivered to the `on_message` callback.
///
/// WebSocket control frames (ping, pong) never reach handlers; only data
/// frames are surfaced, already decoded into text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    /// A UTF-8 text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

impl MessageData {
    /// Returns the text payload, or `None` for binary frames.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageData::Text(text) => Some(text),
            MessageData::Binary(_) => None,
        }
    }

    /// Consumes the message, returning the payload as raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            MessageData::Text(text) => text.into_bytes(),
            MessageData::Binary(bytes) => bytes,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            MessageData::Text(text) => text.len(),
            MessageData::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for MessageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageData::Text(text) => write!(f, "text({} bytes)", text.len()),
            MessageData::Binary(bytes) => write!(f, "binary({} bytes)", bytes.len()),
        }
    }
}

/// State of a single connection, as visible to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// The stream is upgraded but `on_connect` has not finished yet.
    Connecting,
    /// The connection is registered and its read loop is running.
    Open,
    /// A close has been initiated but not completed.
    Closing,
    /// The connection is closed; writes fail with [`SendError::Closed`].
    ///
    /// [`SendError::Closed`]: crate::error::SendError::Closed
    Closed,
}

/// Lifecycle phase of a channel. Transitions run strictly forward:
/// `Connecting → Connected → Draining → Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// `on_connect` is running (or about to); nothing is registered yet.
    Connecting,
    /// The connection is registered and messages are being delivered.
    Connected,
    /// The read loop has ended; cleanup and `on_disconnect` are in progress.
    Draining,
    /// Terminal. `on_disconnect` has run and the registry entry is gone.
    Disconnected,
}
