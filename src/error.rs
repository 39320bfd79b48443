//! Error types for the streaming pipeline.
//!
//! Every per-tick and per-target failure is typed and recoverable — errors
//! are caught at the smallest owning scope and reported, never allowed to
//! unwind past the loop that observed them.

use thiserror::Error;

/// The frame source failed to produce a frame this tick.
///
/// Never fatal: the sampling loop reports it and tries again next tick.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No capture device is available at all.
    #[error("no capture device: {0}")]
    NoDevice(String),

    /// The device exists but this capture attempt failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The source produced pixels but encoding them failed.
    #[error("frame encode failed: {0}")]
    Encode(String),

    /// Nothing was ready in time this tick.
    #[error("no frame ready")]
    NotReady,
}

/// Connect, receive, or transport-level failure on a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection is closed; the handle is inert.
    #[error("connection closed")]
    Closed,

    /// The connect attempt did not complete.
    #[error("connect failed: {0}")]
    Connect(String),
}

/// One send to one target failed.
///
/// Logged per target; never aborts sibling sends or the sender's loop.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is not in the Open state.
    #[error("connection not open")]
    NotOpen,

    /// The underlying transport rejected the message.
    #[error("transport send failed: {0}")]
    Transport(String),

    /// The writer task is gone (connection torn down mid-send).
    #[error("writer channel closed")]
    ChannelClosed,
}

/// A malformed or oversized inbound message.
///
/// The message is dropped; the connection stays open unless the transport
/// itself is broken.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Binary message larger than the configured receive bound.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl From<tokio_tungstenite::tungstenite::Error> for SendError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SendError::Transport(e.to_string())
    }
}
