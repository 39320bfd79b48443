//! Transport connection to the relay.
//!
//! One persistent bidirectional WebSocket connection. The writer task is
//! the sole owner of the sink half, so per-connection send order is
//! preserved; the reader task terminates the inbound frame sequence when a
//! close frame or socket error is observed; a keepalive task sends a text
//! liveness probe while the connection is open.
//!
//! A connection is never resurrected: once `Closed`, reconnecting means
//! constructing a new `RelayConnection`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectionError, SendError};
use crate::protocol::{CLOSE_TIMEOUT, DEFAULT_KEEPALIVE, KEEPALIVE_PAYLOAD, MAX_FRAME_BYTES};

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Atomically shared connection state. Transitions only move forward
/// through the lifecycle, so `Closed` can never be left again.
pub struct SharedState(AtomicU8);

impl SharedState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Advance to `next` unless the connection is already further along.
    pub fn advance(&self, next: ConnectionState) {
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }

    pub fn is_open(&self) -> bool {
        self.get() == ConnectionState::Open
    }
}

/// Receive buffer bound shared by client and relay sockets.
pub(crate) fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_BYTES);
    config.max_frame_size = Some(MAX_FRAME_BYTES);
    config
}

/// A live connection to the relay.
pub struct RelayConnection {
    state: Arc<SharedState>,
    outbound: mpsc::UnboundedSender<Message>,
    frames: Option<mpsc::UnboundedReceiver<Bytes>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl RelayConnection {
    /// Connect with the default keepalive interval.
    pub async fn connect(url: &str) -> Result<Self, ConnectionError> {
        Self::connect_with(url, DEFAULT_KEEPALIVE).await
    }

    /// Establish the connection and spawn its writer, reader, and
    /// keepalive tasks.
    pub async fn connect_with(url: &str, keepalive: Duration) -> Result<Self, ConnectionError> {
        let (ws, _) = connect_async_with_config(url, Some(ws_config()), false).await?;
        let (mut sink, mut source) = ws.split();

        let state = Arc::new(SharedState::new(ConnectionState::Open));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();

        // Writer task: sole owner of the sink half, drains the outbound
        // queue in order. Stops after sending a close frame.
        let writer_state = state.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!(error = %e, "outbound send failed");
                    writer_state.advance(ConnectionState::Closed);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        // Reader task: pumps inbound binary frames to the consumer and
        // terminates the sequence on close or socket error.
        let reader_state = state.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        if in_tx.send(Bytes::from(data)).is_err() {
                            break; // consumer dropped the sequence
                        }
                    }
                    Ok(Message::Text(text)) => {
                        // Liveness chatter from the peer
                        tracing::trace!(payload = %text, "text message ignored");
                    }
                    Ok(Message::Close(_)) => {
                        reader_state.advance(ConnectionState::Closing);
                        break;
                    }
                    Ok(_) => {} // ping/pong handled by the protocol layer
                    Err(e) => {
                        tracing::debug!(error = %e, "receive failed");
                        break;
                    }
                }
            }
            reader_state.advance(ConnectionState::Closed);
        });

        // Keepalive task: text probe on a fixed interval while open.
        let ka_state = state.clone();
        let ka_tx = out_tx.clone();
        let keepalive_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive);
            ticker.tick().await; // the first tick completes immediately
            loop {
                ticker.tick().await;
                if !ka_state.is_open() {
                    break;
                }
                if ka_tx.send(Message::Text(KEEPALIVE_PAYLOAD.to_string())).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            state,
            outbound: out_tx,
            frames: Some(in_rx),
            writer,
            reader,
            keepalive: keepalive_task,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Enqueue one binary frame for transmission.
    ///
    /// Fails if the connection is not open; a transport failure surfaces
    /// as `Closed` state on a later call rather than unwinding this one.
    pub fn send_binary(&self, payload: Bytes) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        self.outbound
            .send(Message::Binary(payload.to_vec()))
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Take the inbound frame sequence (can only be taken once).
    pub fn frames(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.frames.take()
    }

    /// Graceful close handshake with a bounded timeout, falling back to
    /// an abrupt abort.
    pub async fn disconnect(mut self) {
        self.state.advance(ConnectionState::Closing);
        let _ = self.outbound.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "closing".into(),
        })));

        if tokio::time::timeout(CLOSE_TIMEOUT, &mut self.writer)
            .await
            .is_err()
        {
            self.writer.abort();
        }
        self.reader.abort();
        self.keepalive.abort();
        self.state.advance(ConnectionState::Closed);
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.state.advance(ConnectionState::Closed);
        self.writer.abort();
        self.reader.abort();
        self.keepalive.abort();
    }
}

/// Keep constructing fresh connections until one succeeds or the token is
/// cancelled. Exponential backoff: 1s, 2s, 4s, ... capped at 30s.
pub async fn connect_with_retry(
    url: &str,
    keepalive: Duration,
    cancel: &CancellationToken,
    status: &mpsc::UnboundedSender<String>,
) -> Option<RelayConnection> {
    let mut delay = 1u64;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match RelayConnection::connect_with(url, keepalive).await {
            Ok(conn) => {
                let note = if attempt == 0 {
                    "Connected to relay".to_string()
                } else {
                    format!("Reconnected after {} attempts", attempt)
                };
                let _ = status.send(note);
                return Some(conn);
            }
            Err(e) => {
                attempt += 1;
                let _ = status.send(format!(
                    "Connection failed: {} — retrying in {}s (attempt {})",
                    e, delay, attempt
                ));
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = sleep(Duration::from_secs(delay)) => {}
                }
                delay = (delay * 2).min(30);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_only_moves_forward() {
        let state = SharedState::new(ConnectionState::Connecting);
        state.advance(ConnectionState::Open);
        assert!(state.is_open());

        state.advance(ConnectionState::Closed);
        assert_eq!(state.get(), ConnectionState::Closed);

        // Closed is terminal — an out-of-order transition is ignored
        state.advance(ConnectionState::Open);
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn closing_does_not_regress_from_closed() {
        let state = SharedState::new(ConnectionState::Closed);
        state.advance(ConnectionState::Closing);
        assert_eq!(state.get(), ConnectionState::Closed);
    }
}
