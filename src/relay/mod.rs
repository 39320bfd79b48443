//! Broadcast relay server.
//!
//! Accepts WebSocket connections on a fixed path and fans every inbound
//! binary frame out to all other open connections. Runs until the process
//! is terminated; one peer's failure never affects the rest.

pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{future, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

use crate::client::ws_config;
use crate::config::RelayConfig;
use crate::error::{ConnectionError, ProtocolError, SendError};
use crate::protocol::{KEEPALIVE_PAYLOAD, WS_PATH};
use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, FrameSink};

/// Fans one payload out to every other open connection.
///
/// Best-effort and partial-failure-tolerant: each per-target send failure
/// is logged with the target's identifier and never cancels sibling sends
/// or the sender's receive loop.
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
    echo_to_sender: bool,
}

impl BroadcastHub {
    pub fn new(registry: Arc<ConnectionRegistry>, echo_to_sender: bool) -> Self {
        Self {
            registry,
            echo_to_sender,
        }
    }

    /// Send `payload` to every open connection other than the sender
    /// (or including it, when echo is enabled). Returns after all
    /// per-target sends have completed or failed; reports the number
    /// delivered.
    pub async fn broadcast(&self, payload: Bytes, sender: ConnectionId) -> usize {
        let excluding = if self.echo_to_sender {
            None
        } else {
            Some(sender)
        };
        let targets = self.registry.active(excluding).await;

        let sends = targets.iter().map(|target| {
            let payload = payload.clone();
            async move { (target.id(), target.send_binary(payload).await) }
        });

        let mut delivered = 0;
        for (id, result) in future::join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(conn = %id, error = %e, "fan-out send failed"),
            }
        }

        tracing::debug!(delivered, targets = targets.len(), "broadcast complete");
        delivered
    }
}

/// The relay process: listener, registry, and hub.
pub struct RelayServer {
    listener: TcpListener,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    hub: Arc<BroadcastHub>,
    config: RelayConfig,
}

impl RelayServer {
    pub async fn bind(config: RelayConfig) -> Result<Self, ConnectionError> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| ConnectionError::Connect(format!("bind {}: {}", config.listen, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(BroadcastHub::new(registry.clone(), config.echo_to_sender));

        Ok(Self {
            listener,
            addr,
            registry,
            hub,
            config,
        })
    }

    /// Address actually bound (resolves an OS-assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until the process is terminated. A failed
    /// accept or handshake never takes the relay down.
    pub async fn run(self) -> Result<(), ConnectionError> {
        tracing::info!(addr = %self.addr, echo = self.config.echo_to_sender, "relay started");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let registry = self.registry.clone();
            let hub = self.hub.clone();
            let keepalive = self.config.keepalive();
            let max_frame_bytes = self.config.max_frame_bytes;

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, registry, hub, keepalive, max_frame_bytes).await
                {
                    // Non-WebSocket connections (bots, port scanners) end
                    // up here too; keep them quiet
                    tracing::debug!(peer = %peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

/// Sink half of an accepted socket behind its own lock, so fan-out sends
/// to different targets proceed concurrently.
struct WsFrameSink {
    writer: Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_binary(&self, payload: Bytes) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Binary(payload.to_vec()))
            .await
            .map_err(SendError::from)
    }

    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text.to_string()))
            .await
            .map_err(SendError::from)
    }

    async fn close(&self) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "closing".into(),
            })))
            .await
            .map_err(SendError::from)
    }
}

/// Upgrade, register, serve, and tear down one connection.
async fn handle_connection(
    stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
    hub: Arc<BroadcastHub>,
    keepalive: Duration,
    max_frame_bytes: usize,
) -> Result<(), ConnectionError> {
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == WS_PATH {
            Ok(response)
        } else {
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };

    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config())).await?;
    let (writer, reader) = ws.split();

    let conn = registry
        .add(Box::new(WsFrameSink {
            writer: Mutex::new(writer),
        }))
        .await;
    let id = conn.id();
    let total = registry.len().await;
    tracing::info!(conn = %id, total = total, "connection accepted");

    let keepalive_task = tokio::spawn(keepalive_loop(conn.clone(), keepalive));
    let result = receive_loop(reader, conn.clone(), &hub, max_frame_bytes).await;

    // Teardown happens exactly once, on every exit path of the receive
    // loop: retire the keepalive, remove the identifier, close the socket
    // (errors from an already-broken one are ignored).
    keepalive_task.abort();
    registry.remove(id).await;
    conn.close().await;
    let remaining = registry.len().await;
    tracing::info!(conn = %id, remaining = remaining, "connection closed");

    result
}

/// Liveness probe on a fixed interval while the connection is open.
async fn keepalive_loop(conn: Arc<ConnectionHandle>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        if !conn.is_open() {
            break;
        }
        if let Err(e) = conn.send_text(KEEPALIVE_PAYLOAD).await {
            tracing::debug!(conn = %conn.id(), error = %e, "keepalive probe failed");
            conn.begin_close();
            break;
        }
    }
}

/// Pump inbound messages: binary frames are broadcast, text is control
/// chatter, close or a socket error ends the loop.
async fn receive_loop(
    mut reader: SplitStream<WebSocketStream<TcpStream>>,
    conn: Arc<ConnectionHandle>,
    hub: &BroadcastHub,
    max_frame_bytes: usize,
) -> Result<(), ConnectionError> {
    while let Some(msg) = reader.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                if data.len() > max_frame_bytes {
                    let err = ProtocolError::FrameTooLarge {
                        size: data.len(),
                        max: max_frame_bytes,
                    };
                    tracing::warn!(conn = %conn.id(), error = %err, "dropping frame");
                    continue;
                }
                tracing::debug!(conn = %conn.id(), bytes = data.len(), "frame received");
                hub.broadcast(Bytes::from(data), conn.id()).await;
            }
            Ok(Message::Text(text)) => {
                // Liveness probes and other control chatter — never broadcast
                tracing::debug!(conn = %conn.id(), payload = %text, "text message");
            }
            Ok(Message::Close(_)) => {
                conn.begin_close();
                return Ok(());
            }
            Ok(_) => {} // ping/pong handled by the protocol layer
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::registry::tests::NullSink;
    use super::*;

    /// Sink that records delivered payloads, or fails every send.
    struct TestSink {
        sent: Arc<StdMutex<Vec<Bytes>>>,
        fail: bool,
    }

    impl TestSink {
        fn recording() -> (Self, Arc<StdMutex<Vec<Bytes>>>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    sent: sent.clone(),
                    fail: false,
                },
                sent,
            )
        }

        fn failing() -> Self {
            Self {
                sent: Arc::new(StdMutex::new(Vec::new())),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl FrameSink for TestSink {
        async fn send_binary(&self, payload: Bytes) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Transport("wire unplugged".into()));
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }

        async fn send_text(&self, _text: &str) -> Result<(), SendError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fan_out_survives_partial_failure() {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = BroadcastHub::new(registry.clone(), false);

        let (sink_a, sent_a) = TestSink::recording();
        let _a = registry.add(Box::new(sink_a)).await;
        let _b = registry.add(Box::new(TestSink::failing())).await;
        let (sink_c, sent_c) = TestSink::recording();
        let _c = registry.add(Box::new(sink_c)).await;
        let sender = registry.add(Box::new(NullSink)).await;

        let payload = Bytes::from_static(b"frame");
        let delivered = hub.broadcast(payload.clone(), sender.id()).await;

        // B's failure aborts neither sibling send
        assert_eq!(delivered, 2);
        assert_eq!(sent_a.lock().unwrap().as_slice(), &[payload.clone()]);
        assert_eq!(sent_c.lock().unwrap().as_slice(), &[payload]);
    }

    #[tokio::test]
    async fn sender_is_excluded_unless_echo_enabled() {
        let registry = Arc::new(ConnectionRegistry::new());

        let (sink_s, sent_s) = TestSink::recording();
        let sender = registry.add(Box::new(sink_s)).await;
        let (sink_other, sent_other) = TestSink::recording();
        let _other = registry.add(Box::new(sink_other)).await;

        let quiet = BroadcastHub::new(registry.clone(), false);
        quiet
            .broadcast(Bytes::from_static(b"one"), sender.id())
            .await;
        assert!(sent_s.lock().unwrap().is_empty());
        assert_eq!(sent_other.lock().unwrap().len(), 1);

        let echoing = BroadcastHub::new(registry.clone(), true);
        echoing
            .broadcast(Bytes::from_static(b"two"), sender.id())
            .await;
        assert_eq!(sent_s.lock().unwrap().len(), 1);
        assert_eq!(sent_other.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn closed_connections_receive_nothing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = BroadcastHub::new(registry.clone(), false);

        let (sink_open, sent_open) = TestSink::recording();
        let _open = registry.add(Box::new(sink_open)).await;
        let (sink_closed, sent_closed) = TestSink::recording();
        let closing = registry.add(Box::new(sink_closed)).await;
        let sender = registry.add(Box::new(NullSink)).await;

        closing.begin_close();
        let delivered = hub
            .broadcast(Bytes::from_static(b"frame"), sender.id())
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(sent_open.lock().unwrap().len(), 1);
        assert!(sent_closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcast_with_no_other_peers_is_a_no_op() {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = BroadcastHub::new(registry.clone(), false);
        let sender = registry.add(Box::new(NullSink)).await;

        let delivered = hub.broadcast(Bytes::from_static(b"frame"), sender.id()).await;
        assert_eq!(delivered, 0);
    }
}
