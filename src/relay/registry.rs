//! Connection registry.
//!
//! Maps process-unique identifiers to live connections. Identifiers are
//! random and never reused; removal from the registry is the single
//! authoritative point after which an identifier is inert. The registry
//! holds connection handles only, never frame data.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::client::{ConnectionState, SharedState};
use crate::error::SendError;
use crate::protocol::CLOSE_TIMEOUT;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }

    /// Abbreviated form for status strings.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The send surface of one registered connection's socket.
///
/// A seam between the registry/hub and the transport so fan-out behavior
/// is testable against failing and recording fakes.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_binary(&self, payload: Bytes) -> Result<(), SendError>;
    async fn send_text(&self, text: &str) -> Result<(), SendError>;
    async fn close(&self) -> Result<(), SendError>;
}

/// One tracked connection: identifier, lifecycle state, and its sink.
pub struct ConnectionHandle {
    id: ConnectionId,
    state: SharedState,
    sink: Box<dyn FrameSink>,
}

impl ConnectionHandle {
    fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            id: ConnectionId::fresh(),
            state: SharedState::new(ConnectionState::Open),
            sink,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Mark the connection as going away without touching the socket.
    pub fn begin_close(&self) {
        self.state.advance(ConnectionState::Closing);
    }

    /// Send one binary message; fails unless the connection is open.
    pub async fn send_binary(&self, payload: Bytes) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        self.sink.send_binary(payload).await
    }

    /// Send one text message; fails unless the connection is open.
    pub async fn send_text(&self, text: &str) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotOpen);
        }
        self.sink.send_text(text).await
    }

    /// Graceful close with a bounded timeout. Errors from an
    /// already-broken socket are ignored; the state ends up `Closed`
    /// either way.
    pub async fn close(&self) {
        self.state.advance(ConnectionState::Closing);
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.sink.close()).await;
        self.state.advance(ConnectionState::Closed);
    }
}

/// Internally synchronized mapping of identifiers to connections.
///
/// Safe under concurrent invocation from independent connection handlers;
/// callers never take an external lock.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under a fresh identifier.
    pub async fn add(&self, sink: Box<dyn FrameSink>) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(sink));
        self.connections
            .write()
            .await
            .insert(handle.id(), handle.clone());
        handle
    }

    /// Remove a connection; reports whether it was present. Idempotent.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    /// Point-in-time snapshot of open connections, optionally excluding
    /// one identifier.
    pub async fn active(&self, excluding: Option<ConnectionId>) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.is_open() && Some(conn.id()) != excluding)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sink that accepts everything and records nothing.
    pub(crate) struct NullSink;

    #[async_trait]
    impl FrameSink for NullSink {
        async fn send_binary(&self, _payload: Bytes) -> Result<(), SendError> {
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
    async fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = registry.add(Box::new(NullSink)).await;
        let id = conn.id();

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);

        let active = registry.active(None).await;
        assert!(active.iter().all(|c| c.id() != id));
    }

    #[tokio::test]
    async fn active_snapshot_honors_exclusion() {
        let registry = ConnectionRegistry::new();
        let a = registry.add(Box::new(NullSink)).await;
        let b = registry.add(Box::new(NullSink)).await;
        let c = registry.add(Box::new(NullSink)).await;

        let without_a = registry.active(Some(a.id())).await;
        assert_eq!(without_a.len(), 2);
        assert!(without_a.iter().any(|conn| conn.id() == b.id()));
        assert!(without_a.iter().any(|conn| conn.id() == c.id()));

        let all = registry.active(None).await;
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn non_open_connections_are_not_active() {
        let registry = ConnectionRegistry::new();
        let a = registry.add(Box::new(NullSink)).await;
        let b = registry.add(Box::new(NullSink)).await;

        b.begin_close();
        let active = registry.active(None).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), a.id());
    }

    #[tokio::test]
    async fn identifiers_are_unique() {
        let registry = ConnectionRegistry::new();
        let a = registry.add(Box::new(NullSink)).await;
        let b = registry.add(Box::new(NullSink)).await;
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn send_on_closed_handle_fails() {
        let registry = ConnectionRegistry::new();
        let conn = registry.add(Box::new(NullSink)).await;

        conn.close().await;
        let result = conn.send_binary(Bytes::from_static(b"late")).await;
        assert!(matches!(result, Err(SendError::NotOpen)));
    }
}
