//! Frame type and wire constants.
//!
//! The wire protocol is deliberately thin: one full frame per WebSocket
//! binary message, text messages reserved for liveness chatter, and the
//! standard close handshake. Nothing here knows about pixels or samples.

use std::time::{Duration, Instant};

use bytes::Bytes;

/// Largest inbound binary message the relay or client will accept.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Payload of the text liveness probe. Ignored by broadcast logic.
pub const KEEPALIVE_PAYLOAD: &str = "ping";

/// Interval between liveness probes while a connection is open.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// How long a graceful close handshake may take before we abort.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default relay listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";

/// Path clients must request in the upgrade handshake.
pub const WS_PATH: &str = "/ws";

/// Default relay endpoint for clients.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:5000/ws";

/// Default sampling period — ~30 frames captured per second.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_millis(33);

/// Default transmission period — ~10 frames sent per second.
pub const DEFAULT_SEND_PERIOD: Duration = Duration::from_millis(100);

/// One captured media sample: an opaque byte buffer plus its capture time.
///
/// The payload is refcounted, so handing a frame through the queue, a
/// channel, or a fan-out never copies the bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub payload: Bytes,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            captured_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_payload_is_shared_not_copied() {
        let frame = Frame::new(vec![1u8, 2, 3]);
        let copy = frame.clone();
        // Bytes clones share the same backing allocation
        assert_eq!(frame.payload.as_ptr(), copy.payload.as_ptr());
        assert_eq!(copy.len(), 3);
    }
}
