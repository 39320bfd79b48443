//! framecast — screen frame streaming over WebSocket.
//!
//! Two halves of one pipeline: a capture-and-transmit loop that samples a
//! frame source at a fixed cadence and pushes frames over a persistent
//! connection, and a relay that fans every inbound frame out to all other
//! connected peers. Frames are opaque byte buffers end to end — encoding and
//! rendering belong to the sources and renderers at the edges.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod source;
pub mod stream;
