//! Audio capture source.
//!
//! The cpal callback accumulates samples and ships fixed-size PCM chunks
//! (16-bit LE) to the sampling thread; `capture_once` hands back everything
//! accumulated since the previous tick as one opaque frame.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::FrameSource;
use crate::error::CaptureError;
use crate::protocol::Frame;

/// Duration of audio per chunk shipped out of the callback.
const CHUNK_MS: usize = 20;

/// Longest `capture_once` will wait for the device before giving up on
/// the tick.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Default input device exposed as a frame source. Construct inside the
/// sampling thread; the cpal stream is kept alive by the struct.
pub struct AudioSource {
    rx: mpsc::Receiver<Vec<u8>>,
    _stream: cpal::Stream,
}

impl AudioSource {
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::NoDevice("no audio input device".into()))?;

        let default_config = device
            .default_input_config()
            .map_err(|e| CaptureError::NoDevice(format!("no default input config: {}", e)))?;

        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels();

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let chunk_samples = (sample_rate as usize * CHUNK_MS) / 1000 * channels as usize;
        let (tx, rx) = mpsc::channel::<Vec<u8>>();

        let mut pending: Vec<f32> = Vec::with_capacity(chunk_samples * 2);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pending.extend_from_slice(data);
                    while pending.len() >= chunk_samples {
                        let mut pcm = Vec::with_capacity(chunk_samples * 2);
                        for sample in pending.drain(..chunk_samples) {
                            let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            pcm.extend_from_slice(&v.to_le_bytes());
                        }
                        if tx.send(pcm).is_err() {
                            return; // receiver dropped, source torn down
                        }
                    }
                },
                |err| {
                    tracing::warn!(error = %err, "audio capture stream error");
                },
                None,
            )
            .map_err(|e| CaptureError::NoDevice(format!("input stream failed: {}", e)))?;

        stream
            .play()
            .map_err(|e| CaptureError::Capture(e.to_string()))?;

        Ok(Self {
            rx,
            _stream: stream,
        })
    }
}

impl FrameSource for AudioSource {
    fn capture_once(&mut self) -> Result<Frame, CaptureError> {
        let mut pcm = self
            .rx
            .recv_timeout(RECV_TIMEOUT)
            .map_err(|_| CaptureError::NotReady)?;

        // Drain whatever else accumulated so latency stays bounded
        while let Ok(more) = self.rx.try_recv() {
            pcm.extend_from_slice(&more);
        }

        Ok(Frame::new(pcm))
    }
}
