//! Synthetic frame source.
//!
//! Generates a moving color gradient so the full pipeline can run on a
//! machine with no display or capture permissions. Also what the end-to-end
//! tests stream.

use super::{jpeg_encode, FrameSource};
use crate::error::CaptureError;
use crate::protocol::Frame;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 400;
const QUALITY: u8 = 80;

/// Gradient generator; each frame shifts the hue so consecutive frames
/// differ visibly.
pub struct PatternSource {
    width: u32,
    height: u32,
    quality: u8,
    seq: u64,
}

impl PatternSource {
    pub fn new() -> Self {
        Self::with_dimensions(WIDTH, HEIGHT)
    }

    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            quality: QUALITY,
            seq: 0,
        }
    }
}

impl Default for PatternSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for PatternSource {
    fn capture_once(&mut self) -> Result<Frame, CaptureError> {
        let (w, h) = (self.width, self.height);
        let phase = (self.seq * 8 % 256) as u32;
        let mut rgb = Vec::with_capacity((w * h * 3) as usize);

        for y in 0..h {
            for x in 0..w {
                rgb.push(((x * 255 / w + phase) % 256) as u8);
                rgb.push((y * 255 / h) as u8);
                rgb.push(128);
            }
        }

        self.seq += 1;
        let jpeg = jpeg_encode(&rgb, w, h, self.quality)?;
        Ok(Frame::new(jpeg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_nonempty_jpeg_frames() {
        let mut source = PatternSource::with_dimensions(32, 16);
        let frame = source.capture_once().unwrap();
        assert!(!frame.is_empty());
        // JPEG SOI marker
        assert_eq!(&frame.payload[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = PatternSource::with_dimensions(32, 16);
        let a = source.capture_once().unwrap();
        let b = source.capture_once().unwrap();
        assert_ne!(a.payload, b.payload);
    }
}
