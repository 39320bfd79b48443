//! Frame sources — the "produce one frame" capture collaborators.
//!
//! The pipeline core never looks inside a frame; a source hands back one
//! opaque byte buffer per call and may fail on any given tick. Sources are
//! constructed inside the sampling thread (screen capturers are not `Send`
//! on X11), so the loop takes a factory rather than a source.

pub mod audio;
pub mod pattern;
pub mod screen;

use std::fmt;
use std::io::Cursor;

use clap::ValueEnum;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};

use crate::error::CaptureError;
use crate::protocol::Frame;

/// Synchronously produces the latest captured frame on demand.
pub trait FrameSource {
    fn capture_once(&mut self) -> Result<Frame, CaptureError>;
}

/// Builds a source inside the thread that will drive it.
pub type SourceFactory =
    Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, CaptureError> + Send + 'static>;

/// Which capture collaborator the producer loop samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Primary display, JPEG-compressed.
    Screen,
    /// Synthetic moving gradient — runs headless.
    Pattern,
    /// Default input device, raw PCM chunks.
    Audio,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Screen => "screen",
            SourceKind::Pattern => "pattern",
            SourceKind::Audio => "audio",
        })
    }
}

impl SourceKind {
    pub fn factory(self) -> SourceFactory {
        match self {
            SourceKind::Screen => Box::new(|| {
                screen::ScreenSource::new(screen::MAX_CAPTURE_WIDTH, screen::JPEG_QUALITY)
                    .map(|s| Box::new(s) as Box<dyn FrameSource>)
            }),
            SourceKind::Pattern => {
                Box::new(|| Ok(Box::new(pattern::PatternSource::new()) as Box<dyn FrameSource>))
            }
            SourceKind::Audio => Box::new(|| {
                audio::AudioSource::new().map(|s| Box::new(s) as Box<dyn FrameSource>)
            }),
        }
    }
}

/// JPEG encode an RGB buffer.
pub(crate) fn jpeg_encode(
    rgb: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb.to_vec())
        .ok_or_else(|| CaptureError::Encode("buffer does not match dimensions".into()))?;

    img.write_with_encoder(encoder)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(buf.into_inner())
}
