//! Screen capture source.
//!
//! Captures the primary display, downscales to MAX_CAPTURE_WIDTH, and
//! JPEG-compresses. One frame per `capture_once` call.

use std::time::Duration;

use scrap::{Capturer, Display};

use super::{jpeg_encode, FrameSource};
use crate::error::CaptureError;
use crate::protocol::Frame;

/// Max width for captured frames; larger displays are downscaled,
/// preserving aspect ratio. Higher = sharper but more bandwidth.
pub const MAX_CAPTURE_WIDTH: u32 = 1920;
/// JPEG quality (1-100).
pub const JPEG_QUALITY: u8 = 80;

/// How many times a not-yet-ready frame is retried within one tick.
const WOULD_BLOCK_RETRIES: u32 = 4;

/// Captures the primary display. Not `Send` on X11 — construct it inside
/// the thread that samples it.
pub struct ScreenSource {
    capturer: Capturer,
    src_w: usize,
    src_h: usize,
    out_w: u32,
    out_h: u32,
    quality: u8,
}

impl ScreenSource {
    pub fn new(max_width: u32, quality: u8) -> Result<Self, CaptureError> {
        let display = Display::primary()
            .map_err(|e| CaptureError::NoDevice(format!("no primary display: {}", e)))?;
        let src_w = display.width();
        let src_h = display.height();

        let capturer = Capturer::new(display)
            .map_err(|e| CaptureError::NoDevice(format!("capturer failed to start: {}", e)))?;

        // Output dimensions: downscale to max_width, preserve aspect ratio
        let (out_w, out_h) = if src_w as u32 > max_width {
            let scale = max_width as f64 / src_w as f64;
            (max_width, (src_h as f64 * scale) as u32)
        } else {
            (src_w as u32, src_h as u32)
        };

        Ok(Self {
            capturer,
            src_w,
            src_h,
            out_w,
            out_h,
            quality,
        })
    }
}

impl FrameSource for ScreenSource {
    fn capture_once(&mut self) -> Result<Frame, CaptureError> {
        for _ in 0..=WOULD_BLOCK_RETRIES {
            match self.capturer.frame() {
                Ok(buf) => {
                    // scrap gives BGRA pixels (stride may include padding)
                    let stride = buf.len() / self.src_h;
                    let rgb = bgra_to_rgb_scaled(
                        &buf, self.src_w, self.src_h, stride, self.out_w, self.out_h,
                    );
                    let jpeg = jpeg_encode(&rgb, self.out_w, self.out_h, self.quality)?;
                    return Ok(Frame::new(jpeg));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // Frame not ready yet — wait briefly and retry
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(CaptureError::Capture(e.to_string())),
            }
        }
        Err(CaptureError::NotReady)
    }
}

/// Convert a BGRA buffer to RGB, optionally downscaling via nearest-neighbor.
fn bgra_to_rgb_scaled(
    bgra: &[u8],
    src_w: usize,
    src_h: usize,
    stride: usize,
    dst_w: u32,
    dst_h: u32,
) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((dst_w * dst_h * 3) as usize);

    for y in 0..dst_h {
        let src_y = (y as usize * src_h) / dst_h as usize;
        for x in 0..dst_w {
            let src_x = (x as usize * src_w) / dst_w as usize;
            let offset = src_y * stride + src_x * 4;
            if offset + 2 < bgra.len() {
                rgb.push(bgra[offset + 2]); // R (BGRA → R is at +2)
                rgb.push(bgra[offset + 1]); // G
                rgb.push(bgra[offset]); // B
            } else {
                rgb.extend_from_slice(&[0, 0, 0]);
            }
        }
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_conversion_swaps_channels() {
        // One blue-ish BGRA pixel: B=10 G=20 R=30 A=255
        let bgra = [10u8, 20, 30, 255];
        let rgb = bgra_to_rgb_scaled(&bgra, 1, 1, 4, 1, 1);
        assert_eq!(rgb, vec![30, 20, 10]);
    }

    #[test]
    fn downscale_halves_dimensions() {
        // 2x2 BGRA image downscaled to 1x1 picks the top-left pixel
        let mut bgra = vec![0u8; 2 * 2 * 4];
        bgra[0] = 1; // B of pixel (0,0)
        let rgb = bgra_to_rgb_scaled(&bgra, 2, 2, 8, 1, 1);
        assert_eq!(rgb.len(), 3);
        assert_eq!(rgb[2], 1);
    }
}
