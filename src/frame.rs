//! Frame container.
//!
//! - `Frame`: dense 3-channel pixel buffer in blue-green-red byte order.
//!
//! A frame lives for one loop iteration. The only copy that may outlive it is a
//! compressed thumbnail produced by the alert path.

use anyhow::{anyhow, Result};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Bytes per pixel (B, G, R).
pub const CHANNELS: usize = 3;

/// Decoded video frame in BGR byte order.
///
/// Frames are not `Clone`; a copy that must survive the iteration is made
/// explicitly (thumbnail encoding).
#[derive(Debug)]
pub struct Frame {
    /// Row-major BGR pixel data, `width * height * 3` bytes.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Monotonic capture instant.
    capture_instant: Instant,

    /// Wall-clock capture time in epoch milliseconds.
    captured_at_ms: u64,
}

impl Frame {
    /// Wrap a BGR buffer, rejecting empty or short buffers.
    ///
    /// A frame that fails this check is a "null frame" and is treated by the
    /// stream controller as a read failure.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame has zero dimension {}x{}", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} BGR bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            capture_instant: Instant::now(),
            captured_at_ms: epoch_millis(),
        })
    }

    /// BGR pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at (x, y) as `[b, g, r]`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// Milliseconds since the frame was captured.
    pub fn age_ms(&self) -> u128 {
        self.capture_instant.elapsed().as_millis()
    }

    pub fn captured_at_ms(&self) -> u64 {
        self.captured_at_ms
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Current wall-clock time in epoch milliseconds (0 if the clock is before the epoch).
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
