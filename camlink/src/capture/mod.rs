//! Capture capabilities consumed by channel workers.
//!
//! A [`SourceFactory`] opens a device into a [`FrameSource`], which hands out
//! raw RGB frames on demand. A [`FrameEncoder`] compresses them into opaque
//! payloads. Both are synchronous; workers call them on the blocking pool.

mod detect;
mod encoder;
mod pattern;

pub use detect::{DetectedDevice, candidate_devices, detect_channels};
pub use encoder::JpegEncoder;
pub use pattern::{PatternSource, PatternSourceFactory};

use bytes::Bytes;

use crate::Result;

/// Bytes per pixel of a [`RawFrame`] (packed RGB8).
pub const BYTES_PER_PIXEL: usize = 3;

/// An uncompressed frame in packed RGB8 layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Number of bytes a frame of this size must carry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

/// A source of raw frames for one device.
pub trait FrameSource: Send {
    /// Read the next frame. May block until the device delivers one.
    fn next_frame(&mut self) -> Result<RawFrame>;
}

/// Opens capture devices by index.
pub trait SourceFactory: Send + Sync {
    fn open(&self, device: u32) -> Result<Box<dyn FrameSource>>;
}

/// Compresses raw frames into opaque payloads.
pub trait FrameEncoder: Send + Sync {
    /// Encode `frame` at `quality` (1-100).
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Bytes>;
}
