use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg;

use super::{FrameEncoder, RawFrame};
use crate::{Error, Result};

/// JPEG compression backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegEncoder;

impl JpegEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &RawFrame, quality: u8) -> Result<Bytes> {
        if frame.width == 0 || frame.height == 0 {
            return Err(Error::encode("frame has zero size"));
        }
        if frame.data.len() != frame.expected_len() {
            return Err(Error::encode(format!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                frame.data.len(),
                frame.expected_len(),
                frame.width,
                frame.height
            )));
        }

        let mut out = Vec::with_capacity(frame.data.len() / 8);
        jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(
                &frame.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| Error::encode(e.to_string()))?;

        Ok(Bytes::from(out))
    }
}
