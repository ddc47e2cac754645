use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::FrameError,
    types::{Frame, HEADER_LEN, TIMESTAMP_LEN, now_nanos},
};

/// Default ceiling on a decoded payload (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Codec for the `[timestamp u64 LE][length u64 LE][payload]` wire format.
///
/// Encoding a bare `Bytes` payload stamps it with the current time; encoding a
/// [`Frame`] keeps the timestamp it carries.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Reject decoded payloads larger than `max_frame_len` bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    fn put_frame(timestamp_ns: u64, payload: &[u8], dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u64_le(timestamp_ns);
        dst.put_u64_le(payload.len() as u64);
        dst.put_slice(payload);
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Self::put_frame(item.timestamp_ns, &item.payload, dst);
        Ok(())
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Self::put_frame(now_nanos(), &item, dst);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut length_field = [0u8; 8];
        length_field.copy_from_slice(&src[TIMESTAMP_LEN..HEADER_LEN]);
        let length = u64::from_le_bytes(length_field);

        let payload_len = match usize::try_from(length) {
            Ok(len) if len <= self.max_frame_len => len,
            _ => {
                return Err(FrameError::FrameTooLarge {
                    length,
                    max: self.max_frame_len,
                });
            }
        };

        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        let timestamp_ns = src.get_u64_le();
        src.advance(8);
        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Frame {
            timestamp_ns,
            payload,
        }))
    }
}
