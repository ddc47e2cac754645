//! Wire framing for camlink video streams.
//!
//! Every packet written to the backend has the same shape:
//!
//! ```text
//! [8 bytes LE: send timestamp, ns since epoch][8 bytes LE: payload length N][N bytes payload]
//! ```
//!
//! The payload is opaque; this crate never looks inside it.

pub mod codec;
pub mod error;
pub mod types;

pub use crate::{
    codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec},
    error::FrameError,
    types::{Frame, HEADER_LEN, LENGTH_LEN, TIMESTAMP_LEN, now_nanos},
};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Encode a single frame into a freshly allocated packet.
pub fn pack(frame: Frame) -> Result<Bytes, FrameError> {
    let mut codec = FrameCodec::new();
    let mut dst = BytesMut::with_capacity(frame.encoded_len());
    codec.encode(frame, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode one frame from the front of `src`, or `None` if it is incomplete.
pub fn unpack(src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    let mut codec = FrameCodec::new();
    codec.decode(src)
}
