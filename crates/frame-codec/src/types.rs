use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Width of the send-timestamp field in bytes.
pub const TIMESTAMP_LEN: usize = 8;

/// Width of the payload-length field in bytes.
pub const LENGTH_LEN: usize = 8;

/// Total header size preceding every payload.
pub const HEADER_LEN: usize = TIMESTAMP_LEN + LENGTH_LEN;

/// One packet on the wire: a send timestamp and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Nanoseconds since the Unix epoch, taken when the frame was written.
    pub timestamp_ns: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(timestamp_ns: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp_ns,
            payload: payload.into(),
        }
    }

    /// Stamp `payload` with the current wall-clock time.
    pub fn now(payload: impl Into<Bytes>) -> Self {
        Self::new(now_nanos(), payload)
    }

    /// Size of this frame once encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// Clamps to zero for clocks set before 1970 and saturates at `u64::MAX`.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
