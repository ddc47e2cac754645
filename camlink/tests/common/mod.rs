#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;

use camlink::capture::{FrameEncoder, PatternSource, RawFrame};
use camlink::channel::Channel;
use camlink::config::CaptureConfig;
use camlink::supervisor::{Backend, RegisterRequest, RegisterResponse};
use camlink::{Error, Result};
use frame_codec::Frame;

/// Scriptable backend.
///
/// Registrations hand out `port_bases` in order (the last one repeats);
/// `failing_registrations` makes the first N attempts fail. Health polls
/// succeed unless `healthy` is false or `fail_next_health` is non-zero.
pub struct FakeBackend {
    port_bases: Mutex<Vec<u16>>,
    failing_registrations: u32,
    pub healthy: AtomicBool,
    pub fail_next_health: AtomicU32,
    pub registrations: Mutex<Vec<(Instant, RegisterRequest)>>,
    pub health_polls: AtomicU32,
}

impl FakeBackend {
    pub fn new(port_bases: Vec<u16>) -> Arc<Self> {
        Self::with_failures(port_bases, 0)
    }

    pub fn with_failures(port_bases: Vec<u16>, failing_registrations: u32) -> Arc<Self> {
        Arc::new(Self {
            port_bases: Mutex::new(port_bases),
            failing_registrations,
            healthy: AtomicBool::new(true),
            fail_next_health: AtomicU32::new(0),
            registrations: Mutex::new(Vec::new()),
            health_polls: AtomicU32::new(0),
        })
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let attempt = {
            let mut registrations = self.registrations.lock();
            registrations.push((Instant::now(), request.clone()));
            registrations.len() as u32
        };
        if attempt <= self.failing_registrations {
            return Err(Error::Other("registration rejected".into()));
        }

        let port_base = {
            let mut bases = self.port_bases.lock();
            if bases.len() > 1 { bases.remove(0) } else { bases[0] }
        };
        Ok(RegisterResponse {
            assigned_id: format!("device-{}", attempt),
            port_base,
            channel_count: request.channel_count,
        })
    }

    async fn health(&self) -> Result<()> {
        self.health_polls.fetch_add(1, Ordering::SeqCst);
        let forced = self
            .fail_next_health
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced || !self.healthy.load(Ordering::SeqCst) {
            return Err(Error::HealthCheck("unexpected body 'down'".into()));
        }
        Ok(())
    }
}

/// Encodes each frame as an 8-byte little-endian sequence number.
#[derive(Default)]
pub struct SequenceEncoder {
    next: AtomicU64,
}

impl FrameEncoder for SequenceEncoder {
    fn encode(&self, _frame: &RawFrame, _quality: u8) -> Result<Bytes> {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::copy_from_slice(&seq.to_le_bytes()))
    }
}

pub fn capture_config(fps: u32) -> CaptureConfig {
    CaptureConfig {
        fps,
        jpeg_quality: 50,
        width: 4,
        height: 2,
    }
}

/// Pattern-backed channels with sequence-numbered payloads.
pub fn test_channels(count: u32, fps: u32) -> Vec<Channel> {
    (0..count)
        .map(|device| {
            Channel::new(
                device,
                Box::new(PatternSource::new(device, 4, 2)),
                Arc::new(SequenceEncoder::default()),
                capture_config(fps),
            )
        })
        .collect()
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// TCP sink decoding every frame it receives into a channel.
pub struct FrameSink {
    pub port: u16,
    pub frames: mpsc::UnboundedReceiver<Frame>,
    pub connections: Arc<AtomicU32>,
}

impl FrameSink {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, frames) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicU32::new(0));

        let accepted = connections.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = BytesMut::new();
                    loop {
                        while let Ok(Some(frame)) = frame_codec::unpack(&mut buf) {
                            if tx.send(frame).is_err() {
                                return;
                            }
                        }
                        match socket.read_buf(&mut buf).await {
                            Ok(n) if n > 0 => {}
                            _ => return,
                        }
                    }
                });
            }
        });

        Self {
            port,
            frames,
            connections,
        }
    }

    pub async fn next_frame(&mut self, timeout: Duration) -> Frame {
        tokio::time::timeout(timeout, self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("sink closed")
    }
}

pub fn sequence_of(frame: &Frame) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&frame.payload[..8]);
    u64::from_le_bytes(bytes)
}

/// Poll `check` every 20 ms until it returns true or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
