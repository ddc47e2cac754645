//! Streamer: ships framed payloads from one egress queue over TCP.
//!
//! A streamer dials the backend on `connect`, then a send loop drains the
//! queue, stamps each payload and writes it with [`FrameCodec`]. A failed
//! write triggers one reconnect to the same endpoint; if that dial fails the
//! streamer reports a [`Problem`] and goes idle. Retrying beyond that is the
//! supervisor's call.

mod problem;

pub use problem::{Problem, ProblemKind, ProblemSink};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use frame_codec::{Frame, FrameCodec};
use futures::SinkExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::EgressReceiver;

/// How long `stop` waits for the send loop before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire counters shared between a streamer and its send loop.
#[derive(Debug, Default)]
pub struct StreamerStats {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    reconnects: AtomicU64,
}

impl StreamerStats {
    fn record_frame(&self, wire_len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(wire_len as u64, Ordering::Relaxed);
    }

    fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a streamer.
#[derive(Debug, Clone, Serialize)]
pub struct StreamerSnapshot {
    pub port: u16,
    pub connected: bool,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub reconnects: u64,
}

/// Remote endpoint plus the reporting path shared by dial attempts.
#[derive(Clone)]
struct Endpoint {
    host: String,
    port: u16,
    backoff: Duration,
    problems: ProblemSink,
}

impl Endpoint {
    /// Dial once. On failure wait out the backoff, report one problem and
    /// return `None`. Returns `None` silently if `stop` fires first.
    async fn dial(&self, stop: &CancellationToken) -> Option<TcpStream> {
        let result = tokio::select! {
            _ = stop.cancelled() => return None,
            result = TcpStream::connect((self.host.as_str(), self.port)) => result,
        };

        match result {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(port = self.port, error = %e, "Failed to set TCP_NODELAY");
                }
                info!(host = %self.host, port = self.port, "Stream connected");
                Some(stream)
            }
            Err(e) => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    error = %e,
                    backoff = ?self.backoff,
                    "Stream dial failed"
                );
                tokio::select! {
                    _ = stop.cancelled() => return None,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
                self.problems.report(
                    self.port,
                    ProblemKind::Disconnect,
                    format!("dial {}:{} failed: {}", self.host, self.port, e),
                );
                None
            }
        }
    }
}

struct Session {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// One TCP uplink bound to one egress queue.
pub struct Streamer {
    endpoint: Endpoint,
    queue: EgressReceiver,
    stats: Arc<StreamerStats>,
    session: Option<Session>,
}

impl Streamer {
    /// Create an idle streamer. Nothing is dialed until [`connect`](Self::connect).
    pub fn new(
        host: impl Into<String>,
        port: u16,
        backoff: Duration,
        queue: EgressReceiver,
        problems: ProblemSink,
    ) -> Self {
        Self {
            endpoint: Endpoint {
                host: host.into(),
                port,
                backoff,
                problems,
            },
            queue,
            stats: Arc::new(StreamerStats::default()),
            session: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    /// Whether a send loop is alive.
    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.handle.is_finished())
    }

    /// Dial the backend and start the send loop.
    ///
    /// Does nothing if already connected. On dial failure a problem has been
    /// reported and `false` is returned.
    pub async fn connect(&mut self, parent: &CancellationToken) -> bool {
        if self.is_connected() {
            return true;
        }
        self.session = None;

        let stop = parent.child_token();
        let Some(stream) = self.endpoint.dial(&stop).await else {
            return false;
        };

        let handle = tokio::spawn(send_loop(
            FramedWrite::new(stream, FrameCodec::new()),
            self.endpoint.clone(),
            self.queue.clone(),
            stop.clone(),
            self.stats.clone(),
        ));
        self.session = Some(Session { stop, handle });
        true
    }

    /// Close the connection and join the send loop.
    ///
    /// Returns whether a session was open.
    pub async fn stop(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };

        session.stop.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, &mut session.handle)
            .await
            .is_err()
        {
            warn!(port = self.endpoint.port, "Send loop did not stop in time, aborting");
            session.handle.abort();
        }
        debug!(port = self.endpoint.port, "Streamer stopped");
        true
    }

    pub fn snapshot(&self) -> StreamerSnapshot {
        StreamerSnapshot {
            port: self.endpoint.port,
            connected: self.is_connected(),
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            reconnects: self.stats.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Streamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streamer")
            .field("host", &self.endpoint.host)
            .field("port", &self.endpoint.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

async fn send_loop(
    mut framed: FramedWrite<TcpStream, FrameCodec>,
    endpoint: Endpoint,
    queue: EgressReceiver,
    stop: CancellationToken,
    stats: Arc<StreamerStats>,
) {
    // A payload whose write failed; retried first after reconnecting.
    let mut pending: Option<Bytes> = None;

    loop {
        let payload = match pending.take() {
            Some(payload) => payload,
            None => tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = queue.recv() => match next {
                    Some(payload) => payload,
                    None => {
                        debug!(port = endpoint.port, "Egress queue closed");
                        break;
                    }
                },
            },
        };

        let frame = Frame::now(payload.clone());
        let wire_len = frame.encoded_len();
        let written = tokio::select! {
            _ = stop.cancelled() => break,
            written = framed.send(frame) => written,
        };

        match written {
            Ok(()) => stats.record_frame(wire_len),
            Err(e) => {
                if stop.is_cancelled() {
                    break;
                }
                warn!(port = endpoint.port, error = %e, "Stream write failed, reconnecting");
                stats.record_reconnect();
                pending = Some(payload);

                match endpoint.dial(&stop).await {
                    Some(stream) => framed = FramedWrite::new(stream, FrameCodec::new()),
                    None => return,
                }
            }
        }
    }

    if let Err(e) = framed.get_mut().shutdown().await {
        debug!(port = endpoint.port, error = %e, "Error closing stream");
    }
}
