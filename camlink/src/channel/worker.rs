//! Channel worker: one device's capture, encode and hand-off loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::{EgressSender, Handoff};
use super::state::ChannelState;
use crate::capture::{FrameEncoder, FrameSource};
use crate::config::CaptureConfig;

/// Pause after a failed read when the channel is unpaced.
const FAILURE_BACKOFF: Duration = Duration::from_millis(100);

type SharedSource = Arc<Mutex<Box<dyn FrameSource>>>;

/// A capture channel and its run state.
///
/// Owned by the scheduler. Each `start` spawns a run loop with a fresh child
/// stop token; `stop` cancels it.
pub struct Channel {
    device: u32,
    source: SharedSource,
    encoder: Arc<dyn FrameEncoder>,
    capture: CaptureConfig,
    state: Arc<Mutex<ChannelState>>,
    frames_delivered: Arc<AtomicU64>,
    starts: u64,
    run: Option<ChannelRun>,
}

struct ChannelRun {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub device: u32,
    pub state: ChannelState,
    pub frames_delivered: u64,
    /// Number of runs launched so far.
    pub starts: u64,
}

impl Channel {
    /// Create a channel around an opened source.
    pub fn new(
        device: u32,
        source: Box<dyn FrameSource>,
        encoder: Arc<dyn FrameEncoder>,
        capture: CaptureConfig,
    ) -> Self {
        Self {
            device,
            source: Arc::new(Mutex::new(source)),
            encoder,
            capture,
            state: Arc::new(Mutex::new(ChannelState::Ready)),
            frames_delivered: Arc::new(AtomicU64::new(0)),
            starts: 0,
            run: None,
        }
    }

    pub fn device(&self) -> u32 {
        self.device
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            device: self.device,
            state: self.state(),
            frames_delivered: self.frames_delivered(),
            starts: self.starts,
        }
    }

    /// Launch the run loop feeding `queue`.
    ///
    /// Returns `false` without doing anything if the channel is already
    /// running. A previous run that is still winding down is awaited first.
    pub async fn start(&mut self, queue: EgressSender, parent: &CancellationToken) -> bool {
        if self.is_running() {
            debug!(device = self.device, "Channel already running");
            return false;
        }

        if let Some(previous) = self.run.take() {
            previous.stop.cancel();
            let _ = previous.handle.await;
        }

        let stop = parent.child_token();
        *self.state.lock() = ChannelState::Running;

        let handle = tokio::spawn(run_loop(RunContext {
            device: self.device,
            source: self.source.clone(),
            encoder: self.encoder.clone(),
            capture: self.capture,
            queue,
            stop: stop.clone(),
            state: self.state.clone(),
            frames_delivered: self.frames_delivered.clone(),
        }));

        self.run = Some(ChannelRun { stop, handle });
        self.starts += 1;
        info!(device = self.device, "Channel started");
        true
    }

    /// Signal the run loop to stop.
    ///
    /// Returns `false` and sends nothing if the channel is not running.
    pub fn stop(&mut self) -> bool {
        let mut state = self.state.lock();
        if !state.is_running() {
            return false;
        }
        *state = ChannelState::Stopping;
        drop(state);

        if let Some(run) = &self.run {
            run.stop.cancel();
        }
        info!(device = self.device, "Channel stop requested");
        true
    }

    /// Wait for the current run loop to exit, aborting it after `timeout`.
    ///
    /// An in-flight frame read cannot be interrupted, so the deadline covers
    /// one read plus one encode.
    pub async fn join(&mut self, timeout: Duration) {
        let Some(mut run) = self.run.take() else {
            return;
        };

        match tokio::time::timeout(timeout, &mut run.handle).await {
            Ok(_) => {}
            Err(_) => {
                warn!(device = self.device, ?timeout, "Channel did not stop in time, aborting");
                run.handle.abort();
                *self.state.lock() = ChannelState::Stopped;
            }
        }
    }

    /// Stop and wait. Returns whether the channel was running.
    pub async fn stop_and_join(&mut self, timeout: Duration) -> bool {
        let was_running = self.stop();
        self.join(timeout).await;
        was_running
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("device", &self.device)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct RunContext {
    device: u32,
    source: SharedSource,
    encoder: Arc<dyn FrameEncoder>,
    capture: CaptureConfig,
    queue: EgressSender,
    stop: CancellationToken,
    state: Arc<Mutex<ChannelState>>,
    frames_delivered: Arc<AtomicU64>,
}

async fn run_loop(ctx: RunContext) {
    let RunContext {
        device,
        source,
        encoder,
        capture,
        queue,
        stop,
        state,
        frames_delivered,
    } = ctx;
    let interval = capture.frame_interval();
    let quality = capture.jpeg_quality;

    loop {
        if stop.is_cancelled() {
            break;
        }
        let iteration_started = Instant::now();

        let source = source.clone();
        let encoder = encoder.clone();
        let captured = tokio::task::spawn_blocking(move || {
            let frame = source.lock().next_frame()?;
            encoder.encode(&frame, quality)
        })
        .await;

        let failure = match captured {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("capture task failed: {}", e)),
        };
        let payload = match failure {
            Ok(payload) => payload,
            Err(reason) => {
                warn!(device, error = %reason, "Frame capture failed, skipping");
                if !pause(&stop, interval.unwrap_or(FAILURE_BACKOFF)).await {
                    break;
                }
                continue;
            }
        };

        match queue.send(payload, &stop).await {
            Handoff::Delivered => {
                frames_delivered.fetch_add(1, Ordering::Relaxed);
            }
            Handoff::Cancelled => break,
            Handoff::Closed => {
                debug!(device, "Egress queue closed");
                break;
            }
        }

        if let Some(interval) = interval {
            let remaining = interval.saturating_sub(iteration_started.elapsed());
            if !remaining.is_zero() && !pause(&stop, remaining).await {
                break;
            }
        }
    }

    *state.lock() = ChannelState::Stopped;
    info!(device, "Channel stopped");
}

/// Sleep for `duration` unless stopped first. Returns `false` when stopped.
async fn pause(stop: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
