//! Scheduler actor.
//!
//! Owns the channel set, the egress queues and the streamers. All mutation
//! happens on the actor task; callers go through [`SchedulerHandle`].

use std::ops::ControlFlow;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::channel_set::ChannelSet;
use super::handle::{DEFAULT_MAILBOX_CAPACITY, SchedulerHandle};
use super::messages::{ChannelSelector, SchedulerMessage};
use crate::channel::{Channel, ChannelSnapshot, EgressReceiver, EgressSender, egress_queue};
use crate::config::{AgentConfig, SchedulingMode};
use crate::streamer::{ProblemSink, Streamer, StreamerSnapshot};
use crate::{Error, Result};

/// Default time a channel gets to finish its iteration after a stop.
pub const DEFAULT_CHANNEL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: SchedulingMode,
    pub rotation_interval: Duration,
    /// Host the streamers dial.
    pub stream_host: String,
    pub reconnect_backoff: Duration,
    pub channel_stop_timeout: Duration,
}

impl SchedulerConfig {
    pub fn from_agent(config: &AgentConfig) -> Self {
        Self {
            mode: config.mode,
            rotation_interval: config.rotation_interval,
            stream_host: config.backend.host.clone(),
            reconnect_backoff: config.reconnect_backoff,
            channel_stop_timeout: DEFAULT_CHANNEL_STOP_TIMEOUT,
        }
    }
}

/// Outcome of stopping everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Channels that were running and got stopped.
    pub channels_stopped: usize,
    /// Streamers that had an open connection and got closed.
    pub streamers_closed: usize,
}

/// Snapshot of the scheduler for the control API.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub mode: SchedulingMode,
    pub registered: bool,
    pub epoch: Option<u64>,
    pub port_base: Option<u16>,
    /// Active position in rotating mode.
    pub active_index: Option<usize>,
    pub rotation_active: bool,
    pub channels: Vec<ChannelSnapshot>,
    pub streamers: Vec<StreamerSnapshot>,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    port_base: u16,
    epoch: u64,
}

/// The scheduler actor state.
pub struct Scheduler {
    config: SchedulerConfig,
    channels: ChannelSet,
    /// Parallel: one queue per channel. Rotating: one shared queue.
    queues: Vec<(EgressSender, EgressReceiver)>,
    /// Index-aligned with `queues`; empty until the first rebind.
    streamers: Vec<Streamer>,
    binding: Option<Binding>,
    rotation_active: bool,
    rotation_restarted: bool,
    token: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler over the detected channels.
    pub fn new(channels: Vec<Channel>, config: SchedulerConfig, token: CancellationToken) -> Self {
        let queue_count = match config.mode {
            SchedulingMode::Parallel => channels.len(),
            SchedulingMode::Rotating => usize::from(!channels.is_empty()),
        };

        Self {
            config,
            channels: ChannelSet::new(channels),
            queues: (0..queue_count).map(|_| egress_queue()).collect(),
            streamers: Vec::new(),
            binding: None,
            rotation_active: false,
            rotation_restarted: false,
            token,
        }
    }

    /// Spawn the actor task.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let handle = tokio::spawn(self.run(rx));
        (SchedulerHandle::new(tx), handle)
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<SchedulerMessage>) {
        info!(
            mode = %self.config.mode,
            channels = self.channels.len(),
            "Scheduler started"
        );

        let period = self.config.rotation_interval;
        let mut rotation = tokio::time::interval_at(Instant::now() + period, period);
        rotation.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!("Scheduler cancelled");
                    break;
                }
                message = mailbox.recv() => {
                    let Some(message) = message else {
                        debug!("Scheduler mailbox closed");
                        break;
                    };
                    if self.handle_message(message).await.is_break() {
                        return;
                    }
                    if std::mem::take(&mut self.rotation_restarted) {
                        rotation.reset();
                    }
                }
                _ = rotation.tick(), if self.rotation_active => {
                    self.rotate().await;
                }
            }
        }

        let report = self.teardown().await;
        info!(?report, "Scheduler stopped");
    }

    async fn handle_message(&mut self, message: SchedulerMessage) -> ControlFlow<()> {
        match message {
            SchedulerMessage::Start { selector, reply } => {
                let _ = reply.send(self.start(selector).await);
            }
            SchedulerMessage::Stop { selector, reply } => {
                let _ = reply.send(self.stop(selector).await);
            }
            SchedulerMessage::StopAll { reply } => {
                let _ = reply.send(self.stop_all().await);
            }
            SchedulerMessage::Rebind {
                port_base,
                problems,
                reply,
            } => {
                let _ = reply.send(self.rebind(port_base, problems).await);
            }
            SchedulerMessage::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SchedulerMessage::Shutdown { reply } => {
                let report = self.teardown().await;
                info!(?report, "Scheduler shut down");
                let _ = reply.send(report);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn start(&mut self, selector: ChannelSelector) -> Result<()> {
        if let ChannelSelector::Index(index) = selector {
            self.channels.validate(index)?;
        }
        if self.binding.is_none() {
            return Err(Error::NotRegistered);
        }
        if self.channels.is_empty() {
            return Ok(());
        }

        match self.config.mode {
            SchedulingMode::Parallel => {
                for index in self.targets(selector) {
                    self.start_parallel(index).await?;
                }
            }
            SchedulingMode::Rotating => match selector {
                ChannelSelector::Index(index) => {
                    self.rotation_active = false;
                    self.activate(index).await?;
                }
                ChannelSelector::All => {
                    let index = self.channels.active_index();
                    self.activate(index).await?;
                    if !self.rotation_active {
                        info!(interval = ?self.config.rotation_interval, "Channel rotation started");
                        self.rotation_active = true;
                        self.rotation_restarted = true;
                    }
                }
            },
        }
        Ok(())
    }

    async fn stop(&mut self, selector: ChannelSelector) -> Result<()> {
        if let ChannelSelector::Index(index) = selector {
            self.channels.validate(index)?;
        }
        let timeout = self.config.channel_stop_timeout;

        match self.config.mode {
            SchedulingMode::Parallel => {
                for index in self.targets(selector) {
                    self.channels.get_mut(index)?.stop_and_join(timeout).await;
                }
            }
            SchedulingMode::Rotating => {
                if self.rotation_active {
                    info!("Channel rotation paused");
                }
                self.rotation_active = false;
                if self.channels.is_empty() {
                    return Ok(());
                }
                let active = self.channels.active_index();
                if matches!(selector, ChannelSelector::Index(index) if index != active) {
                    return Ok(());
                }
                self.channels.get_mut(active)?.stop_and_join(timeout).await;
            }
        }
        Ok(())
    }

    fn targets(&self, selector: ChannelSelector) -> Vec<usize> {
        match selector {
            ChannelSelector::All => (0..self.channels.len()).collect(),
            ChannelSelector::Index(index) => vec![index],
        }
    }

    async fn start_parallel(&mut self, index: usize) -> Result<()> {
        let queue = self.queues[index].0.clone();
        self.channels
            .get_mut(index)?
            .start(queue, &self.token)
            .await;
        if let Some(streamer) = self.streamers.get_mut(index) {
            streamer.connect(&self.token).await;
        }
        Ok(())
    }

    /// Make `index` the single running channel on the shared stream.
    async fn activate(&mut self, index: usize) -> Result<()> {
        let previous = self.channels.active_index();
        if previous != index {
            let timeout = self.config.channel_stop_timeout;
            self.channels.get_mut(previous)?.stop_and_join(timeout).await;
            self.channels.set_active(index)?;
            info!(from = previous, to = index, "Active channel switched");
        }

        let queue = self.queues[0].0.clone();
        self.channels
            .get_mut(index)?
            .start(queue, &self.token)
            .await;
        if let Some(streamer) = self.streamers.first_mut() {
            streamer.connect(&self.token).await;
        }
        Ok(())
    }

    async fn rotate(&mut self) {
        let Some((previous, next)) = self.channels.advance() else {
            return;
        };
        debug!(from = previous, to = next, "Rotating active channel");

        let timeout = self.config.channel_stop_timeout;
        let queue = self.queues[0].0.clone();
        if let Ok(channel) = self.channels.get_mut(previous) {
            channel.stop_and_join(timeout).await;
        }
        if let Ok(channel) = self.channels.get_mut(next) {
            channel.start(queue, &self.token).await;
        }
    }

    /// Stop every channel, close every streamer and forget the binding.
    async fn stop_all(&mut self) -> ShutdownReport {
        let timeout = self.config.channel_stop_timeout;
        let mut report = ShutdownReport::default();

        for channel in self.channels.iter_mut() {
            if channel.stop_and_join(timeout).await {
                report.channels_stopped += 1;
            }
        }
        for streamer in self.streamers.iter_mut() {
            if streamer.stop().await {
                report.streamers_closed += 1;
            }
        }

        self.streamers.clear();
        self.binding = None;
        self.rotation_active = false;
        info!(
            channels_stopped = report.channels_stopped,
            streamers_closed = report.streamers_closed,
            "All channels and streamers stopped"
        );
        report
    }

    async fn rebind(&mut self, port_base: u16, problems: ProblemSink) -> Result<()> {
        for streamer in self.streamers.iter_mut() {
            streamer.stop().await;
        }
        self.streamers.clear();
        self.binding = None;

        let ports = (0..self.queues.len())
            .map(|slot| {
                u16::try_from(slot)
                    .ok()
                    .and_then(|offset| port_base.checked_add(offset))
            })
            .collect::<Option<Vec<u16>>>()
            .ok_or_else(|| {
                Error::config(format!(
                    "port base {} cannot hold {} stream port(s)",
                    port_base,
                    self.queues.len()
                ))
            })?;

        let host = &self.config.stream_host;
        let backoff = self.config.reconnect_backoff;
        self.streamers = ports
            .into_iter()
            .zip(self.queues.iter())
            .map(|(port, (_, rx))| {
                Streamer::new(host.clone(), port, backoff, rx.clone(), problems.clone())
            })
            .collect();

        self.binding = Some(Binding {
            port_base,
            epoch: problems.epoch(),
        });
        info!(
            port_base,
            epoch = problems.epoch(),
            streamers = self.streamers.len(),
            "Streamers bound"
        );
        Ok(())
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            mode: self.config.mode,
            registered: self.binding.is_some(),
            epoch: self.binding.map(|b| b.epoch),
            port_base: self.binding.map(|b| b.port_base),
            active_index: (self.config.mode == SchedulingMode::Rotating && !self.channels.is_empty())
                .then(|| self.channels.active_index()),
            rotation_active: self.rotation_active,
            channels: self.channels.iter().map(Channel::snapshot).collect(),
            streamers: self.streamers.iter().map(Streamer::snapshot).collect(),
        }
    }

    /// Stop everything and close the queues.
    async fn teardown(&mut self) -> ShutdownReport {
        let report = self.stop_all().await;
        for (tx, _) in &self.queues {
            tx.close();
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameEncoder, PatternSource, RawFrame};
    use crate::config::CaptureConfig;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct TinyEncoder;

    impl FrameEncoder for TinyEncoder {
        fn encode(&self, frame: &RawFrame, _quality: u8) -> Result<Bytes> {
            Ok(Bytes::copy_from_slice(&frame.data[..3]))
        }
    }

    fn channels(count: u32) -> Vec<Channel> {
        let capture = CaptureConfig {
            fps: 50,
            jpeg_quality: 50,
            width: 2,
            height: 2,
        };
        (0..count)
            .map(|device| {
                Channel::new(
                    device,
                    Box::new(PatternSource::new(device, 2, 2)),
                    Arc::new(TinyEncoder),
                    capture,
                )
            })
            .collect()
    }

    fn config(mode: SchedulingMode, rotation_interval: Duration) -> SchedulerConfig {
        SchedulerConfig {
            mode,
            rotation_interval,
            stream_host: "127.0.0.1".to_string(),
            reconnect_backoff: Duration::from_millis(10),
            channel_stop_timeout: Duration::from_secs(1),
        }
    }

    /// Accept connections on consecutive ports and discard what they send.
    async fn spawn_sinks(count: usize) -> u16 {
        loop {
            let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = first.local_addr().unwrap().port();
            let mut listeners = vec![first];
            for offset in 1..count {
                let Some(port) = base.checked_add(offset as u16) else {
                    break;
                };
                match TcpListener::bind(("127.0.0.1", port)).await {
                    Ok(listener) => listeners.push(listener),
                    Err(_) => break,
                }
            }
            if listeners.len() < count {
                continue;
            }
            for listener in listeners {
                tokio::spawn(async move {
                    while let Ok((mut socket, _)) = listener.accept().await {
                        tokio::spawn(async move {
                            let mut buf = vec![0u8; 4096];
                            while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
                        });
                    }
                });
            }
            return base;
        }
    }

    fn sink() -> ProblemSink {
        let (tx, _rx) = mpsc::unbounded_channel();
        ProblemSink::new(1, tx)
    }

    #[tokio::test]
    async fn test_start_requires_registration() {
        let (handle, task) = Scheduler::new(
            channels(2),
            config(SchedulingMode::Parallel, Duration::from_secs(60)),
            CancellationToken::new(),
        )
        .spawn();

        let err = handle.start(ChannelSelector::All).await.unwrap_err();
        assert!(matches!(err, Error::NotRegistered));

        let err = handle.start(ChannelSelector::Index(5)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidChannel { index: 5, count: 2 }));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_parallel_start_stop() {
        let port_base = spawn_sinks(2).await;
        let (handle, task) = Scheduler::new(
            channels(2),
            config(SchedulingMode::Parallel, Duration::from_secs(60)),
            CancellationToken::new(),
        )
        .spawn();

        handle.rebind(port_base, sink()).await.unwrap();
        handle.start(ChannelSelector::All).await.unwrap();
        handle.start(ChannelSelector::Index(1)).await.unwrap();

        let status = handle.status().await.unwrap();
        assert!(status.registered);
        assert_eq!(status.port_base, Some(port_base));
        assert!(status.channels.iter().all(|c| c.state.is_running()));
        assert!(status.channels.iter().all(|c| c.starts == 1));
        let ports: Vec<u16> = status.streamers.iter().map(|s| s.port).collect();
        assert_eq!(ports, vec![port_base, port_base + 1]);

        handle.stop(ChannelSelector::Index(0)).await.unwrap();
        handle.stop(ChannelSelector::Index(0)).await.unwrap();
        let status = handle.status().await.unwrap();
        assert!(!status.channels[0].state.is_running());
        assert!(status.channels[1].state.is_running());

        let report = handle.stop_all().await.unwrap();
        assert_eq!(report.channels_stopped, 1);
        assert_eq!(report.streamers_closed, 2);
        assert!(matches!(
            handle.start(ChannelSelector::All).await,
            Err(Error::NotRegistered)
        ));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_cycles_through_channels() {
        let port_base = spawn_sinks(1).await;
        let (handle, task) = Scheduler::new(
            channels(3),
            config(SchedulingMode::Rotating, Duration::from_millis(150)),
            CancellationToken::new(),
        )
        .spawn();

        handle.rebind(port_base, sink()).await.unwrap();
        handle.start(ChannelSelector::All).await.unwrap();

        let status = handle.status().await.unwrap();
        assert_eq!(status.active_index, Some(0));
        assert_eq!(status.streamers.len(), 1);

        // Sample halfway between ticks.
        tokio::time::sleep(Duration::from_millis(75)).await;
        let mut seen = vec![0];
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let status = handle.status().await.unwrap();
            let running: Vec<usize> = status
                .channels
                .iter()
                .enumerate()
                .filter(|(_, c)| c.state.is_running())
                .map(|(i, _)| i)
                .collect();
            assert_eq!(running.len(), 1);
            assert_eq!(Some(running[0]), status.active_index);
            seen.push(running[0]);
        }
        seen.dedup();
        assert!(seen.len() >= 3, "rotation visited {seen:?}");

        handle.stop(ChannelSelector::All).await.unwrap();
        let paused = handle.status().await.unwrap();
        assert!(!paused.rotation_active);
        assert!(paused.channels.iter().all(|c| !c.state.is_running()));

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_single_channel_rotation_is_noop() {
        let port_base = spawn_sinks(1).await;
        let (handle, task) = Scheduler::new(
            channels(1),
            config(SchedulingMode::Rotating, Duration::from_millis(50)),
            CancellationToken::new(),
        )
        .spawn();

        handle.rebind(port_base, sink()).await.unwrap();
        handle.start(ChannelSelector::All).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.active_index, Some(0));
        assert!(status.channels[0].state.is_running());
        assert_eq!(status.channels[0].starts, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rotating_start_index_pins_channel() {
        let port_base = spawn_sinks(1).await;
        let (handle, task) = Scheduler::new(
            channels(3),
            config(SchedulingMode::Rotating, Duration::from_millis(50)),
            CancellationToken::new(),
        )
        .spawn();

        handle.rebind(port_base, sink()).await.unwrap();
        handle.start(ChannelSelector::Index(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = handle.status().await.unwrap();
        assert_eq!(status.active_index, Some(2));
        assert!(!status.rotation_active);
        assert!(status.channels[2].state.is_running());
        assert!(!status.channels[0].state.is_running());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rebind_rejects_port_range_overflow() {
        let (handle, task) = Scheduler::new(
            channels(3),
            config(SchedulingMode::Parallel, Duration::from_secs(60)),
            CancellationToken::new(),
        )
        .spawn();

        let err = handle.rebind(u16::MAX - 1, sink()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let status = handle.status().await.unwrap();
        assert!(!status.registered);
        assert!(status.streamers.is_empty());
        assert!(matches!(
            handle.start(ChannelSelector::All).await,
            Err(Error::NotRegistered)
        ));

        // The last slot may land exactly on the top port.
        handle.rebind(u16::MAX - 2, sink()).await.unwrap();
        let status = handle.status().await.unwrap();
        let ports: Vec<u16> = status.streamers.iter().map(|s| s.port).collect();
        assert_eq!(ports, vec![u16::MAX - 2, u16::MAX - 1, u16::MAX]);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_tears_down() {
        let token = CancellationToken::new();
        let (handle, task) = Scheduler::new(
            channels(1),
            config(SchedulingMode::Parallel, Duration::from_secs(60)),
            token.clone(),
        )
        .spawn();

        token.cancel();
        task.await.unwrap();
        assert!(matches!(
            handle.status().await,
            Err(Error::ActorStopped("scheduler"))
        ));
    }
}
