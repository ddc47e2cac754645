//! Supervisor actor.
//!
//! Registers the device, polls link health and consumes streamer problems.
//! Any failure in the current epoch triggers one recovery: stop every channel
//! and streamer, bump the epoch, register again, rebind the scheduler.
//! Control commands from the API are served from the same loop.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backend::Backend;
use super::health::HealthMonitor;
use super::probe::DeviceProbe;
use super::registration::{DeviceRegistration, Registrar};
use crate::config::AgentConfig;
use crate::scheduler::{ChannelSelector, SchedulerHandle, SchedulerStatus};
use crate::streamer::{Problem, ProblemSink};
use crate::{Error, Result};

/// Mailbox capacity for control commands.
const COMMAND_MAILBOX_CAPACITY: usize = 16;

type RegistrationFuture = BoxFuture<'static, Result<Option<DeviceRegistration>>>;

/// Commands accepted from the control boundary.
#[derive(Debug)]
pub enum ControlCommand {
    Start {
        selector: ChannelSelector,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        selector: ChannelSelector,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Shut down and register again.
    Restart { reply: oneshot::Sender<Result<()>> },
    /// Stop everything and end the process.
    Shutdown { reply: oneshot::Sender<Result<()>> },
    Status {
        reply: oneshot::Sender<Result<SupervisorStatus>>,
    },
}

/// Where the supervisor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    /// Waiting for registration to succeed.
    Registering,
    /// Registered and monitoring.
    Running,
}

/// Snapshot served by `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub phase: SupervisorPhase,
    pub epoch: u64,
    pub registration: Option<DeviceRegistration>,
    pub recoveries: u64,
    pub last_recovery_reason: Option<String>,
    pub scheduler: SchedulerStatus,
}

/// Cloneable address of the supervisor actor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<ControlCommand>,
}

impl SupervisorHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> ControlCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| Error::ActorStopped("supervisor"))?;
        rx.await.map_err(|_| Error::ActorStopped("supervisor"))?
    }

    pub async fn start(&self, selector: ChannelSelector) -> Result<()> {
        self.request(|reply| ControlCommand::Start { selector, reply })
            .await
    }

    pub async fn stop(&self, selector: ChannelSelector) -> Result<()> {
        self.request(|reply| ControlCommand::Stop { selector, reply })
            .await
    }

    /// Shut down and re-register.
    pub async fn restart(&self) -> Result<()> {
        self.request(|reply| ControlCommand::Restart { reply }).await
    }

    /// Stop everything and signal process shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ControlCommand::Shutdown { reply }).await
    }

    pub async fn status(&self) -> Result<SupervisorStatus> {
        self.request(|reply| ControlCommand::Status { reply }).await
    }
}

/// The supervisor actor state.
pub struct Supervisor {
    registrar: Registrar,
    scheduler: SchedulerHandle,
    health: HealthMonitor,
    autostart: bool,
    epoch: u64,
    registration: Option<DeviceRegistration>,
    recoveries: u64,
    last_recovery_reason: Option<String>,
    /// Ends the actor loop.
    token: CancellationToken,
    /// Cancelled on a `Shutdown` command to end the whole process.
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Create a supervisor. `shutdown` is the process-wide token; the actor
    /// runs under a child of it.
    pub fn new(
        config: &AgentConfig,
        backend: Arc<dyn Backend>,
        probe: Arc<dyn DeviceProbe>,
        scheduler: SchedulerHandle,
        channel_count: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registrar: Registrar {
                backend: backend.clone(),
                probe,
                owner: config.owner.clone(),
                channel_count,
                policy: config.registration,
            },
            scheduler,
            health: HealthMonitor::new(backend, config.health_interval),
            autostart: config.autostart,
            epoch: 1,
            registration: None,
            recoveries: 0,
            last_recovery_reason: None,
            token: shutdown.child_token(),
            shutdown,
        }
    }

    /// Spawn the actor task.
    ///
    /// The task resolves to `Err` only on a fatal error, currently
    /// [`Error::RegistrationExhausted`].
    pub fn spawn(self) -> (SupervisorHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(COMMAND_MAILBOX_CAPACITY);
        let task = tokio::spawn(self.run(rx));
        (SupervisorHandle { sender: tx }, task)
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<ControlCommand>) -> Result<()> {
        let (problems_tx, mut problems) = mpsc::unbounded_channel::<Problem>();
        info!(epoch = self.epoch, "Supervisor started, registering device");

        let mut registering: Option<RegistrationFuture> = Some(self.registration_task());

        let result = loop {
            let recovering = registering.is_some();

            tokio::select! {
                biased;
                _ = self.token.cancelled() => break Ok(()),
                outcome = poll_registration(&mut registering) => {
                    registering = None;
                    match outcome {
                        Ok(Some(registration)) => self.on_registered(registration, &problems_tx).await,
                        Ok(None) => break Ok(()),
                        Err(e) => {
                            error!(error = %e, "Giving up on registration");
                            break Err(e);
                        }
                    }
                }
                command = mailbox.recv() => {
                    let Some(command) = command else {
                        debug!("Supervisor mailbox closed");
                        break Ok(());
                    };
                    if self.handle_command(command, &mut registering).await.is_break() {
                        break Ok(());
                    }
                }
                Some(problem) = problems.recv() => {
                    if recovering || problem.epoch != self.epoch {
                        debug!(
                            problem_epoch = problem.epoch,
                            epoch = self.epoch,
                            port = problem.port,
                            "Discarding stale problem"
                        );
                        continue;
                    }
                    warn!(
                        port = problem.port,
                        kind = ?problem.kind,
                        reason = %problem.reason,
                        "Stream problem reported"
                    );
                    let reason = format!("stream on port {} failed: {}", problem.port, problem.reason);
                    registering = Some(self.recover(reason).await);
                }
                _ = self.health.tick(), if self.health.is_armed() && !recovering => {
                    if let Err(e) = self.health.poll().await {
                        warn!(error = %e, "Health check failed");
                        registering = Some(self.recover(e.to_string()).await);
                    }
                }
            }
        };

        info!(epoch = self.epoch, recoveries = self.recoveries, "Supervisor stopped");
        result
    }

    fn registration_task(&self) -> RegistrationFuture {
        let registrar = self.registrar.clone();
        let epoch = self.epoch;
        let cancel = self.token.clone();
        async move { registrar.register_with_retry(epoch, &cancel).await }.boxed()
    }

    async fn on_registered(
        &mut self,
        registration: DeviceRegistration,
        problems_tx: &mpsc::UnboundedSender<Problem>,
    ) {
        let sink = ProblemSink::new(self.epoch, problems_tx.clone());
        if let Err(e) = self.scheduler.rebind(registration.port_base, sink).await {
            warn!(error = %e, "Failed to bind streamers");
        }

        self.registration = Some(registration);
        self.health.arm();

        if self.autostart {
            info!("Autostart enabled, starting all channels");
            if let Err(e) = self.scheduler.start(ChannelSelector::All).await {
                warn!(error = %e, "Autostart failed");
            }
        }
    }

    /// Graceful shutdown followed by a fresh registration.
    ///
    /// Bumps the epoch first so anything the old streamers report from here
    /// on is discarded.
    async fn recover(&mut self, reason: String) -> RegistrationFuture {
        info!(epoch = self.epoch, reason = %reason, "Starting recovery");
        self.health.disarm();

        match self.scheduler.stop_all().await {
            Ok(report) => info!(
                channels_stopped = report.channels_stopped,
                streamers_closed = report.streamers_closed,
                "Graceful shutdown complete"
            ),
            Err(e) => warn!(error = %e, "Graceful shutdown failed"),
        }

        self.registration = None;
        self.recoveries += 1;
        self.last_recovery_reason = Some(reason);
        self.epoch += 1;
        self.registration_task()
    }

    async fn handle_command(
        &mut self,
        command: ControlCommand,
        registering: &mut Option<RegistrationFuture>,
    ) -> ControlFlow<()> {
        match command {
            ControlCommand::Start { selector, reply } => {
                let _ = reply.send(self.scheduler.start(selector).await);
            }
            ControlCommand::Stop { selector, reply } => {
                let _ = reply.send(self.scheduler.stop(selector).await);
            }
            ControlCommand::Restart { reply } => {
                if registering.is_none() {
                    *registering = Some(self.recover("restart requested".to_string()).await);
                } else {
                    debug!("Restart requested while registering, ignoring");
                }
                let _ = reply.send(Ok(()));
            }
            ControlCommand::Shutdown { reply } => {
                info!("Shutdown requested");
                self.health.disarm();
                let result = self.scheduler.stop_all().await.map(|_| ());
                let _ = reply.send(result);
                self.shutdown.cancel();
                return ControlFlow::Break(());
            }
            ControlCommand::Status { reply } => {
                let phase = if registering.is_some() {
                    SupervisorPhase::Registering
                } else {
                    SupervisorPhase::Running
                };
                let status = self.scheduler.status().await.map(|scheduler| SupervisorStatus {
                    phase,
                    epoch: self.epoch,
                    registration: self.registration.clone(),
                    recoveries: self.recoveries,
                    last_recovery_reason: self.last_recovery_reason.clone(),
                    scheduler,
                });
                let _ = reply.send(status);
            }
        }
        ControlFlow::Continue(())
    }
}

async fn poll_registration(
    registering: &mut Option<RegistrationFuture>,
) -> Result<Option<DeviceRegistration>> {
    match registering.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
