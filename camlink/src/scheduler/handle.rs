use tokio::sync::{mpsc, oneshot};

use super::messages::{ChannelSelector, SchedulerMessage};
use super::service::{SchedulerStatus, ShutdownReport};
use crate::streamer::ProblemSink;
use crate::{Error, Result};

/// Default mailbox capacity for the scheduler actor.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 32;

/// Cloneable address of the scheduler actor.
///
/// Every call is a request/reply round trip; once the actor has exited they
/// fail with [`Error::ActorStopped`].
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerMessage>,
}

impl SchedulerHandle {
    pub(crate) fn new(sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SchedulerMessage,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(message(reply))
            .await
            .map_err(|_| Error::ActorStopped("scheduler"))?;
        rx.await.map_err(|_| Error::ActorStopped("scheduler"))
    }

    /// Start the selected channel(s).
    pub async fn start(&self, selector: ChannelSelector) -> Result<()> {
        self.request(|reply| SchedulerMessage::Start { selector, reply })
            .await?
    }

    /// Stop the selected channel(s).
    pub async fn stop(&self, selector: ChannelSelector) -> Result<()> {
        self.request(|reply| SchedulerMessage::Stop { selector, reply })
            .await?
    }

    /// Stop every channel and close every streamer.
    pub async fn stop_all(&self) -> Result<ShutdownReport> {
        self.request(|reply| SchedulerMessage::StopAll { reply }).await
    }

    /// Install streamers for a new registration epoch.
    pub async fn rebind(&self, port_base: u16, problems: ProblemSink) -> Result<()> {
        self.request(|reply| SchedulerMessage::Rebind {
            port_base,
            problems,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        self.request(|reply| SchedulerMessage::Status { reply }).await
    }

    /// Tear everything down, close the queues and end the actor.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        self.request(|reply| SchedulerMessage::Shutdown { reply })
            .await
    }
}
