use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// What went wrong on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemKind {
    /// The backend could not be reached.
    Disconnect,
}

/// A connectivity failure reported by a streamer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// Registration epoch of the streamer that reported it.
    pub epoch: u64,
    pub port: u16,
    pub kind: ProblemKind,
    pub reason: String,
}

/// Channel through which streamers report problems to the supervisor.
///
/// Every sink is stamped with the registration epoch it was created for, so
/// the supervisor can discard reports from streamers it already tore down.
#[derive(Debug, Clone)]
pub struct ProblemSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<Problem>,
}

impl ProblemSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<Problem>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Report a problem. Never blocks.
    pub fn report(&self, port: u16, kind: ProblemKind, reason: impl Into<String>) {
        let problem = Problem {
            epoch: self.epoch,
            port,
            kind,
            reason: reason.into(),
        };
        if self.tx.send(problem).is_err() {
            debug!(port, "Problem receiver is gone, dropping report");
        }
    }
}
