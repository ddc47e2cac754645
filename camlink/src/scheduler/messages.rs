use std::str::FromStr;

use serde::Serialize;
use tokio::sync::oneshot;

use super::service::{SchedulerStatus, ShutdownReport};
use crate::Result;
use crate::streamer::ProblemSink;

/// Which channels a start/stop applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelector {
    All,
    Index(usize),
}

impl FromStr for ChannelSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<usize>()
            .map(Self::Index)
            .map_err(|_| format!("expected a channel index or 'all', got '{}'", s))
    }
}

impl std::fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Mailbox messages for the scheduler actor.
#[derive(Debug)]
pub enum SchedulerMessage {
    Start {
        selector: ChannelSelector,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        selector: ChannelSelector,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Stop every channel and close every streamer.
    StopAll {
        reply: oneshot::Sender<ShutdownReport>,
    },
    /// Install streamers for a new registration epoch.
    Rebind {
        port_base: u16,
        problems: ProblemSink,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<SchedulerStatus>,
    },
    /// Tear down and exit.
    Shutdown {
        reply: oneshot::Sender<ShutdownReport>,
    },
}
