use serde::Serialize;

/// Run state of a capture channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Detected, never started.
    #[default]
    Ready,
    /// Run loop active.
    Running,
    /// Stop signalled, run loop still finishing its iteration.
    Stopping,
    /// Run loop exited.
    Stopped,
}

impl ChannelState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
