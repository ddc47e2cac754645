//! Capture channels: run state, the worker loop and the egress queue.

mod queue;
mod state;
mod worker;

pub use queue::{EgressReceiver, EgressSender, Handoff, egress_queue};
pub use state::ChannelState;
pub use worker::{Channel, ChannelSnapshot};
