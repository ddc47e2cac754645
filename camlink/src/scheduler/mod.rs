//! Channel scheduling.
//!
//! The scheduler owns the detected channels and decides which of them feed
//! the uplink:
//!
//! - **Parallel**: every started channel has its own queue, streamer and
//!   port (`port_base + position`).
//! - **Rotating**: one channel at a time on a shared queue and streamer
//!   (`port_base`), advanced round-robin on a timer.
//!
//! It runs as an actor; [`SchedulerHandle`] is its only entry point.

mod channel_set;
mod handle;
mod messages;
mod service;

pub use channel_set::{ChannelSet, Rotation};
pub use handle::{DEFAULT_MAILBOX_CAPACITY, SchedulerHandle};
pub use messages::ChannelSelector;
pub use service::{
    DEFAULT_CHANNEL_STOP_TIMEOUT, Scheduler, SchedulerConfig, SchedulerStatus, ShutdownReport,
};
