//! camlink - camera streaming edge agent.
//!
//! Detects capture devices, registers the host with a backend, and streams
//! compressed frames to it over framed TCP connections while watching link
//! health and recovering from failures.

pub mod api;
pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod streamer;
pub mod supervisor;

pub use error::{Error, Result};
