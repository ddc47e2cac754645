//! Agent configuration.
//!
//! Values come from command-line flags with `CAMLINK_*` environment fallbacks
//! (a `.env` file is loaded first by the binary). [`Args::into_config`]
//! validates them once into an immutable [`AgentConfig`] that is handed to
//! every component at construction time.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::supervisor::RetryPolicy;
use crate::{Error, Result};

/// How channels share the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// Every started channel runs with its own queue, streamer and port.
    Parallel,
    /// One active channel at a time, swapped on a timer, sharing one stream.
    Rotating,
}

impl std::fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel => write!(f, "parallel"),
            Self::Rotating => write!(f, "rotating"),
        }
    }
}

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "camlink", version, about = "Camera streaming edge agent")]
pub struct Args {
    /// Address the control API listens on.
    #[arg(long, env = "CAMLINK_LISTEN", default_value = "0.0.0.0:4000")]
    pub listen: String,

    /// Backend host (HTTP control plane and TCP stream sink).
    #[arg(long = "behost", env = "CAMLINK_BACKEND_HOST", default_value = "localhost")]
    pub backend_host: String,

    /// Backend HTTP port.
    #[arg(long = "beport", env = "CAMLINK_BACKEND_PORT", default_value_t = 8080)]
    pub backend_port: u16,

    /// Path polled for link health; the backend must answer `ok`.
    #[arg(long, env = "CAMLINK_HEALTH_PATH", default_value = "/health")]
    pub health_path: String,

    /// Health poll interval in milliseconds.
    #[arg(long, env = "CAMLINK_HEALTH_INTERVAL_MS", default_value_t = 1000)]
    pub health_interval_ms: u64,

    /// Per-request timeout for health polls in seconds (0 = none).
    #[arg(long, env = "CAMLINK_HEALTH_TIMEOUT_SECS", default_value_t = 0)]
    pub health_timeout_secs: u64,

    /// Maximum registration attempts before giving up.
    #[arg(long, env = "CAMLINK_RETRIES", default_value_t = 5000)]
    pub retries: u32,

    /// Delay between registration attempts in seconds.
    #[arg(long, env = "CAMLINK_REGISTER_DELAY_SECS", default_value_t = 3)]
    pub register_delay_secs: u64,

    /// Delay before reporting a failed stream dial, in seconds.
    #[arg(long, env = "CAMLINK_RECONNECT_BACKOFF_SECS", default_value_t = 3)]
    pub reconnect_backoff_secs: u64,

    /// Channel scheduling mode.
    #[arg(long, env = "CAMLINK_MODE", value_enum, default_value_t = SchedulingMode::Parallel)]
    pub mode: SchedulingMode,

    /// Rotation interval in seconds (rotating mode).
    #[arg(long, env = "CAMLINK_ROTATION_SECS", default_value_t = 60)]
    pub rotation_secs: u64,

    /// Known video device numbers as a JSON array; empty scans /dev.
    #[arg(long = "vids", env = "CAMLINK_VIDS", default_value = "[0,2,4,6]")]
    pub vids: String,

    /// Detection passes before giving up on finding any device.
    #[arg(long, env = "CAMLINK_DETECT_ATTEMPTS", default_value_t = 5)]
    pub detect_attempts: u32,

    /// Target frame rate per channel (0 = unpaced).
    #[arg(long, env = "CAMLINK_FPS", default_value_t = 10)]
    pub fps: u32,

    /// JPEG quality, 1-100.
    #[arg(long, env = "CAMLINK_JPEG_QUALITY", default_value_t = 50)]
    pub jpeg_quality: u8,

    /// Capture width in pixels.
    #[arg(long, env = "CAMLINK_FRAME_WIDTH", default_value_t = 320)]
    pub frame_width: u32,

    /// Capture height in pixels.
    #[arg(long, env = "CAMLINK_FRAME_HEIGHT", default_value_t = 160)]
    pub frame_height: u32,

    /// Owner tag sent at registration.
    #[arg(long, env = "CAMLINK_OWNER", default_value = "echo")]
    pub owner: String,

    /// Start every channel as soon as the device is registered.
    #[arg(long, env = "CAMLINK_AUTOSTART", default_value_t = false)]
    pub autostart: bool,

    /// Directory for rolling log files.
    #[arg(long, env = "CAMLINK_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

impl Args {
    /// Validate the raw arguments into an [`AgentConfig`].
    pub fn into_config(self) -> Result<AgentConfig> {
        let listen_addr: SocketAddr = self
            .listen
            .parse()
            .map_err(|e| Error::config(format!("invalid listen address '{}': {}", self.listen, e)))?;

        if self.backend_host.trim().is_empty() {
            return Err(Error::config("backend host must not be empty"));
        }
        if self.retries == 0 {
            return Err(Error::config("retries must be at least 1"));
        }
        if self.health_interval_ms == 0 {
            return Err(Error::config("health interval must be positive"));
        }
        if self.rotation_secs == 0 {
            return Err(Error::config("rotation interval must be positive"));
        }
        if self.detect_attempts == 0 {
            return Err(Error::config("detect attempts must be at least 1"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::config(format!(
                "jpeg quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(Error::config("frame dimensions must be positive"));
        }

        let health_path = if self.health_path.starts_with('/') {
            self.health_path
        } else {
            format!("/{}", self.health_path)
        };

        Ok(AgentConfig {
            listen_addr,
            backend: BackendConfig {
                host: self.backend_host,
                port: self.backend_port,
                health_path,
                health_timeout: (self.health_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.health_timeout_secs)),
            },
            registration: RetryPolicy::new(
                self.retries,
                Duration::from_secs(self.register_delay_secs),
            ),
            health_interval: Duration::from_millis(self.health_interval_ms),
            reconnect_backoff: Duration::from_secs(self.reconnect_backoff_secs),
            mode: self.mode,
            rotation_interval: Duration::from_secs(self.rotation_secs),
            known_devices: parse_device_list(&self.vids)?,
            detect_attempts: self.detect_attempts,
            capture: CaptureConfig {
                fps: self.fps,
                jpeg_quality: self.jpeg_quality,
                width: self.frame_width,
                height: self.frame_height,
            },
            owner: self.owner,
            autostart: self.autostart,
            log_dir: self.log_dir,
        })
    }
}

/// Parse the `--vids` JSON array. An empty or blank string means "scan".
pub fn parse_device_list(raw: &str) -> Result<Vec<u32>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| Error::config(format!("failed to parse device list '{}': {}", raw, e)))
}

/// Backend endpoint settings.
#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub health_path: String,
    pub health_timeout: Option<Duration>,
}

impl BackendConfig {
    /// Base URL of the backend HTTP API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Capture and compression settings shared by all channels.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CaptureConfig {
    pub fps: u32,
    pub jpeg_quality: u8,
    pub width: u32,
    pub height: u32,
}

impl CaptureConfig {
    /// Time budget for one frame, or `None` when unpaced.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.fps > 0).then(|| Duration::from_secs_f64(1.0 / self.fps as f64))
    }
}

/// Validated, immutable agent configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    pub backend: BackendConfig,
    pub registration: RetryPolicy,
    pub health_interval: Duration,
    pub reconnect_backoff: Duration,
    pub mode: SchedulingMode,
    pub rotation_interval: Duration,
    pub known_devices: Vec<u32>,
    pub detect_attempts: u32,
    pub capture: CaptureConfig,
    pub owner: String,
    pub autostart: bool,
    pub log_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            backend: BackendConfig {
                host: "localhost".to_string(),
                port: 8080,
                health_path: "/health".to_string(),
                health_timeout: None,
            },
            registration: RetryPolicy::default(),
            health_interval: Duration::from_secs(1),
            reconnect_backoff: Duration::from_secs(3),
            mode: SchedulingMode::Parallel,
            rotation_interval: Duration::from_secs(60),
            known_devices: vec![0, 2, 4, 6],
            detect_attempts: 5,
            capture: CaptureConfig {
                fps: 10,
                jpeg_quality: 50,
                width: 320,
                height: 160,
            },
            owner: "echo".to_string(),
            autostart: false,
            log_dir: PathBuf::from("logs"),
        }
    }
}
