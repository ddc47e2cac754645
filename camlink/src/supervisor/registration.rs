//! Device registration with the backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::backend::Backend;
use super::probe::DeviceProbe;
use crate::{Error, Result};

/// Bounded, fixed-delay retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Upper bound on attempts, the first one included.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5000, Duration::from_secs(3))
    }
}

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub serial: String,
    pub ip: String,
    pub platform: String,
    pub owner: String,
    pub channel_count: usize,
}

/// Backend answer to a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub assigned_id: String,
    /// First TCP port assigned to this device's streams.
    pub port_base: u16,
    #[serde(default)]
    pub channel_count: usize,
}

/// Result of one successful registration. Replaced wholesale on the next.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRegistration {
    pub epoch: u64,
    pub device_id: String,
    pub serial: String,
    pub ip: String,
    pub platform: String,
    pub owner: String,
    pub channel_count: usize,
    pub port_base: u16,
    pub registered_at: DateTime<Utc>,
}

/// Everything needed to register, cheap to clone into a task.
#[derive(Clone)]
pub struct Registrar {
    pub backend: Arc<dyn Backend>,
    pub probe: Arc<dyn DeviceProbe>,
    pub owner: String,
    pub channel_count: usize,
    pub policy: RetryPolicy,
}

impl Registrar {
    /// One attempt: probe the device, then register it.
    pub async fn register_once(&self, epoch: u64) -> Result<DeviceRegistration> {
        let probe = self.probe.clone();
        let identity = tokio::task::spawn_blocking(move || probe.identify())
            .await
            .map_err(|e| Error::probe(format!("probe task failed: {}", e)))??;

        let request = RegisterRequest {
            serial: identity.serial,
            ip: identity.ip.to_string(),
            platform: identity.platform,
            owner: self.owner.clone(),
            channel_count: self.channel_count,
        };
        let response = self.backend.register(&request).await?;

        Ok(DeviceRegistration {
            epoch,
            device_id: response.assigned_id,
            serial: request.serial,
            ip: request.ip,
            platform: request.platform,
            owner: request.owner,
            channel_count: request.channel_count,
            port_base: response.port_base,
            registered_at: Utc::now(),
        })
    }

    /// Register, retrying per the policy.
    ///
    /// Makes at most `max_attempts` attempts with `delay` between them.
    /// Returns `Ok(None)` if `cancel` fires first and
    /// [`Error::RegistrationExhausted`] once the attempts run out.
    pub async fn register_with_retry(
        &self,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<DeviceRegistration>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                result = self.register_once(epoch) => result,
            };

            match result {
                Ok(registration) => {
                    info!(
                        device_id = %registration.device_id,
                        port_base = registration.port_base,
                        epoch,
                        attempt,
                        "Device registered"
                    );
                    return Ok(Some(registration));
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Registration attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(self.policy.delay) => {}
                }
            }
        }

        Err(Error::RegistrationExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
