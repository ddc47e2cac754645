//! Startup device detection.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use super::{FrameSource, SourceFactory};
use crate::{Error, Result};

/// A device that opened and produced a probe frame.
pub struct DetectedDevice {
    pub device: u32,
    pub source: Box<dyn FrameSource>,
}

impl std::fmt::Debug for DetectedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectedDevice")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Device indices to probe.
///
/// A non-empty `known` list is used as-is. Otherwise `dev_dir` is scanned for
/// `video<N>` nodes, returned in ascending order.
pub fn candidate_devices(known: &[u32], dev_dir: &Path) -> Result<Vec<u32>> {
    if !known.is_empty() {
        return Ok(known.to_vec());
    }

    let pattern = Regex::new(r"^video(\d+)$").map_err(|e| Error::Other(e.to_string()))?;
    let mut devices = Vec::new();

    for entry in std::fs::read_dir(dev_dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(index) = pattern
            .captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            devices.push(index);
        }
    }

    devices.sort_unstable();
    devices.dedup();
    debug!(?devices, dir = %dev_dir.display(), "Scanned for video devices");
    Ok(devices)
}

/// Open every candidate and keep the ones that deliver a frame.
///
/// Repeats for up to `attempts` passes, stopping at the first pass that finds
/// at least one device. Channel order follows `candidates`.
pub async fn detect_channels(
    factory: Arc<dyn SourceFactory>,
    candidates: &[u32],
    attempts: u32,
    pass_delay: Duration,
) -> Result<Vec<DetectedDevice>> {
    for attempt in 1..=attempts {
        let mut found = Vec::new();

        for &device in candidates {
            let factory = factory.clone();
            let probe = tokio::task::spawn_blocking(move || {
                let mut source = factory.open(device)?;
                source.next_frame()?;
                Ok::<_, Error>(source)
            })
            .await;

            match probe {
                Ok(Ok(source)) => {
                    debug!(device, "Device delivered a probe frame");
                    found.push(DetectedDevice { device, source });
                }
                Ok(Err(e)) => debug!(device, error = %e, "Device probe failed"),
                Err(e) => warn!(device, error = %e, "Device probe task failed"),
            }
        }

        if !found.is_empty() {
            info!(
                devices = ?found.iter().map(|d| d.device).collect::<Vec<_>>(),
                attempt,
                "Detected capture channels"
            );
            return Ok(found);
        }

        warn!(attempt, attempts, "No capture devices responded");
        if attempt < attempts {
            tokio::time::sleep(pass_delay).await;
        }
    }

    Err(Error::NoChannels)
}
