//! Host identity probes used at registration.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::{Error, Result};

/// Platform tag for Raspberry Pi class boards.
pub const PLATFORM_PI: &str = "pi";
/// Platform tag for everything else.
pub const PLATFORM_OTHER: &str = "other";

/// What the backend learns about the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub platform: String,
    pub ip: IpAddr,
    pub serial: String,
}

/// Host identity lookups. Implementations may block.
pub trait DeviceProbe: Send + Sync {
    fn platform(&self) -> Result<String>;

    fn ip_address(&self) -> Result<IpAddr>;

    fn serial_number(&self) -> Result<String>;

    /// Run all three probes.
    fn identify(&self) -> Result<DeviceIdentity> {
        Ok(DeviceIdentity {
            platform: self.platform()?,
            ip: self.ip_address()?,
            serial: self.serial_number()?,
        })
    }
}

/// Probes the running host the way the field devices expect.
///
/// - platform: `uname -m`; `aarch64`/`armv7l` map to `pi`
/// - serial: `Serial` line of `/proc/cpuinfo` on a pi, DMI board serial
///   elsewhere
/// - IP: the outbound interface address on a pi, loopback elsewhere
#[derive(Debug)]
pub struct SystemProbe {
    cpuinfo_path: PathBuf,
    board_serial_path: PathBuf,
    /// Address used to pick the outbound interface. Nothing is sent.
    route_probe_addr: String,
    platform: OnceLock<String>,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            cpuinfo_path: PathBuf::from("/proc/cpuinfo"),
            board_serial_path: PathBuf::from("/sys/class/dmi/id/board_serial"),
            route_probe_addr: "8.8.8.8:80".to_string(),
            platform: OnceLock::new(),
        }
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_pi(&self) -> Result<bool> {
        Ok(self.platform()? == PLATFORM_PI)
    }
}

/// Map a `uname -m` machine name to a platform tag.
pub fn platform_for_machine(machine: &str) -> &'static str {
    match machine.trim() {
        "aarch64" | "armv7l" => PLATFORM_PI,
        _ => PLATFORM_OTHER,
    }
}

/// Extract the `Serial` field from `/proc/cpuinfo` contents.
pub fn parse_cpuinfo_serial(cpuinfo: &str) -> Option<String> {
    let pattern = Regex::new(r"(?m)^Serial\s*:\s*([0-9A-Fa-f]+)\s*$").ok()?;
    pattern
        .captures(cpuinfo)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

impl DeviceProbe for SystemProbe {
    fn platform(&self) -> Result<String> {
        if let Some(platform) = self.platform.get() {
            return Ok(platform.clone());
        }

        let output = Command::new("uname")
            .arg("-m")
            .output()
            .map_err(|e| Error::probe(format!("failed to run uname: {}", e)))?;
        if !output.status.success() {
            return Err(Error::probe(format!("uname exited with {}", output.status)));
        }

        let machine = String::from_utf8_lossy(&output.stdout);
        let platform = platform_for_machine(&machine).to_string();
        debug!(machine = %machine.trim(), platform = %platform, "Identified platform");
        Ok(self.platform.get_or_init(|| platform).clone())
    }

    fn ip_address(&self) -> Result<IpAddr> {
        if !self.is_pi()? {
            return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket
            .connect(&self.route_probe_addr)
            .map_err(|e| Error::probe(format!("no route for IP discovery: {}", e)))?;
        Ok(socket.local_addr()?.ip())
    }

    fn serial_number(&self) -> Result<String> {
        if self.is_pi()? {
            let cpuinfo = std::fs::read_to_string(&self.cpuinfo_path)?;
            parse_cpuinfo_serial(&cpuinfo)
                .ok_or_else(|| Error::probe("no Serial entry in cpuinfo"))
        } else {
            let serial = std::fs::read_to_string(&self.board_serial_path)?;
            let serial = serial.trim();
            if serial.is_empty() {
                return Err(Error::probe("board serial is empty"));
            }
            Ok(serial.to_string())
        }
    }
}

/// A probe that reports a fixed identity.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub identity: DeviceIdentity,
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity {
                platform: PLATFORM_OTHER.to_string(),
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                serial: "0000000000000000".to_string(),
            },
        }
    }
}

impl DeviceProbe for StaticProbe {
    fn platform(&self) -> Result<String> {
        Ok(self.identity.platform.clone())
    }

    fn ip_address(&self) -> Result<IpAddr> {
        Ok(self.identity.ip)
    }

    fn serial_number(&self) -> Result<String> {
        Ok(self.identity.serial.clone())
    }
}
