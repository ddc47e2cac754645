//! Control-plane supervision: registration, link health and recovery.

mod backend;
mod health;
mod probe;
mod registration;
mod service;

pub use backend::{Backend, HEALTHY_BODY, HttpBackend};
pub use health::HealthMonitor;
pub use probe::{
    DeviceIdentity, DeviceProbe, PLATFORM_OTHER, PLATFORM_PI, StaticProbe, SystemProbe,
    parse_cpuinfo_serial, platform_for_machine,
};
pub use registration::{
    DeviceRegistration, RegisterRequest, RegisterResponse, Registrar, RetryPolicy,
};
pub use service::{
    ControlCommand, Supervisor, SupervisorHandle, SupervisorPhase, SupervisorStatus,
};
