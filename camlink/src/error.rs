//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture error on device {device}: {reason}")]
    Capture { device: u32, reason: String },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Invalid channel {index}: {count} channel(s) configured")]
    InvalidChannel { index: usize, count: usize },

    #[error("Device is not registered with the backend")]
    NotRegistered,

    #[error("No capture channels detected")]
    NoChannels,

    #[error("Registration failed after {attempts} attempt(s): {last_error}")]
    RegistrationExhausted { attempts: u32, last_error: String },

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0} is no longer running")]
    ActorStopped(&'static str),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn capture(device: u32, reason: impl Into<String>) -> Self {
        Self::Capture {
            device,
            reason: reason.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RegistrationExhausted { .. } | Self::NoChannels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_channel_message() {
        let err = Error::InvalidChannel { index: 7, count: 2 };
        assert_eq!(err.to_string(), "Invalid channel 7: 2 channel(s) configured");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(
            Error::RegistrationExhausted {
                attempts: 3,
                last_error: "connection refused".into()
            }
            .is_fatal()
        );
        assert!(Error::NoChannels.is_fatal());
        assert!(!Error::HealthCheck("body was 'nope'".into()).is_fatal());
        assert!(!Error::NotRegistered.is_fatal());
    }
}
