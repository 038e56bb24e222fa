//! Error types for the LD2410 sensor

use ld2410_protocol::ProtocolError;
use thiserror::Error;

/// One gate whose sensitivity could not be written
#[derive(Debug)]
pub struct GateFailure {
    pub gate: u8,
    pub error: ProtocolError,
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gate {}: {}", self.gate, self.error)
    }
}

/// Errors that can occur while operating the sensor
#[derive(Error, Debug)]
pub enum SensorError {
    /// Transport or frame level failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Requested channel not present in the last sample
    #[error("No data for requested channel")]
    NoData,

    /// Value out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Channel/attribute combination or trigger not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Some gates rejected their sensitivity update
    #[error("Failed to set sensitivity for {} gate(s): {}", .failures.len(), format_failures(.failures))]
    GateSensitivity { failures: Vec<GateFailure> },

    /// Malformed configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (configuration file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_failures(failures: &[GateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
