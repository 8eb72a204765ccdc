use std::path::PathBuf;

use polars::prelude::PolarsError;

/// Result type used throughout the harness
pub type Result<T = ()> = std::result::Result<T, HarnessError>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Bad request or binding parameters, caught before any device interaction
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The capture device or the instrument could not be reached
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Channel {channel} is not part of the capture (enabled: {enabled:?})")]
    UnknownChannel { channel: u8, enabled: Vec<u8> },

    #[error("Export to {} failed: {source}", path.display())]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Verification failed: {explanation} ({} rows observed)", rows.len())]
    VerificationFailure {
        explanation: String,
        rows: Vec<Vec<String>>,
    },

    #[error("Analyzer '{label}' produced a {found} frame, expected {expected}")]
    UnexpectedFrame {
        label: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] PolarsError),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl HarnessError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::DeviceUnavailable(message.into())
    }

    pub(crate) fn export_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ExportIo {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the expected, user-visible failure mode of a test run
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Self::VerificationFailure { .. })
    }
}
