//! Bench configuration
//!
//! Everything that differs between two benches (device paths, capture
//! defaults, where artifacts go) lives in `bench.toml`. Every field has a
//! default, so a missing section falls back to the standard bench wiring.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureRequest;
use crate::error::Result;
use crate::power_supply::PowerSupplySettings;
use crate::verify::EdgePolicy;

/// Default location of the configuration file
pub const CONFIG_FILE: &str = "bench.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub output_dir: PathBuf,
    pub power_supply: PowerSupplyConfig,
    pub capture: CaptureDefaults,
    pub verify: VerifyConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            power_supply: PowerSupplyConfig::default(),
            capture: CaptureDefaults::default(),
            verify: VerifyConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Read and parse a configuration file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read `bench.toml` if it exists, otherwise use the defaults
    pub fn read_or_default() -> Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            Self::read(CONFIG_FILE)
        } else {
            log::debug!("No {CONFIG_FILE} found, using default bench configuration");
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PowerSupplyConfig {
    pub port: PathBuf,
    pub baud_rate: u32,
    pub settle_delay_ms: u64,
    pub query_timeout_ms: u64,
    pub terminator: String,
}

impl Default for PowerSupplyConfig {
    fn default() -> Self {
        Self {
            port: PathBuf::from("/dev/ttyPowerSupply"),
            baud_rate: 9600,
            settle_delay_ms: 1000,
            query_timeout_ms: 1000,
            terminator: "\n".to_string(),
        }
    }
}

impl PowerSupplyConfig {
    pub fn settings(&self) -> PowerSupplySettings {
        PowerSupplySettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            terminator: self.terminator.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureDefaults {
    pub sample_rate_hz: u32,
    pub threshold_volts: f64,
    pub duration_seconds: f64,
    /// Extra time granted to the device after the capture duration
    pub grace_period_seconds: f64,
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10_000_000,
            threshold_volts: 3.3,
            duration_seconds: 10.0,
            grace_period_seconds: 5.0,
        }
    }
}

impl CaptureDefaults {
    /// Build a request for `channels` with the configured rate, threshold and duration.
    ///
    /// The request is not validated here; `CaptureManager::configure` does that.
    pub fn request(&self, channels: impl IntoIterator<Item = u8>) -> CaptureRequest {
        CaptureRequest {
            channels: channels.into_iter().collect::<BTreeSet<_>>(),
            sample_rate_hz: self.sample_rate_hz,
            threshold_volts: self.threshold_volts,
            duration: Duration::try_from_secs_f64(self.duration_seconds).unwrap_or_default(),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.grace_period_seconds).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    /// Upper bound (exclusive) on edge transitions, 0 disables the bound
    pub max_transitions: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            max_transitions: EdgePolicy::DEFAULT_MAX_TRANSITIONS,
        }
    }
}

impl VerifyConfig {
    pub fn edge_policy(&self, channel: Option<u8>) -> EdgePolicy {
        EdgePolicy {
            channel,
            max_transitions: (self.max_transitions > 0).then_some(self.max_transitions),
        }
    }
}
