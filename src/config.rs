//! Tracer configuration
//!
//! All limits that shape the capture path live here: the runaway frame limit,
//! the watchdog cadence, the dispatch buffer size and the hint allow-list kept
//! across an abort. Values load from TOML (every field optional) and are
//! checked with [`TracerConfig::validate`] before a tracer is built.
//!
//! # Example TOML
//! ```toml
//! server_name = "checkout-01"
//! max_frames = 2000
//! max_trace_duration_secs = 30
//! watchdog_interval_millis = 1000
//! dispatch_buffer_capacity = 100
//! debug_unknown_applications = true
//! ```

use crate::error::{Result, TrazoError};
use crate::hints::keys;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration consumed by [`crate::tracer::TracerBuilder`]
///
/// # Example
/// ```
/// use trazo::config::TracerConfig;
///
/// let config = TracerConfig::default();
/// assert_eq!(config.max_frames, 1000);
/// assert_eq!(config.dispatch_buffer_capacity, 50);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TracerConfig {
    /// Name stamped on every trace as the reporting server
    pub server_name: String,

    /// Maximum frames per trace before the builder is marked aborted
    ///
    /// Default: 1000
    pub max_frames: usize,

    /// Age of the top-of-stack frame after which the watchdog unwinds a context
    ///
    /// Default: 60 seconds
    pub max_trace_duration_secs: u64,

    /// Interval between watchdog sweeps
    ///
    /// Default: 5000ms
    pub watchdog_interval_millis: u64,

    /// Capacity of the dispatcher's replay buffer (oldest evicted on overflow)
    ///
    /// Default: 50
    pub dispatch_buffer_capacity: usize,

    /// Attach a diagnostic frame to traces whose application could not be resolved
    pub debug_unknown_applications: bool,

    /// Hints that survive an abort-triggered reset
    ///
    /// Default: `["application-name"]`
    pub preserved_hints: Vec<String>,

    /// Initial percentage (0-100) of traces downgraded to endpoint-only collection
    pub endpoint_only_ratio: u8,

    /// Failures of one aspect before it is switched off automatically
    ///
    /// Default: 3
    pub aspect_failure_threshold: u32,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            max_frames: 1000,
            max_trace_duration_secs: 60,
            watchdog_interval_millis: 5000,
            dispatch_buffer_capacity: 50,
            debug_unknown_applications: false,
            preserved_hints: vec![keys::APPLICATION_NAME.to_string()],
            endpoint_only_ratio: 0,
            aspect_failure_threshold: 3,
        }
    }
}

impl TracerConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TracerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Preset for tests and short-lived tools: fast watchdog, short deadline
    pub fn short_lived() -> Self {
        Self {
            max_trace_duration_secs: 1,
            watchdog_interval_millis: 100,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_frames == 0 {
            return Err(TrazoError::InvalidConfig(
                "max_frames must be > 0".to_string(),
            ));
        }

        if self.max_trace_duration_secs == 0 {
            return Err(TrazoError::InvalidConfig(
                "max_trace_duration_secs must be > 0".to_string(),
            ));
        }

        if self.watchdog_interval_millis == 0 {
            return Err(TrazoError::InvalidConfig(
                "watchdog_interval_millis must be > 0".to_string(),
            ));
        }

        if self.dispatch_buffer_capacity == 0 {
            return Err(TrazoError::InvalidConfig(
                "dispatch_buffer_capacity must be > 0".to_string(),
            ));
        }

        if self.endpoint_only_ratio > 100 {
            return Err(TrazoError::InvalidConfig(format!(
                "endpoint_only_ratio must be in [0, 100], got {}",
                self.endpoint_only_ratio
            )));
        }

        Ok(())
    }

    pub fn max_trace_duration(&self) -> Duration {
        Duration::from_secs(self.max_trace_duration_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_millis)
    }
}
