use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{ComparatorError, Result};
use crate::session::period_for;
use crate::window::DEFAULT_WINDOW_CAPACITY;

/// Default depth of the envelope bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Runtime settings of the comparison service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparatorConfig {
    /// Conference id on the bus.
    pub cid: u16,
    /// Report frequency in Hz.
    pub freq_hz: f32,
    /// Samples retained per window.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Depth of the envelope bus (and of each subscriber's queue).
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Structured JSON-lines log, if any.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// File recording every received envelope, if any.
    #[serde(default)]
    pub tap_path: Option<PathBuf>,
}

/// Partial configuration as read from a TOML file; every field may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Conference id.
    pub cid: Option<u16>,
    /// Report frequency in Hz.
    pub freq_hz: Option<f32>,
    /// Samples retained per window.
    pub window_capacity: Option<usize>,
    /// Depth of the envelope bus.
    pub bus_capacity: Option<usize>,
    /// Structured log path, relative to the file.
    pub log_path: Option<PathBuf>,
    /// Envelope tap path, relative to the file.
    pub tap_path: Option<PathBuf>,
}

impl ConfigFile {
    /// Loads a TOML file; relative paths inside it are resolved against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            ComparatorError::Config(format!("reading {}: {err}", path.display()))
        })?;
        let mut file: Self = toml::from_str(&raw)
            .map_err(|err| ComparatorError::Config(format!("parsing {}: {err}", path.display())))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        for candidate in [&mut file.log_path, &mut file.tap_path].into_iter().flatten() {
            if candidate.is_relative() {
                *candidate = base.join(&*candidate);
            }
        }
        Ok(file)
    }

    /// Fills in defaults; `cid` and `freq_hz` have none and must be present.
    pub fn into_config(self) -> Result<ComparatorConfig> {
        let cid = self
            .cid
            .ok_or_else(|| ComparatorError::Config("missing cid".into()))?;
        let freq_hz = self
            .freq_hz
            .ok_or_else(|| ComparatorError::Config("missing freq".into()))?;
        let config = ComparatorConfig {
            cid,
            freq_hz,
            window_capacity: self.window_capacity.unwrap_or(DEFAULT_WINDOW_CAPACITY),
            bus_capacity: self.bus_capacity.unwrap_or(DEFAULT_BUS_CAPACITY),
            log_path: self.log_path,
            tap_path: self.tap_path,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ComparatorConfig {
    /// Settings with default capacities and no log or tap.
    #[must_use]
    pub const fn new(cid: u16, freq_hz: f32) -> Self {
        Self {
            cid,
            freq_hz,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            log_path: None,
            tap_path: None,
        }
    }

    /// Loads and validates a complete configuration from TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        ConfigFile::load(path)?.into_config()
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        period_for(self.freq_hz)?;
        if self.window_capacity == 0 {
            return Err(ComparatorError::Config("window_capacity must be at least 1".into()));
        }
        if self.bus_capacity == 0 {
            return Err(ComparatorError::Config("bus_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

const fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

const fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}
