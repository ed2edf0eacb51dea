//! Application configuration for the `memdaq` binary.
//!
//! Settings are loaded with the `config` crate from two layered sources:
//! an optional TOML file (`memdaq.toml` in the working directory, or an
//! explicit path) and `MEMDAQ_`-prefixed environment variables, with the
//! environment taking precedence. Nested keys use `__` in the environment,
//! so `MEMDAQ_STORAGE__DEFAULT_PATH=/tmp/runs` overrides
//! `storage.default_path`.
//!
//! Every field has a default, so an empty configuration is valid and the
//! binary runs without any file present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};

/// Top-level settings for the command-line frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log filter applied when no `-v` flags are given
    /// (`error`, `warn`, `info`, `debug` or `trace`).
    pub log_level: String,
    /// Where exported run files go.
    pub storage: StorageSettings,
    /// Which simulated instrument the run commands drive.
    pub instrument: InstrumentSettings,
    /// Optional TOML file with per-model timing-limit overrides, applied to
    /// the profile registry at startup.
    pub profile_overrides: Option<PathBuf>,
}

/// Export destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory run files are written into.
    pub default_path: String,
}

/// Instrument selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Hardware model string used to pick timing limits. Unknown models fall
    /// back to the conservative generic profile.
    pub model: String,
    /// Seed for the simulated device; omit for a different device each run.
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            storage: StorageSettings::default(),
            instrument: InstrumentSettings::default(),
            profile_overrides: None,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            default_path: "./data".to_string(),
        }
    }
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            model: "generic".to_string(),
            seed: None,
        }
    }
}

impl Settings {
    /// Load settings from file and environment.
    ///
    /// With `path` given, that file must exist; otherwise `memdaq.toml` in
    /// the working directory is read if present. `MEMDAQ_`-prefixed
    /// environment variables override file values either way.
    pub fn load(path: Option<&Path>) -> DaqResult<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("memdaq").required(false)),
        };
        let cfg = builder
            .add_source(config::Environment::with_prefix("MEMDAQ").separator("__"))
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values no layer should have produced.
    pub fn validate(&self) -> DaqResult<()> {
        const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.log_level.as_str()) {
            return Err(DaqError::InvalidParameter(format!(
                "log_level '{}' is not one of {LEVELS:?}",
                self.log_level
            )));
        }
        Ok(())
    }
}
