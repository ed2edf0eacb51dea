//! Hardware profile registry: per-model timing and range limits.
//!
//! Every timing validation reads limits from a [`ProfileRegistry`] owned by
//! the service. Lookup never fails: unknown models fall back to the
//! conservative generic profile, so an operation against an uncatalogued
//! instrument is clamped rather than rejected.
//!
//! # Profile Sources
//!
//! 1. Built-in table ([`BUILTIN_PROFILES`]), seeded into every registry.
//! 2. Optional TOML override file ([`ProfileRegistry::load_overrides`])
//!    merging partial profiles over the built-ins.
//! 3. Runtime recalibration via [`ProfileRegistry::update_limits`]
//!    (e.g. after a cable-length measurement tightens an edge-rate limit).
//!
//! Registry mutations affect that registry value only; nothing is global
//! and nothing is persisted.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use log::info;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::DaqResult;
use crate::sweep::SweepShape;

/// Model key of the fallback profile.
pub const GENERIC_MODEL: &str = "generic";

// =============================================================================
// Profile Data
// =============================================================================

/// Timing and range limits for one instrument model.
///
/// # Fields
///
/// * `model` - Model key, matching the registry entry (e.g. "Keithley 4200A_pmu")
/// * `min_timing` - Smallest programmable delay or sample interval
/// * `min_pulse_width` - Smallest pulse width the output stage can form
/// * `min_rise_fall` - Smallest programmable edge time
/// * `voltage_range_v` - Inclusive (min, max) source voltage in volts
/// * `current_range_a` - Inclusive (min, max) current in amperes
/// * `compliance_resolution_a` - Smallest distinguishable compliance step
/// * `defaults` - Model-specific default operating values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Model key, matching the registry entry.
    pub model: String,
    /// Smallest programmable delay or sample interval.
    #[serde(with = "humantime_serde")]
    pub min_timing: Duration,
    /// Smallest pulse width the output stage can form.
    #[serde(with = "humantime_serde")]
    pub min_pulse_width: Duration,
    /// Smallest programmable edge (rise or fall) time.
    #[serde(with = "humantime_serde")]
    pub min_rise_fall: Duration,
    /// Inclusive (min, max) source voltage in volts.
    pub voltage_range_v: (f64, f64),
    /// Inclusive (min, max) current in amperes.
    pub current_range_a: (f64, f64),
    /// Smallest distinguishable compliance step in amperes.
    pub compliance_resolution_a: f64,
    /// Model-specific default operating values.
    pub defaults: ProfileDefaults,
}

impl HardwareProfile {
    /// Clamp a requested current compliance into the model's range and
    /// quantize it to the model's resolution.
    ///
    /// Requests below one resolution step become one step rather than
    /// zero, so a run can never end up with no compliance at all.
    pub fn effective_compliance(&self, requested_a: f64) -> f64 {
        let ceiling = self.current_range_a.0.abs().max(self.current_range_a.1.abs());
        let clamped = requested_a.abs().min(ceiling);
        let steps = (clamped / self.compliance_resolution_a).round();
        (steps.max(1.0)) * self.compliance_resolution_a
    }
}

/// Default operating values for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileDefaults {
    /// Non-disturbing read voltage in volts.
    pub read_v: f64,
    /// Base (inter-pulse) level in volts.
    pub base_v: f64,
    /// Sweep shape used when the caller does not pick one.
    pub sweep_shape: SweepShape,
}

/// Partial profile used to recalibrate limits at runtime.
///
/// Only the populated fields are merged; everything else keeps its current
/// value. Applying an update to an unknown model creates the entry from the
/// generic profile first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    /// New minimum timing, if recalibrated.
    #[serde(default, with = "humantime_serde::option")]
    pub min_timing: Option<Duration>,
    /// New minimum pulse width, if recalibrated.
    #[serde(default, with = "humantime_serde::option")]
    pub min_pulse_width: Option<Duration>,
    /// New minimum edge time, if recalibrated.
    #[serde(default, with = "humantime_serde::option")]
    pub min_rise_fall: Option<Duration>,
    /// New voltage range, if recalibrated.
    #[serde(default)]
    pub voltage_range_v: Option<(f64, f64)>,
    /// New current range, if recalibrated.
    #[serde(default)]
    pub current_range_a: Option<(f64, f64)>,
    /// New compliance resolution, if recalibrated.
    #[serde(default)]
    pub compliance_resolution_a: Option<f64>,
}

// =============================================================================
// Built-in Table
// =============================================================================

/// Profiles shipped with the crate.
///
/// Values follow the published limits of the respective instruments; the
/// generic entry is deliberately conservative so fallback runs stay inside
/// any real SMU's envelope.
pub static BUILTIN_PROFILES: Lazy<Vec<HardwareProfile>> = Lazy::new(|| {
    vec![
        HardwareProfile {
            model: "Keithley 4200A_pmu".to_string(),
            min_timing: Duration::from_nanos(20),
            min_pulse_width: Duration::from_nanos(60),
            min_rise_fall: Duration::from_nanos(20),
            voltage_range_v: (-10.0, 10.0),
            current_range_a: (-0.8, 0.8),
            compliance_resolution_a: 1e-9,
            defaults: ProfileDefaults {
                read_v: 0.2,
                base_v: 0.0,
                sweep_shape: SweepShape::Full,
            },
        },
        HardwareProfile {
            model: "Keithley 4200A_smu".to_string(),
            min_timing: Duration::from_micros(100),
            min_pulse_width: Duration::from_micros(500),
            min_rise_fall: Duration::from_micros(100),
            voltage_range_v: (-210.0, 210.0),
            current_range_a: (-0.105, 0.105),
            compliance_resolution_a: 1e-12,
            defaults: ProfileDefaults {
                read_v: 0.1,
                base_v: 0.0,
                sweep_shape: SweepShape::Full,
            },
        },
        HardwareProfile {
            model: "Keithley 2450".to_string(),
            min_timing: Duration::from_micros(500),
            min_pulse_width: Duration::from_millis(1),
            min_rise_fall: Duration::from_micros(500),
            voltage_range_v: (-200.0, 200.0),
            current_range_a: (-1.05, 1.05),
            compliance_resolution_a: 1e-9,
            defaults: ProfileDefaults {
                read_v: 0.1,
                base_v: 0.0,
                sweep_shape: SweepShape::Positive,
            },
        },
        HardwareProfile {
            model: GENERIC_MODEL.to_string(),
            min_timing: Duration::from_micros(1),
            min_pulse_width: Duration::from_micros(10),
            min_rise_fall: Duration::from_micros(1),
            voltage_range_v: (-10.0, 10.0),
            current_range_a: (-0.1, 0.1),
            compliance_resolution_a: 1e-9,
            defaults: ProfileDefaults {
                read_v: 0.1,
                base_v: 0.0,
                sweep_shape: SweepShape::Full,
            },
        },
    ]
});

// =============================================================================
// Registry
// =============================================================================

/// Mutable per-service profile table.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<String, HardwareProfile>,
    generic: HardwareProfile,
}

impl ProfileRegistry {
    /// Create a registry seeded from the built-in table.
    pub fn new() -> Self {
        let mut profiles = HashMap::new();
        for profile in BUILTIN_PROFILES.iter() {
            profiles.insert(profile.model.clone(), profile.clone());
        }
        // The built-in table always contains the generic entry.
        let generic = profiles
            .get(GENERIC_MODEL)
            .cloned()
            .unwrap_or_else(placeholder_generic);
        Self { profiles, generic }
    }

    /// Limits for `model`, falling back to the generic profile.
    pub fn get_limits(&self, model: &str) -> &HardwareProfile {
        self.profiles.get(model).unwrap_or(&self.generic)
    }

    /// Model-specific default operating values, with the same fallback.
    pub fn get_defaults(&self, model: &str) -> ProfileDefaults {
        self.get_limits(model).defaults
    }

    /// Whether `model` has its own entry (as opposed to falling back).
    pub fn has_model(&self, model: &str) -> bool {
        self.profiles.contains_key(model)
    }

    /// Model keys currently in the table, unsorted.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Merge `update` into the profile for `model`.
    ///
    /// Unknown models get a new entry cloned from the generic profile before
    /// the merge. Only this registry value changes.
    pub fn update_limits(&mut self, model: &str, update: &ProfileUpdate) {
        let mut fallback = self.generic.clone();
        fallback.model = model.to_string();
        let entry = self
            .profiles
            .entry(model.to_string())
            .or_insert(fallback);
        if let Some(v) = update.min_timing {
            entry.min_timing = v;
        }
        if let Some(v) = update.min_pulse_width {
            entry.min_pulse_width = v;
        }
        if let Some(v) = update.min_rise_fall {
            entry.min_rise_fall = v;
        }
        if let Some(v) = update.voltage_range_v {
            entry.voltage_range_v = v;
        }
        if let Some(v) = update.current_range_a {
            entry.current_range_a = v;
        }
        if let Some(v) = update.compliance_resolution_a {
            entry.compliance_resolution_a = v;
        }
        if model == GENERIC_MODEL {
            self.generic = entry.clone();
        }
        info!("Profile limits updated for '{}'", model);
    }

    /// Overlay partial profiles from a TOML document.
    ///
    /// The file maps model names to [`ProfileUpdate`] tables:
    ///
    /// ```toml
    /// ["Keithley 4200A_pmu"]
    /// min_pulse_width = "80ns"
    /// voltage_range_v = [-5.0, 5.0]
    /// ```
    ///
    /// Returns the number of models touched.
    pub fn load_overrides(&mut self, path: &Path) -> DaqResult<usize> {
        let overrides = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize::<HashMap<String, ProfileUpdate>>()?;

        let count = overrides.len();
        for (model, update) in &overrides {
            self.update_limits(model, update);
        }
        info!(
            "Loaded profile overrides for {} model(s) from {}",
            count,
            path.display()
        );
        Ok(count)
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn placeholder_generic() -> HardwareProfile {
    HardwareProfile {
        model: GENERIC_MODEL.to_string(),
        min_timing: Duration::from_millis(1),
        min_pulse_width: Duration::from_millis(1),
        min_rise_fall: Duration::from_millis(1),
        voltage_range_v: (-1.0, 1.0),
        current_range_a: (-0.01, 0.01),
        compliance_resolution_a: 1e-6,
        defaults: ProfileDefaults {
            read_v: 0.1,
            base_v: 0.0,
            sweep_shape: SweepShape::Positive,
        },
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
