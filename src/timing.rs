//! Timing validation against the active hardware profile.
//!
//! Every pulse is checked here before any instrument command for the
//! operation is issued, so a rejected request leaves the device exactly as
//! it was. Checks run in a fixed order and the first violation wins:
//!
//! 1. width at or above the model's minimum pulse width
//! 2. amplitude inside the model's voltage range
//! 3. period strictly greater than width
//! 4. rise and fall at or above the model's minimum edge time
//!
//! The `period > width` relation is the timing-sufficiency guard the rest
//! of the engine relies on: protocols that derive inter-pulse gaps from the
//! period (SRDP, frequency response) assume a validated spec always leaves
//! a nonzero gap after the pulse body.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};
use crate::profile::HardwareProfile;

/// One pulse as the sequencer will drive it.
///
/// Levels in volts, times as [`Duration`]. `base_v` is the level held
/// between pulses and returned to after the pulse body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseSpec {
    /// Pulse-top level in volts.
    pub amplitude_v: f64,
    /// Inter-pulse level in volts.
    pub base_v: f64,
    /// Time at amplitude.
    #[serde(with = "humantime_serde")]
    pub width: Duration,
    /// Full cycle time; must exceed `width`.
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Leading edge time.
    #[serde(with = "humantime_serde")]
    pub rise: Duration,
    /// Trailing edge time.
    #[serde(with = "humantime_serde")]
    pub fall: Duration,
}

impl PulseSpec {
    /// A pulse with profile-derived defaults: base level from the model's
    /// defaults, a 50% duty cycle and the fastest edges the model allows.
    pub fn for_profile(profile: &HardwareProfile, amplitude_v: f64, width: Duration) -> Self {
        Self {
            amplitude_v,
            base_v: profile.defaults.base_v,
            width,
            period: width * 2,
            rise: profile.min_rise_fall,
            fall: profile.min_rise_fall,
        }
    }

    /// Replace the period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Replace the inter-pulse level.
    pub fn with_base(mut self, base_v: f64) -> Self {
        self.base_v = base_v;
        self
    }

    /// Replace both edge times.
    pub fn with_edges(mut self, rise: Duration, fall: Duration) -> Self {
        self.rise = rise;
        self.fall = fall;
        self
    }

    /// Gap between the end of the pulse body and the end of the cycle.
    ///
    /// Zero only for an unvalidated spec.
    pub fn gap(&self) -> Duration {
        self.period.saturating_sub(self.width)
    }
}

/// Validate `spec` against `profile`.
///
/// # Example
///
/// ```rust,ignore
/// let profile = registry.get_limits("Keithley 4200A_pmu");
/// let spec = PulseSpec::for_profile(profile, 1.2, Duration::from_micros(10));
/// timing::check_pulse(profile, &spec)?;
/// ```
pub fn check_pulse(profile: &HardwareProfile, spec: &PulseSpec) -> DaqResult<()> {
    if spec.width < profile.min_pulse_width {
        return Err(DaqError::PulseWidthTooShort {
            model: profile.model.clone(),
            width: spec.width,
            min: profile.min_pulse_width,
        });
    }
    check_amplitude(profile, spec.amplitude_v)?;
    if spec.period <= spec.width {
        return Err(DaqError::PeriodNotAbovePulseWidth {
            period: spec.period,
            width: spec.width,
        });
    }
    for edge in [spec.rise, spec.fall] {
        if edge < profile.min_rise_fall {
            return Err(DaqError::EdgeTooFast {
                model: profile.model.clone(),
                edge,
                min: profile.min_rise_fall,
            });
        }
    }
    Ok(())
}

/// Validate a source level against the model's voltage range.
pub fn check_amplitude(profile: &HardwareProfile, amplitude_v: f64) -> DaqResult<()> {
    let (min_v, max_v) = profile.voltage_range_v;
    if !amplitude_v.is_finite() || amplitude_v < min_v || amplitude_v > max_v {
        return Err(DaqError::AmplitudeOutOfRange {
            model: profile.model.clone(),
            amplitude_v,
            min_v,
            max_v,
        });
    }
    Ok(())
}
