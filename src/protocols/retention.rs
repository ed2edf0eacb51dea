//! State retention after a programming pulse.
//!
//! One set pulse, then `number` reads at the read voltage separated by
//! `repeat_delay`. The read bias is held continuously between reads so the
//! device sees a constant, non-disturbing probe.
//!
//! # Illumination
//!
//! With `illumination_mw` set and a [`LightSource`] attached, the LED is
//! switched on right after the set pulse and off when the run ends
//! (including cancelled runs), for photo-assisted retention studies.
//! Requesting illumination without an attached source fails validation;
//! silently dark data is worse than no data.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};
use crate::hooks::RunHooks;
use crate::instrument::{LightSource, SourceMeasure};
use crate::profile::HardwareProfile;
use crate::sample::SampleLog;
use crate::sequencer::PulseSequencer;
use crate::timing::{self, PulseSpec};

use super::preflight;

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionParams {
    /// Programming pulse applied once at the start.
    pub set_pulse: PulseSpec,
    /// Non-disturbing probe level in volts.
    pub read_v: f64,
    /// Number of reads after the pulse.
    pub number: u32,
    /// Wait between consecutive reads.
    #[serde(with = "humantime_serde")]
    pub repeat_delay: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
    /// LED drive power for the observation phase, if any.
    #[serde(default)]
    pub illumination_mw: Option<f64>,
}

/// Results of one retention run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionOutcome {
    /// One row per completed read.
    pub log: SampleLog,
    /// Whether the run was stopped before all reads completed.
    pub cancelled: bool,
}

/// Run a retention measurement.
pub fn run(
    smu: &mut dyn SourceMeasure,
    mut light: Option<&mut dyn LightSource>,
    profile: &HardwareProfile,
    params: &RetentionParams,
    hooks: &mut RunHooks,
) -> DaqResult<RetentionOutcome> {
    timing::check_pulse(profile, &params.set_pulse)?;
    timing::check_amplitude(profile, params.read_v)?;
    if params.illumination_mw.is_some() && light.is_none() {
        return Err(DaqError::InvalidParameter(
            "illumination requested but no light source attached".to_string(),
        ));
    }
    preflight(smu, profile)?;

    let compliance = profile.effective_compliance(params.compliance_a);
    info!(
        "Retention on {}: {} reads every {:?}",
        profile.model, params.number, params.repeat_delay
    );

    let mut log = SampleLog::with_capacity(params.number as usize);
    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.set_pulse.base_v);

    let mut cancelled = seq.drive_pulse(&params.set_pulse, hooks).is_cancelled();

    if !cancelled {
        if let (Some(power_mw), Some(led)) = (params.illumination_mw, light.as_deref_mut()) {
            if let Err(e) = led.led_on(power_mw) {
                warn!("LED on failed ({e}); continuing dark");
            }
        }
        seq.set_level(params.read_v);
        for k in 0..params.number {
            if hooks.stop_requested() {
                cancelled = true;
                break;
            }
            seq.take_sample(&mut log, hooks);
            // No trailing wait after the last read.
            if k + 1 < params.number && seq.hold(params.repeat_delay, hooks).is_cancelled() {
                cancelled = true;
                break;
            }
        }
    }

    if params.illumination_mw.is_some() {
        if let Some(led) = light.as_deref_mut() {
            if let Err(e) = led.led_off() {
                warn!("LED off failed ({e})");
            }
        }
    }
    seq.finish();

    Ok(RetentionOutcome { log, cancelled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{MockLed, ScriptedSmu};
    use crate::profile::ProfileRegistry;

    fn params(number: u32) -> RetentionParams {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        RetentionParams {
            set_pulse: PulseSpec::for_profile(profile, 1.5, Duration::from_micros(100)),
            read_v: 0.2,
            number,
            repeat_delay: Duration::from_micros(100),
            compliance_a: 1e-3,
            illumination_mw: None,
        }
    }

    #[test]
    fn test_read_count_and_levels() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::with_currents(&[1e-6, 2e-6, 3e-6]);
        let mut hooks = RunHooks::new();

        let outcome = run(&mut smu, None, profile, &params(3), &mut hooks).unwrap();

        assert!(!outcome.cancelled);
        assert_eq!(outcome.log.len(), 3);
        // All reads happen at the probe level.
        assert!(outcome.log.voltages().iter().all(|v| *v == 0.2));
        assert_eq!(smu.reads(), 3);
        assert!(!smu.output_enabled());
    }

    #[test]
    fn test_illumination_without_source_is_rejected() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();
        let mut p = params(2);
        p.illumination_mw = Some(25.0);

        let err = run(&mut smu, None, profile, &p, &mut hooks).unwrap_err();
        assert!(matches!(err, DaqError::InvalidParameter(_)));
        assert!(smu.commands().is_empty());
    }

    #[test]
    fn test_led_switched_on_then_off() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::with_currents(&[1e-6, 2e-6]);
        let mut led = MockLed::new();
        let mut hooks = RunHooks::new();
        let mut p = params(2);
        p.illumination_mw = Some(25.0);

        run(&mut smu, Some(&mut led), profile, &p, &mut hooks).unwrap();

        assert!(!led.is_on());
        assert_eq!(led.toggles(), 2);
        assert_eq!(led.power_mw(), 25.0);
    }

    #[test]
    fn test_cancel_mid_reads_turns_led_off() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::with_currents(&[1e-6; 10]);
        let mut led = MockLed::new();
        let mut polls = 0;
        let mut hooks = RunHooks::new().with_should_stop(move || {
            polls += 1;
            polls > 6
        });
        let mut p = params(10);
        p.illumination_mw = Some(10.0);

        let outcome = run(&mut smu, Some(&mut led), profile, &p, &mut hooks).unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.log.len() < 10);
        assert!(!led.is_on());
        assert!(!smu.output_enabled());
    }

    #[test]
    fn test_invalid_pulse_rejected_before_commands() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();
        let mut p = params(2);
        p.set_pulse.width = Duration::from_nanos(1);

        assert!(matches!(
            run(&mut smu, None, profile, &p, &mut hooks),
            Err(DaqError::PulseWidthTooShort { .. })
        ));
        assert!(smu.commands().is_empty());
    }
}
