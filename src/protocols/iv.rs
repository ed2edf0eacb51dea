//! Quasi-static current-voltage sweep.
//!
//! Walks the voltage path point by point: program the level, dwell for the
//! step interval, take one reading. The dwell is clamped up to the model's
//! minimum timing so a request can never out-pace the hardware scheduler.
//!
//! # Pause at Extrema
//!
//! With `pause_at_extrema` set, the engine dwells at 0 V upon each first
//! arrival at a sweep turning point, once per arrival. Arrival is keyed by
//! value-equality against the previous point: a consecutive duplicate does
//! not pause again, but the same value revisited after intervening points
//! does. Devices with strong self-heating use this to relax between the
//! polarities of a full sweep.

use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};
use crate::hooks::RunHooks;
use crate::instrument::SourceMeasure;
use crate::profile::HardwareProfile;
use crate::sample::SampleLog;
use crate::sequencer::PulseSequencer;
use crate::sweep::SweepSpec;
use crate::timing;

use super::preflight;

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvSweepParams {
    /// Voltage path request.
    pub sweep: SweepSpec,
    /// Dwell per point; also the pacing reference for rate and duration
    /// paced sweeps.
    #[serde(with = "humantime_serde")]
    pub step_interval: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "default_compliance")]
    pub compliance_a: f64,
    /// Dwell at 0 V on each first arrival at a turning point.
    #[serde(default, with = "humantime_serde::option")]
    pub pause_at_extrema: Option<Duration>,
}

pub(crate) fn default_compliance() -> f64 {
    1e-3
}

/// Results of one sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvSweepOutcome {
    /// One row per visited path point.
    pub log: SampleLog,
    /// Whether the run was stopped before the path completed.
    pub cancelled: bool,
}

/// Run an IV sweep.
///
/// Fails with [`DaqError::EmptySweep`] when the pacing resolves to a zero
/// step, and with an amplitude error when the path would leave the model's
/// voltage range.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &IvSweepParams,
    hooks: &mut RunHooks,
) -> DaqResult<IvSweepOutcome> {
    let path = params.sweep.voltage_path(params.step_interval);
    if path.is_empty() {
        return Err(DaqError::EmptySweep);
    }
    let lo = path.iter().fold(f64::INFINITY, |a, &v| a.min(v));
    let hi = path.iter().fold(f64::NEG_INFINITY, |a, &v| a.max(v));
    timing::check_amplitude(profile, lo)?;
    timing::check_amplitude(profile, hi)?;
    preflight(smu, profile)?;

    let dwell = params.step_interval.max(profile.min_timing);
    let compliance = profile.effective_compliance(params.compliance_a);
    let turning = params.sweep.turning_points();
    info!(
        "IV sweep on {}: {} points, dwell {:?}",
        profile.model,
        path.len(),
        dwell
    );

    let mut log = SampleLog::with_capacity(path.len());
    let mut cancelled = false;
    let mut seq = PulseSequencer::new(smu, compliance);
    let mut prev: Option<f64> = None;

    seq.arm(path[0]);
    for (i, &v) in path.iter().enumerate() {
        if hooks.stop_requested() {
            cancelled = true;
            break;
        }
        if i > 0 {
            seq.set_level(v);
        }
        if seq.settle(dwell, hooks).is_cancelled() {
            cancelled = true;
            break;
        }
        seq.take_sample(&mut log, hooks);

        if let Some(pause) = params.pause_at_extrema {
            if turning.contains(&v) && prev != Some(v) {
                debug!("Pausing {:?} at 0 V after reaching {v} V", pause);
                seq.set_level(0.0);
                if seq.hold(pause, hooks).is_cancelled() {
                    cancelled = true;
                    break;
                }
            }
        }
        prev = Some(v);
    }
    seq.finish();

    Ok(IvSweepOutcome { log, cancelled })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{ScriptedSmu, SmuCommand};
    use crate::profile::ProfileRegistry;
    use crate::sweep::SweepShape;

    fn params(step_v: f64) -> IvSweepParams {
        IvSweepParams {
            sweep: SweepSpec::fixed_step(0.0, 1.0, step_v, SweepShape::Positive),
            step_interval: Duration::from_micros(100),
            compliance_a: 1e-3,
            pause_at_extrema: None,
        }
    }

    #[test]
    fn test_one_row_per_path_point() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::with_currents(&[1e-6; 5]);
        let mut hooks = RunHooks::new();

        let outcome = run(&mut smu, profile, &params(0.5), &mut hooks).unwrap();

        assert!(!outcome.cancelled);
        assert_eq!(outcome.log.voltages(), &[0.0, 0.5, 1.0, 0.5, 0.0]);
        assert_eq!(outcome.log.len(), 5);
        assert!(!smu.output_enabled());
    }

    #[test]
    fn test_zero_step_is_empty_sweep_error() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();

        let err = run(&mut smu, profile, &params(0.0), &mut hooks).unwrap_err();
        assert!(matches!(err, DaqError::EmptySweep));
        // Rejected before any command reached the instrument.
        assert!(smu.commands().is_empty());
    }

    #[test]
    fn test_out_of_range_path_is_rejected_up_front() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();
        let mut p = params(0.5);
        p.sweep.stop_v = 42.0;

        let err = run(&mut smu, profile, &p, &mut hooks).unwrap_err();
        assert!(matches!(err, DaqError::AmplitudeOutOfRange { .. }));
        assert!(smu.commands().is_empty());
    }

    #[test]
    fn test_pause_at_extremum_inserts_single_zero_dwell() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::with_currents(&[1e-6; 5]);
        let mut hooks = RunHooks::new();
        let mut p = params(0.5);
        p.pause_at_extrema = Some(Duration::from_micros(200));

        run(&mut smu, profile, &p, &mut hooks).unwrap();

        let volts: Vec<f64> = smu
            .commands()
            .iter()
            .filter_map(|c| match c {
                SmuCommand::SetVoltage { volts, .. } => Some(*volts),
                _ => None,
            })
            .collect();
        // arm, up, top, pause-at-zero, back down, final zero, park.
        assert_eq!(volts, vec![0.0, 0.5, 1.0, 0.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_cancel_returns_partial_log() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::with_currents(&[1e-6; 5]);
        let mut polls = 0;
        let mut hooks = RunHooks::new().with_should_stop(move || {
            polls += 1;
            // First point survives; the stop lands during the second one.
            polls > 3
        });

        let outcome = run(&mut smu, profile, &params(0.5), &mut hooks).unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.log.len() < 5);
        assert!(!smu.output_enabled());
        assert_eq!(smu.last_voltage(), 0.0);
    }

    #[test]
    fn test_disconnected_instrument_is_refused() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        smu.set_connected(false);
        let mut hooks = RunHooks::new();

        assert!(matches!(
            run(&mut smu, profile, &params(0.5), &mut hooks),
            Err(DaqError::NotConnected { .. })
        ));
    }
}
