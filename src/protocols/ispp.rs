//! Incremental-step pulse programming and threshold search.
//!
//! Both protocols walk a monotone amplitude ladder from `start_v` toward
//! `stop_v`, one validated pulse and read per rung, and stop at the first
//! rung whose read trips the stopping condition. The ladder direction is
//! inferred from `sign(stop_v - start_v)`, so the same code programs SET
//! (increasingly positive) and RESET (increasingly negative) transitions.
//!
//! ISPP trips when the read magnitude reaches the target current: the
//! device has been programmed far enough and no further pulse is issued.
//! Threshold search is the same cadence used as a measurement, reporting
//! the first amplitude that moved the device across the threshold, `None`
//! when the ladder ran out first.

use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};
use crate::hooks::RunHooks;
use crate::instrument::SourceMeasure;
use crate::profile::HardwareProfile;
use crate::sample::SampleLog;
use crate::sequencer::PulseSequencer;
use crate::timing::{self, PulseSpec};

use super::preflight;

/// Ladder comparison slack, in volts. Absorbs accumulated float error so
/// the final rung is still emitted when `start + n*step` overshoots `stop`
/// by a rounding residue.
const LADDER_EPS_V: f64 = 1e-9;

/// Parameters for [`run_ispp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsppParams {
    /// First pulse amplitude in volts.
    pub start_v: f64,
    /// Last permissible amplitude in volts; direction comes from the sign
    /// of `stop_v - start_v`.
    pub stop_v: f64,
    /// Amplitude increment magnitude in volts.
    pub step_v: f64,
    /// Width of every programming pulse.
    #[serde(with = "humantime_serde")]
    pub pulse_width: Duration,
    /// Probe level in volts.
    pub read_v: f64,
    /// Stop once the read magnitude reaches this, in amperes.
    pub target_current_a: f64,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one ISPP run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsppOutcome {
    /// One row per issued pulse.
    pub log: SampleLog,
    /// Amplitudes actually issued, in volts.
    pub amplitudes_v: Vec<f64>,
    /// Amplitude whose read hit the target, if any rung did.
    pub hit_amplitude_v: Option<f64>,
    /// Whether the run was stopped before a hit or ladder end.
    pub cancelled: bool,
}

/// Parameters for [`run_threshold_search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSearchParams {
    /// First probe amplitude in volts.
    pub start_v: f64,
    /// Last permissible amplitude in volts.
    pub stop_v: f64,
    /// Amplitude increment magnitude in volts.
    pub step_v: f64,
    /// Width of every probe pulse.
    #[serde(with = "humantime_serde")]
    pub pulse_width: Duration,
    /// Probe level in volts.
    pub read_v: f64,
    /// Read magnitude that counts as switched, in amperes.
    pub threshold_a: f64,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one threshold search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSearchOutcome {
    /// One row per issued pulse.
    pub log: SampleLog,
    /// Amplitudes actually issued, in volts.
    pub amplitudes_v: Vec<f64>,
    /// First amplitude whose read crossed the threshold; `None` when the
    /// ladder completed without crossing.
    pub threshold_v: Option<f64>,
    /// Whether the run was stopped before a crossing or ladder end.
    pub cancelled: bool,
}

/// Run incremental-step pulse programming.
pub fn run_ispp(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &IsppParams,
    hooks: &mut RunHooks,
) -> DaqResult<IsppOutcome> {
    let ladder = LadderShared {
        start_v: params.start_v,
        stop_v: params.stop_v,
        step_v: params.step_v,
        pulse_width: params.pulse_width,
        read_v: params.read_v,
        compliance_a: params.compliance_a,
        trip_a: params.target_current_a,
    };
    info!(
        "ISPP on {}: {:.3} V to {:.3} V in {:.3} V steps, target {:.3e} A",
        profile.model, params.start_v, params.stop_v, params.step_v, params.target_current_a
    );
    let run = ladder.execute(smu, profile, hooks)?;
    Ok(IsppOutcome {
        log: run.log,
        amplitudes_v: run.amplitudes_v,
        hit_amplitude_v: run.hit_v,
        cancelled: run.cancelled,
    })
}

/// Run a switching-threshold search.
pub fn run_threshold_search(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &ThresholdSearchParams,
    hooks: &mut RunHooks,
) -> DaqResult<ThresholdSearchOutcome> {
    let ladder = LadderShared {
        start_v: params.start_v,
        stop_v: params.stop_v,
        step_v: params.step_v,
        pulse_width: params.pulse_width,
        read_v: params.read_v,
        compliance_a: params.compliance_a,
        trip_a: params.threshold_a,
    };
    info!(
        "Threshold search on {}: {:.3} V to {:.3} V in {:.3} V steps",
        profile.model, params.start_v, params.stop_v, params.step_v
    );
    let run = ladder.execute(smu, profile, hooks)?;
    Ok(ThresholdSearchOutcome {
        log: run.log,
        amplitudes_v: run.amplitudes_v,
        threshold_v: run.hit_v,
        cancelled: run.cancelled,
    })
}

/// The mechanics shared by both ladder protocols.
struct LadderShared {
    start_v: f64,
    stop_v: f64,
    step_v: f64,
    pulse_width: Duration,
    read_v: f64,
    compliance_a: f64,
    trip_a: f64,
}

struct LadderRun {
    log: SampleLog,
    amplitudes_v: Vec<f64>,
    hit_v: Option<f64>,
    cancelled: bool,
}

impl LadderShared {
    fn execute(
        &self,
        smu: &mut dyn SourceMeasure,
        profile: &HardwareProfile,
        hooks: &mut RunHooks,
    ) -> DaqResult<LadderRun> {
        if !(self.step_v.is_finite() && self.step_v > 0.0) {
            return Err(DaqError::InvalidParameter(format!(
                "amplitude step must be a positive voltage (got {})",
                self.step_v
            )));
        }
        let mut spec = PulseSpec::for_profile(profile, self.start_v, self.pulse_width);
        timing::check_pulse(profile, &spec)?;
        timing::check_amplitude(profile, self.stop_v)?;
        timing::check_amplitude(profile, self.read_v)?;
        preflight(smu, profile)?;

        let amps = amplitude_ladder(self.start_v, self.stop_v, self.step_v);
        let compliance = profile.effective_compliance(self.compliance_a);

        let mut log = SampleLog::with_capacity(amps.len());
        let mut amplitudes_v = Vec::with_capacity(amps.len());
        let mut hit_v = None;
        let mut cancelled = false;

        let mut seq = PulseSequencer::new(smu, compliance);
        seq.arm(self.read_v);

        for amp in amps {
            spec.amplitude_v = amp;
            let sample = match seq.pulse_and_read(&spec, self.read_v, &mut log, hooks) {
                Some(s) => s,
                None => {
                    cancelled = true;
                    break;
                }
            };
            amplitudes_v.push(amp);
            // NaN reads never trip; the ladder keeps climbing.
            if sample.current_a.abs() >= self.trip_a {
                hit_v = Some(amp);
                break;
            }
            if seq.hold(spec.gap(), hooks).is_cancelled() {
                cancelled = true;
                break;
            }
        }
        seq.finish();

        Ok(LadderRun {
            log,
            amplitudes_v,
            hit_v,
            cancelled,
        })
    }
}

/// Amplitudes from `start_v` to `stop_v` inclusive, stepped by `step_v`
/// in the direction of `stop_v`. Equal endpoints yield a single rung.
fn amplitude_ladder(start_v: f64, stop_v: f64, step_v: f64) -> Vec<f64> {
    let step = step_v.abs();
    let dir = if stop_v >= start_v { 1.0 } else { -1.0 };
    let mut amps = Vec::new();
    let mut k: u32 = 0;
    loop {
        let v = start_v + dir * step * f64::from(k);
        let passed = if dir > 0.0 {
            v > stop_v + LADDER_EPS_V
        } else {
            v < stop_v - LADDER_EPS_V
        };
        if passed {
            break;
        }
        amps.push(v);
        k += 1;
    }
    amps
}
