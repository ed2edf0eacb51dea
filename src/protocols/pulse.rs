//! Fixed-amplitude pulse trains and pulse-width sweeps.
//!
//! The train protocol is the sequencer's batched cycle exposed directly:
//! `count` identical pulse-and-read cycles at one amplitude. The width
//! sweep varies the time axis instead: one validated pulse and read per
//! rung of a geometric width ladder, for switching-kinetics maps.

use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};
use crate::hooks::RunHooks;
use crate::instrument::SourceMeasure;
use crate::profile::HardwareProfile;
use crate::sample::SampleLog;
use crate::sequencer::{GapSampling, PulseSequencer};
use crate::timing::{self, PulseSpec};

use super::preflight;

/// Parameters for [`run_train`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseTrainParams {
    /// The repeated pulse.
    pub pulse: PulseSpec,
    /// Number of pulse/read cycles.
    pub count: u32,
    /// Probe level between pulses in volts.
    pub read_v: f64,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one pulse train.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseTrainOutcome {
    /// One row per completed cycle.
    pub log: SampleLog,
    /// Whether the run was stopped before all cycles completed.
    pub cancelled: bool,
}

/// Run a fixed-amplitude pulse train.
pub fn run_train(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &PulseTrainParams,
    hooks: &mut RunHooks,
) -> DaqResult<PulseTrainOutcome> {
    timing::check_pulse(profile, &params.pulse)?;
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    let compliance = profile.effective_compliance(params.compliance_a);
    info!(
        "Pulse train on {}: {} x {:.3} V / {:?}",
        profile.model, params.count, params.pulse.amplitude_v, params.pulse.width
    );

    let mut log = SampleLog::with_capacity(params.count as usize);
    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);
    let cancelled = seq
        .pulse_train(
            &params.pulse,
            params.count,
            params.read_v,
            GapSampling::Sleep,
            &mut log,
            hooks,
        )
        .is_cancelled();
    seq.finish();

    Ok(PulseTrainOutcome { log, cancelled })
}

/// Geometrically spaced pulse-width ladder.
///
/// `points == 1` yields just `from`; endpoints are always included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidthLadder {
    /// Shortest width.
    #[serde(with = "humantime_serde")]
    pub from: Duration,
    /// Longest width.
    #[serde(with = "humantime_serde")]
    pub to: Duration,
    /// Number of rungs.
    pub points: u32,
}

impl WidthLadder {
    /// Expand the ladder into concrete widths, shortest first.
    pub fn widths(&self) -> Vec<Duration> {
        if self.points == 0 {
            return Vec::new();
        }
        if self.points == 1 {
            return vec![self.from];
        }
        let a = self.from.as_secs_f64();
        let b = self.to.as_secs_f64();
        let last = (self.points - 1) as f64;
        (0..self.points)
            .map(|i| Duration::from_secs_f64(a * (b / a).powf(f64::from(i) / last)))
            .collect()
    }
}

/// Parameters for [`run_width_sweep`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidthSweepParams {
    /// Pulse-top level in volts, shared by every rung.
    pub amplitude_v: f64,
    /// Width ladder to walk.
    pub ladder: WidthLadder,
    /// Probe level between pulses in volts.
    pub read_v: f64,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one width sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidthSweepOutcome {
    /// One row per completed rung.
    pub log: SampleLog,
    /// Width of each completed rung in seconds, parallel to the log.
    pub widths_s: Vec<f64>,
    /// Whether the run was stopped before the ladder completed.
    pub cancelled: bool,
}

/// Run a pulse-width sweep.
///
/// The whole ladder is validated before the first command, so one
/// too-short rung rejects the run instead of truncating it.
pub fn run_width_sweep(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &WidthSweepParams,
    hooks: &mut RunHooks,
) -> DaqResult<WidthSweepOutcome> {
    if params.ladder.from.is_zero() || params.ladder.to < params.ladder.from {
        return Err(DaqError::InvalidParameter(format!(
            "width ladder must run from a nonzero minimum upward (got {:?} to {:?})",
            params.ladder.from, params.ladder.to
        )));
    }
    let widths = params.ladder.widths();
    if widths.is_empty() {
        return Err(DaqError::InvalidParameter(
            "width ladder has no points".to_string(),
        ));
    }
    let specs: Vec<PulseSpec> = widths
        .iter()
        .map(|&w| PulseSpec::for_profile(profile, params.amplitude_v, w))
        .collect();
    for spec in &specs {
        timing::check_pulse(profile, spec)?;
    }
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    let compliance = profile.effective_compliance(params.compliance_a);
    info!(
        "Width sweep on {}: {} rungs from {:?} to {:?}",
        profile.model,
        widths.len(),
        params.ladder.from,
        params.ladder.to
    );

    let mut log = SampleLog::with_capacity(widths.len());
    let mut widths_s = Vec::with_capacity(widths.len());
    let mut cancelled = false;
    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);

    for spec in &specs {
        if seq
            .pulse_and_read(spec, params.read_v, &mut log, hooks)
            .is_none()
        {
            cancelled = true;
            break;
        }
        widths_s.push(spec.width.as_secs_f64());
        if seq.hold(spec.gap(), hooks).is_cancelled() {
            cancelled = true;
            break;
        }
    }
    seq.finish();

    Ok(WidthSweepOutcome {
        log,
        widths_s,
        cancelled,
    })
}
