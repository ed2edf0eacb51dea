//! Transient decay after a single stimulus.
//!
//! One baseline read, one stimulus, then dense free-run sampling of the
//! relaxation for the caller's observation window. The stimulus is
//! either an electrical pulse or, with a [`LightSource`] attached, an
//! illumination burst, so electrical and photoconductive decay share one
//! cadence. [`run_bias_decay`] repeats that cadence once per read bias
//! in a list; the current decays toward a bias-dependent floor, and the
//! segment arrays partition the flat log the same way the
//! frequency-response log is partitioned.

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};
use crate::hooks::{Progress, RunHooks};
use crate::instrument::{LightSource, SourceMeasure};
use crate::profile::HardwareProfile;
use crate::sample::SampleLog;
use crate::sequencer::PulseSequencer;
use crate::timing::{self, PulseSpec};

use super::preflight;

/// What perturbs the device before the decay is observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimulusKind {
    /// One electrical pulse.
    Pulse(PulseSpec),
    /// Illumination burst from the attached light source.
    Light {
        /// LED drive power in milliwatts.
        power_mw: f64,
        /// How long the LED stays on.
        #[serde(with = "humantime_serde")]
        on_for: Duration,
    },
}

/// Parameters for [`run_decay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientParams {
    /// The perturbation to apply once.
    pub stimulus: StimulusKind,
    /// Probe level during the observation window, in volts.
    pub read_v: f64,
    /// Free-run observation window following the stimulus.
    #[serde(with = "humantime_serde")]
    pub observe: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one decay capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransientOutcome {
    /// Baseline read followed by the free-run decay rows.
    pub log: SampleLog,
    /// Whether the observation window was cut short.
    pub cancelled: bool,
}

/// Parameters for [`run_bias_decay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasDecayParams {
    /// The perturbation applied once per segment.
    pub stimulus: StimulusKind,
    /// Read biases to observe the decay at, one segment each, in volts.
    pub biases_v: Vec<f64>,
    /// Free-run observation window per segment.
    #[serde(with = "humantime_serde")]
    pub observe: Duration,
    /// Quiet hold at 0 V between segments.
    #[serde(with = "humantime_serde")]
    pub relax_between: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one bias sweep of decay captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasDecayOutcome {
    /// Per-segment baseline and decay rows, concatenated in run order.
    pub log: SampleLog,
    /// Read bias of each segment, in volts.
    pub segment_bias_v: Vec<f64>,
    /// Rows each segment contributed to the log; sums to the log length.
    pub segment_rows: Vec<usize>,
    /// Whether the run was stopped before all segments completed.
    pub cancelled: bool,
}

/// Capture one decay transient.
pub fn run_decay(
    smu: &mut dyn SourceMeasure,
    mut light: Option<&mut dyn LightSource>,
    profile: &HardwareProfile,
    params: &TransientParams,
    hooks: &mut RunHooks,
) -> DaqResult<TransientOutcome> {
    check_stimulus(profile, &params.stimulus, light.is_some())?;
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    info!(
        "Transient decay on {}: {:?} observation window",
        profile.model, params.observe
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::new();
    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);

    seq.take_sample(&mut log, hooks);
    let mut cancelled = apply_stimulus(&mut seq, &mut light, &params.stimulus, hooks).is_cancelled();
    if !cancelled {
        seq.set_level(params.read_v);
        cancelled = seq
            .sample_during(params.observe, &mut log, hooks)
            .is_cancelled();
    }
    seq.finish();

    Ok(TransientOutcome { log, cancelled })
}

/// Capture one decay transient per bias in `params.biases_v`.
pub fn run_bias_decay(
    smu: &mut dyn SourceMeasure,
    mut light: Option<&mut dyn LightSource>,
    profile: &HardwareProfile,
    params: &BiasDecayParams,
    hooks: &mut RunHooks,
) -> DaqResult<BiasDecayOutcome> {
    if params.biases_v.is_empty() {
        return Err(DaqError::InvalidParameter(
            "bias sweep needs at least one read bias".into(),
        ));
    }
    check_stimulus(profile, &params.stimulus, light.is_some())?;
    for &bias in &params.biases_v {
        timing::check_amplitude(profile, bias)?;
    }
    preflight(smu, profile)?;

    info!(
        "Bias-dependent decay on {}: {} biases, {:?} windows",
        profile.model,
        params.biases_v.len(),
        params.observe
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::new();
    let mut segment_bias_v = Vec::with_capacity(params.biases_v.len());
    let mut segment_rows = Vec::with_capacity(params.biases_v.len());
    let mut cancelled = false;

    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(0.0);

    for &bias in &params.biases_v {
        if hooks.stop_requested() {
            cancelled = true;
            break;
        }
        let rows_before = log.len();
        segment_bias_v.push(bias);

        seq.set_level(bias);
        seq.take_sample(&mut log, hooks);
        if apply_stimulus(&mut seq, &mut light, &params.stimulus, hooks).is_cancelled() {
            segment_rows.push(log.len() - rows_before);
            cancelled = true;
            break;
        }
        seq.set_level(bias);
        if seq
            .sample_during(params.observe, &mut log, hooks)
            .is_cancelled()
        {
            segment_rows.push(log.len() - rows_before);
            cancelled = true;
            break;
        }
        segment_rows.push(log.len() - rows_before);

        seq.set_level(0.0);
        if seq.settle(params.relax_between, hooks).is_cancelled() {
            cancelled = true;
            break;
        }
    }
    seq.finish();

    Ok(BiasDecayOutcome {
        log,
        segment_bias_v,
        segment_rows,
        cancelled,
    })
}

/// Stimulus validation shared by both runs; no commands are issued.
fn check_stimulus(
    profile: &HardwareProfile,
    stimulus: &StimulusKind,
    have_light: bool,
) -> DaqResult<()> {
    match stimulus {
        StimulusKind::Pulse(spec) => timing::check_pulse(profile, spec),
        StimulusKind::Light { power_mw, .. } => {
            if !have_light {
                return Err(DaqError::InvalidParameter(
                    "illumination stimulus requested but no light source attached".into(),
                ));
            }
            if !(power_mw.is_finite() && *power_mw >= 0.0) {
                return Err(DaqError::InvalidParameter(format!(
                    "LED power must be a non-negative finite value (got {power_mw})"
                )));
            }
            Ok(())
        }
    }
}

/// Perturb the device once. The LED is switched off on every path out of
/// the illumination window, cancelled ones included.
fn apply_stimulus(
    seq: &mut PulseSequencer<'_>,
    light: &mut Option<&mut dyn LightSource>,
    stimulus: &StimulusKind,
    hooks: &mut RunHooks,
) -> Progress {
    match stimulus {
        StimulusKind::Pulse(spec) => seq.drive_pulse(spec, hooks),
        StimulusKind::Light { power_mw, on_for } => {
            let Some(led) = light.as_deref_mut() else {
                // Unreachable after validation; stay dark rather than panic.
                warn!("No light source attached; skipping illumination");
                return Progress::Continue;
            };
            if let Err(e) = led.led_on(*power_mw) {
                warn!("LED on failed ({e}); continuing dark");
            }
            let held = seq.hold(*on_for, hooks);
            if let Err(e) = led.led_off() {
                warn!("LED off failed ({e})");
            }
            held
        }
    }
}
