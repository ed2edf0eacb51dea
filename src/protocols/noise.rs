//! Current-noise capture at a constant read bias.
//!
//! The device sits at one bias while the engine samples as fast as the
//! instrument answers for the requested duration. The summary statistics
//! (mean and RMS deviation) are computed over the finite rows only, so a
//! few failed reads widen nothing; with no finite rows at all both
//! statistics are `NaN`.

use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::DaqResult;
use crate::hooks::RunHooks;
use crate::instrument::SourceMeasure;
use crate::profile::HardwareProfile;
use crate::sample::SampleLog;
use crate::sequencer::PulseSequencer;
use crate::timing;

use super::preflight;

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    /// Constant bias during the capture, in volts.
    pub read_v: f64,
    /// Capture window.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseOutcome {
    /// Every row sampled during the window.
    pub log: SampleLog,
    /// Mean current over the finite rows, in amperes.
    pub mean_current_a: f64,
    /// RMS deviation from that mean, in amperes.
    pub rms_deviation_a: f64,
    /// Whether the window was cut short.
    pub cancelled: bool,
}

/// Capture current noise at `params.read_v` for `params.duration`.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &NoiseParams,
    hooks: &mut RunHooks,
) -> DaqResult<NoiseOutcome> {
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    info!(
        "Noise capture on {}: {:?} at {:.3} V",
        profile.model, params.duration, params.read_v
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::new();
    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);
    let cancelled = seq
        .sample_during(params.duration, &mut log, hooks)
        .is_cancelled();
    seq.finish();

    let (mean_current_a, rms_deviation_a) = capture_stats(log.currents());

    Ok(NoiseOutcome {
        log,
        mean_current_a,
        rms_deviation_a,
        cancelled,
    })
}

/// Mean and RMS deviation over the finite entries of `currents`.
fn capture_stats(currents: &[f64]) -> (f64, f64) {
    let finite: Vec<f64> = currents.iter().copied().filter(|c| c.is_finite()).collect();
    if finite.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let variance = finite.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
