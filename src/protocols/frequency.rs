//! Frequency response of the device under pulsed stimulation.
//!
//! One pulse train per requested frequency, with a read after every pulse
//! so the per-pulse evolution inside each train is on record. The flat
//! sample log is partitioned by the parallel segment arrays: segment `i`
//! ran at `segment_hz[i]` and contributed `segment_rows[i]` consecutive
//! rows, and the row counts always sum to the log length, including a
//! partial final segment after a cancellation.

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
use super::srdp::train_period;

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyResponseParams {
    /// Stimulus pulse; its period is replaced per frequency.
    pub pulse: PulseSpec,
    /// Pulses (and therefore reads) per train.
    pub pulses_per_train: u32,
    /// Frequencies to probe, in hertz.
    pub frequencies_hz: Vec<f64>,
    /// Probe level in volts.
    pub read_v: f64,
    /// Quiet hold between trains.
    #[serde(with = "humantime_serde")]
    pub relax_between: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one frequency sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyResponseOutcome {
    /// Per-pulse reads for every segment, concatenated in run order.
    pub log: SampleLog,
    /// Frequency of each segment, in hertz.
    pub segment_hz: Vec<f64>,
    /// Rows each segment contributed to the log.
    pub segment_rows: Vec<usize>,
    /// Whether the run was stopped before all segments completed.
    pub cancelled: bool,
}

/// Run a pulse-train sweep over `params.frequencies_hz`.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &FrequencyResponseParams,
    hooks: &mut RunHooks,
) -> DaqResult<FrequencyResponseOutcome> {
    if params.frequencies_hz.is_empty() {
        return Err(DaqError::InvalidParameter(
            "frequency sweep needs at least one frequency".into(),
        ));
    }
    if params.pulses_per_train == 0 {
        return Err(DaqError::InvalidParameter(
            "trains need at least one pulse".into(),
        ));
    }
    let mut specs = Vec::with_capacity(params.frequencies_hz.len());
    for &freq in &params.frequencies_hz {
        let spec = params
            .pulse
            .with_period(train_period(params.pulse.width, freq)?);
        timing::check_pulse(profile, &spec)?;
        specs.push((freq, spec));
    }
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    info!(
        "Frequency response on {}: {} segments, {} pulses each",
        profile.model,
        specs.len(),
        params.pulses_per_train
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::new();
    let mut segment_hz = Vec::with_capacity(specs.len());
    let mut segment_rows = Vec::with_capacity(specs.len());
    let mut cancelled = false;

    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);

    for (freq, spec) in specs {
        let rows_before = log.len();
        let done = seq.pulse_train(
            &spec,
            params.pulses_per_train,
            params.read_v,
            GapSampling::Sleep,
            &mut log,
            hooks,
        );
        segment_hz.push(freq);
        segment_rows.push(log.len() - rows_before);
        if done.is_cancelled() {
            cancelled = true;
            break;
        }
        if seq.settle(params.relax_between, hooks).is_cancelled() {
            cancelled = true;
            break;
        }
    }
    seq.finish();

    Ok(FrequencyResponseOutcome {
        log,
        segment_hz,
        segment_rows,
        cancelled,
    })
}
