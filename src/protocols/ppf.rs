//! Paired-pulse facilitation.
//!
//! For each requested interval the device receives two identical pulses
//! separated by that interval, with a probe read after each. The
//! facilitation index for the pair is the relative change of the second
//! read against the first; a short-term-plastic device facilitates more
//! at shorter intervals. The window between the two pulses is sampled in
//! free-run so the inter-pulse decay is on record, and a relaxation hold
//! separates the pairs so one pair's residue does not leak into the next.

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

use super::{preflight, relative_change};

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpfParams {
    /// The pulse applied twice per pair.
    pub pulse: PulseSpec,
    /// Inter-pulse intervals to probe, one pair each.
    pub intervals: Vec<Duration>,
    /// Probe level in volts.
    pub read_v: f64,
    /// Quiet hold between pairs.
    #[serde(with = "humantime_serde")]
    pub relax_between: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one facilitation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpfOutcome {
    /// Every read taken, including the free-run rows between the pulses
    /// of each pair.
    pub log: SampleLog,
    /// Intervals actually completed, in seconds.
    pub intervals_s: Vec<f64>,
    /// Facilitation index per completed pair: `(i2 - i1) / |i1|`.
    pub ppf_index: Vec<f64>,
    /// Whether the run was stopped before all pairs completed.
    pub cancelled: bool,
}

/// Run a paired-pulse facilitation sweep over `params.intervals`.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &PpfParams,
    hooks: &mut RunHooks,
) -> DaqResult<PpfOutcome> {
    if params.intervals.is_empty() {
        return Err(DaqError::InvalidParameter(
            "paired-pulse run needs at least one interval".into(),
        ));
    }
    timing::check_pulse(profile, &params.pulse)?;
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    info!(
        "PPF on {}: {} pairs at {:.3} V",
        profile.model,
        params.intervals.len(),
        params.pulse.amplitude_v
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::new();
    let mut intervals_s = Vec::with_capacity(params.intervals.len());
    let mut ppf_index = Vec::with_capacity(params.intervals.len());
    let mut cancelled = false;

    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);

    for &dt in &params.intervals {
        let first = match seq.pulse_and_read(&params.pulse, params.read_v, &mut log, hooks) {
            Some(s) => s,
            None => {
                cancelled = true;
                break;
            }
        };
        if seq.sample_during(dt, &mut log, hooks).is_cancelled() {
            cancelled = true;
            break;
        }
        let second = match seq.pulse_and_read(&params.pulse, params.read_v, &mut log, hooks) {
            Some(s) => s,
            None => {
                cancelled = true;
                break;
            }
        };
        intervals_s.push(dt.as_secs_f64());
        ppf_index.push(relative_change(second.current_a, first.current_a));

        if seq.hold(params.relax_between, hooks).is_cancelled() {
            cancelled = true;
            break;
        }
    }
    seq.finish();

    Ok(PpfOutcome {
        log,
        intervals_s,
        ppf_index,
        cancelled,
    })
}
