//! Potentiation/depression cycling.
//!
//! Alternating bursts of programming pulses, read after every pulse:
//! even-numbered phases drive the potentiating (SET-polarity) pulse,
//! odd ones the depressing (RESET-polarity) pulse, giving the familiar
//! staircase conductance trace. With a relax window configured, each
//! phase ends with a quiet settle and one more read, and the volatility
//! ratio of the phase compares the last in-burst read against that
//! post-relax read: a nonvolatile device scores near zero.
//!
//! The flat log is partitioned by `phase_rows` the same way the
//! frequency-response log is, partial final phase included.

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

use super::{preflight, EPSILON_A};

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentiationParams {
    /// Pulse for even phases (potentiation).
    pub set_pulse: PulseSpec,
    /// Pulse for odd phases (depression).
    pub reset_pulse: PulseSpec,
    /// Pulses (and reads) per phase.
    pub pulses_per_phase: u32,
    /// Number of phases; 2 gives one potentiate/depress pair.
    pub phases: u32,
    /// Probe level in volts.
    pub read_v: f64,
    /// Optional quiet window ending each phase; enables the volatility
    /// ratio and its extra post-relax read.
    #[serde(default, with = "humantime_serde::option")]
    pub relax: Option<Duration>,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one cycling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotentiationOutcome {
    /// Per-pulse reads (plus one post-relax read per phase when a relax
    /// window is configured), concatenated in run order.
    pub log: SampleLog,
    /// Rows each phase contributed to the log; sums to the log length.
    pub phase_rows: Vec<usize>,
    /// Volatility ratio per completed phase,
    /// `(i_immediate - i_post_relax) / |i_immediate|`. Empty when no
    /// relax window was configured.
    pub phase_volatility: Vec<f64>,
    /// Whether the run was stopped before all phases completed.
    pub cancelled: bool,
}

/// Run `params.phases` alternating programming bursts.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &PotentiationParams,
    hooks: &mut RunHooks,
) -> DaqResult<PotentiationOutcome> {
    if params.pulses_per_phase == 0 {
        return Err(DaqError::InvalidParameter(
            "phases need at least one pulse".into(),
        ));
    }
    if params.phases == 0 {
        return Err(DaqError::InvalidParameter(
            "cycling needs at least one phase".into(),
        ));
    }
    timing::check_pulse(profile, &params.set_pulse)?;
    timing::check_pulse(profile, &params.reset_pulse)?;
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    info!(
        "Potentiation/depression on {}: {} phases of {} pulses",
        profile.model, params.phases, params.pulses_per_phase
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::new();
    let mut phase_rows = Vec::with_capacity(params.phases as usize);
    let mut phase_volatility = Vec::new();
    let mut cancelled = false;

    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);

    for phase in 0..params.phases {
        let pulse = if phase % 2 == 0 {
            &params.set_pulse
        } else {
            &params.reset_pulse
        };
        let rows_before = log.len();
        let done = seq.pulse_train(
            pulse,
            params.pulses_per_phase,
            params.read_v,
            GapSampling::Sleep,
            &mut log,
            hooks,
        );
        if done.is_cancelled() {
            phase_rows.push(log.len() - rows_before);
            cancelled = true;
            break;
        }

        if let Some(relax) = params.relax {
            // Last in-burst row is the immediate read for this phase.
            let immediate = log.last().map_or(f64::NAN, |s| s.current_a);
            if seq.settle(relax, hooks).is_cancelled() {
                phase_rows.push(log.len() - rows_before);
                cancelled = true;
                break;
            }
            let post = seq.take_sample(&mut log, hooks).current_a;
            phase_volatility.push((immediate - post) / immediate.abs().max(EPSILON_A));
        }
        phase_rows.push(log.len() - rows_before);
    }
    seq.finish();

    Ok(PotentiationOutcome {
        log,
        phase_rows,
        phase_volatility,
        cancelled,
    })
}
