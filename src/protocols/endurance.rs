//! Endurance cycling: alternating SET/RESET stress.
//!
//! Each cycle applies the SET pulse, reads, applies the RESET pulse, reads
//! again, so a run of N cycles takes exactly 2N per-pulse readings. The
//! inter-cycle delay is spent free-run sampling at the read level, which
//! catches inter-cycle drift at maximal temporal density instead of
//! sleeping through it.

use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::DaqResult;
use crate::hooks::RunHooks;
use crate::instrument::SourceMeasure;
use crate::profile::HardwareProfile;
use crate::sample::SampleLog;
use crate::sequencer::PulseSequencer;
use crate::timing::{self, PulseSpec};

use super::preflight;

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnduranceParams {
    /// SET-polarity pulse.
    pub set_pulse: PulseSpec,
    /// RESET-polarity pulse.
    pub reset_pulse: PulseSpec,
    /// Number of SET/RESET cycles.
    pub cycles: u32,
    /// Probe level in volts.
    pub read_v: f64,
    /// Observation window between cycles, spent free-run sampling.
    #[serde(with = "humantime_serde")]
    pub inter_cycle_delay: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one endurance run.
///
/// On a cancelled run `set_currents_a` may hold one more entry than
/// `reset_currents_a`; the log always holds every reading taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnduranceOutcome {
    /// Per-pulse reads plus free-run gap rows, in time order.
    pub log: SampleLog,
    /// Post-SET read of each cycle, in amperes.
    pub set_currents_a: Vec<f64>,
    /// Post-RESET read of each cycle, in amperes.
    pub reset_currents_a: Vec<f64>,
    /// Cycles that ran to completion.
    pub cycles_completed: u32,
    /// Whether the run was stopped early.
    pub cancelled: bool,
}

/// Run an endurance cycling measurement.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &EnduranceParams,
    hooks: &mut RunHooks,
) -> DaqResult<EnduranceOutcome> {
    timing::check_pulse(profile, &params.set_pulse)?;
    timing::check_pulse(profile, &params.reset_pulse)?;
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    let compliance = profile.effective_compliance(params.compliance_a);
    info!(
        "Endurance on {}: {} cycles, SET {:.3} V / RESET {:.3} V",
        profile.model, params.cycles, params.set_pulse.amplitude_v, params.reset_pulse.amplitude_v
    );

    let mut log = SampleLog::with_capacity(2 * params.cycles as usize);
    let mut set_currents_a = Vec::with_capacity(params.cycles as usize);
    let mut reset_currents_a = Vec::with_capacity(params.cycles as usize);
    let mut cycles_completed = 0;
    let mut cancelled = false;

    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);

    for _ in 0..params.cycles {
        match seq.pulse_and_read(&params.set_pulse, params.read_v, &mut log, hooks) {
            Some(sample) => set_currents_a.push(sample.current_a),
            None => {
                cancelled = true;
                break;
            }
        }
        match seq.pulse_and_read(&params.reset_pulse, params.read_v, &mut log, hooks) {
            Some(sample) => reset_currents_a.push(sample.current_a),
            None => {
                cancelled = true;
                break;
            }
        }
        cycles_completed += 1;
        if seq
            .sample_during(params.inter_cycle_delay, &mut log, hooks)
            .is_cancelled()
        {
            cancelled = true;
            break;
        }
    }
    seq.finish();

    Ok(EnduranceOutcome {
        log,
        set_currents_a,
        reset_currents_a,
        cycles_completed,
        cancelled,
    })
}
