//! Spike-rate-dependent plasticity.
//!
//! One stimulus train per requested rate, no reads during the train, one
//! steady-state read right after it. The train period is `1/f` floored at
//! 1.1x the pulse width so the pulse always fits inside its own period,
//! whatever rate the caller asks for.

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

/// Parameters for [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrdpParams {
    /// Stimulus pulse; its period is replaced per rate.
    pub pulse: PulseSpec,
    /// Pulses per train.
    pub pulses_per_train: u32,
    /// Stimulation rates to probe, in hertz.
    pub rates_hz: Vec<f64>,
    /// Probe level for the steady-state read, in volts.
    pub read_v: f64,
    /// Quiet hold between trains.
    #[serde(with = "humantime_serde")]
    pub relax_between: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one rate sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrdpOutcome {
    /// One steady-state row per completed train.
    pub log: SampleLog,
    /// Rates actually completed, in hertz.
    pub rates_hz: Vec<f64>,
    /// Steady-state current after each completed train, in amperes.
    pub steady_currents_a: Vec<f64>,
    /// Whether the run was stopped before all rates completed.
    pub cancelled: bool,
}

/// Period for a train at `rate_hz`: `1/f`, floored at 1.1x the width.
pub(crate) fn train_period(width: Duration, rate_hz: f64) -> DaqResult<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(DaqError::InvalidParameter(format!(
            "stimulation rate must be a positive frequency (got {rate_hz})"
        )));
    }
    let nominal = Duration::try_from_secs_f64(rate_hz.recip()).map_err(|_| {
        DaqError::InvalidParameter(format!("stimulation rate {rate_hz} Hz is out of range"))
    })?;
    Ok(nominal.max(width.mul_f64(1.1)))
}

/// Run a stimulus-train sweep over `params.rates_hz`.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &SrdpParams,
    hooks: &mut RunHooks,
) -> DaqResult<SrdpOutcome> {
    if params.rates_hz.is_empty() {
        return Err(DaqError::InvalidParameter(
            "rate sweep needs at least one rate".into(),
        ));
    }
    if params.pulses_per_train == 0 {
        return Err(DaqError::InvalidParameter(
            "trains need at least one pulse".into(),
        ));
    }
    let mut specs = Vec::with_capacity(params.rates_hz.len());
    for &rate in &params.rates_hz {
        let spec = params
            .pulse
            .with_period(train_period(params.pulse.width, rate)?);
        timing::check_pulse(profile, &spec)?;
        specs.push((rate, spec));
    }
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    info!(
        "SRDP on {}: {} rates, {} pulses per train",
        profile.model,
        specs.len(),
        params.pulses_per_train
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::with_capacity(specs.len());
    let mut rates_hz = Vec::with_capacity(specs.len());
    let mut steady_currents_a = Vec::with_capacity(specs.len());
    let mut cancelled = false;

    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.pulse.base_v);

    for (rate, spec) in specs {
        if seq
            .drive_train(&spec, params.pulses_per_train, hooks)
            .is_cancelled()
        {
            cancelled = true;
            break;
        }
        seq.set_level(params.read_v);
        let steady = seq.take_sample(&mut log, hooks);
        rates_hz.push(rate);
        steady_currents_a.push(steady.current_a);

        seq.set_level(params.pulse.base_v);
        if seq.settle(params.relax_between, hooks).is_cancelled() {
            cancelled = true;
            break;
        }
    }
    seq.finish();

    Ok(SrdpOutcome {
        log,
        rates_hz,
        steady_currents_a,
        cancelled,
    })
}
