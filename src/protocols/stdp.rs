//! Spike-timing-dependent plasticity.
//!
//! One pre-synaptic and one post-synaptic pulse are delivered per pair,
//! separated by the magnitude of the requested spike interval; the sign
//! of the interval picks the order (pre first when `dt >= 0`). A probe
//! read before the pair and one after bracket it, and the weight change
//! for the pair is the relative change of the after-read against the
//! baseline. Sweeping the interval from negative to positive maps out
//! the device's plasticity window.

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
pub struct StdpParams {
    /// Pre-synaptic spike shape.
    pub pre_pulse: PulseSpec,
    /// Post-synaptic spike shape.
    pub post_pulse: PulseSpec,
    /// Signed spike intervals in seconds, one pair each. Positive means
    /// pre before post.
    pub deltas_s: Vec<f64>,
    /// Probe level in volts.
    pub read_v: f64,
    /// Quiet hold between pairs.
    #[serde(with = "humantime_serde")]
    pub relax_between: Duration,
    /// Requested current compliance in amperes.
    #[serde(default = "super::iv::default_compliance")]
    pub compliance_a: f64,
}

/// Results of one plasticity-window run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdpOutcome {
    /// Baseline and after-pair reads, two rows per completed pair.
    pub log: SampleLog,
    /// Signed intervals actually completed, in seconds.
    pub deltas_s: Vec<f64>,
    /// Weight change per completed pair: `(i_after - i0) / |i0|`.
    pub delta_w: Vec<f64>,
    /// Whether the run was stopped before all pairs completed.
    pub cancelled: bool,
}

/// Run a spike-pair sweep over `params.deltas_s`.
pub fn run(
    smu: &mut dyn SourceMeasure,
    profile: &HardwareProfile,
    params: &StdpParams,
    hooks: &mut RunHooks,
) -> DaqResult<StdpOutcome> {
    if params.deltas_s.is_empty() {
        return Err(DaqError::InvalidParameter(
            "spike-pair run needs at least one interval".into(),
        ));
    }
    let mut pairs = Vec::with_capacity(params.deltas_s.len());
    for &dt in &params.deltas_s {
        if !dt.is_finite() {
            return Err(DaqError::InvalidParameter(format!(
                "spike interval must be finite (got {dt})"
            )));
        }
        let gap = Duration::try_from_secs_f64(dt.abs()).map_err(|_| {
            DaqError::InvalidParameter(format!("spike interval {dt} s is out of range"))
        })?;
        pairs.push((dt, gap));
    }
    timing::check_pulse(profile, &params.pre_pulse)?;
    timing::check_pulse(profile, &params.post_pulse)?;
    timing::check_amplitude(profile, params.read_v)?;
    preflight(smu, profile)?;

    info!(
        "STDP on {}: {} spike pairs, pre {:.3} V / post {:.3} V",
        profile.model,
        pairs.len(),
        params.pre_pulse.amplitude_v,
        params.post_pulse.amplitude_v
    );

    let compliance = profile.effective_compliance(params.compliance_a);
    let mut log = SampleLog::with_capacity(2 * pairs.len());
    let mut deltas_s = Vec::with_capacity(pairs.len());
    let mut delta_w = Vec::with_capacity(pairs.len());
    let mut cancelled = false;

    let mut seq = PulseSequencer::new(smu, compliance);
    seq.arm(params.read_v);

    for (dt, gap) in pairs {
        if hooks.stop_requested() {
            cancelled = true;
            break;
        }
        let baseline = seq.take_sample(&mut log, hooks);

        let (first, second) = if dt >= 0.0 {
            (&params.pre_pulse, &params.post_pulse)
        } else {
            (&params.post_pulse, &params.pre_pulse)
        };
        let stopped = seq.drive_pulse(first, hooks).is_cancelled()
            || seq.hold(gap, hooks).is_cancelled()
            || seq.drive_pulse(second, hooks).is_cancelled();
        if stopped {
            cancelled = true;
            break;
        }

        seq.set_level(params.read_v);
        let after = seq.take_sample(&mut log, hooks);

        deltas_s.push(dt);
        delta_w.push(relative_change(after.current_a, baseline.current_a));

        if seq.settle(params.relax_between, hooks).is_cancelled() {
            cancelled = true;
            break;
        }
    }
    seq.finish();

    Ok(StdpOutcome {
        log,
        deltas_s,
        delta_w,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::CancelToken;
    use crate::instrument::mock::{ScriptedSmu, SmuCommand};
    use crate::profile::ProfileRegistry;

    fn spike(amplitude_v: f64) -> PulseSpec {
        PulseSpec {
            amplitude_v,
            base_v: 0.0,
            width: Duration::from_micros(50),
            period: Duration::from_micros(100),
            rise: Duration::from_nanos(20),
            fall: Duration::from_nanos(20),
        }
    }

    fn params(deltas_s: &[f64]) -> StdpParams {
        StdpParams {
            pre_pulse: spike(1.0),
            post_pulse: spike(-0.8),
            deltas_s: deltas_s.to_vec(),
            read_v: 0.2,
            relax_between: Duration::ZERO,
            compliance_a: 1e-3,
        }
    }

    fn pulse_tops(smu: &ScriptedSmu) -> Vec<f64> {
        smu.commands()
            .iter()
            .filter_map(|c| match c {
                SmuCommand::SetVoltage { volts, .. } if volts.abs() > 0.5 => Some(*volts),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_weight_change_against_baseline() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::with_currents(&[1e-6, 2e-6]);
        let mut hooks = RunHooks::new();

        let outcome = run(&mut smu, profile, &params(&[0.0]), &mut hooks).unwrap();

        assert_eq!(outcome.deltas_s, vec![0.0]);
        assert_eq!(outcome.log.len(), 2);
        assert!((outcome.delta_w[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_positive_interval_fires_pre_first() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();

        run(&mut smu, profile, &params(&[1e-3]), &mut hooks).unwrap();

        assert_eq!(pulse_tops(&smu), vec![1.0, -0.8]);
    }

    #[test]
    fn test_negative_interval_fires_post_first() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();

        run(&mut smu, profile, &params(&[-1e-3]), &mut hooks).unwrap();

        assert_eq!(pulse_tops(&smu), vec![-0.8, 1.0]);
    }

    #[test]
    fn test_non_finite_interval_rejected_up_front() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();

        assert!(matches!(
            run(&mut smu, profile, &params(&[0.0, f64::NAN]), &mut hooks),
            Err(DaqError::InvalidParameter(_))
        ));
        assert!(smu.commands().is_empty());
    }

    #[test]
    fn test_cancel_yields_partial_pairs() {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let mut smu = ScriptedSmu::new();
        let token = CancelToken::new();
        token.cancel();
        let mut hooks = RunHooks::new().with_cancel(token);

        let outcome = run(&mut smu, profile, &params(&[0.0, 1e-3]), &mut hooks).unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.deltas_s.is_empty());
        assert!(outcome.delta_w.is_empty());
        assert_eq!(smu.reads(), 0);
    }
}
