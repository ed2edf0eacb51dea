use std::time::Duration;

use memdaq::{
    error::DaqError,
    hooks::{CancelToken, RunHooks},
    instrument::mock::{ScriptedSmu, SmuCommand},
    protocols::iv::IvSweepParams,
    service::MeasurementService,
    sweep::{StepPacing, SweepShape, SweepSpec},
};

fn programmed_volts(smu: &ScriptedSmu) -> Vec<f64> {
    smu.commands()
        .iter()
        .filter_map(|c| match c {
            SmuCommand::SetVoltage { volts, .. } => Some(*volts),
            _ => None,
        })
        .collect()
}

#[test]
fn test_positive_staircase_out_and_back() {
    let spec = SweepSpec::fixed_step(0.0, 1.0, 0.5, SweepShape::Positive);
    let path = spec.voltage_path(Duration::from_millis(10));
    assert_eq!(path, vec![0.0, 0.5, 1.0, 0.5, 0.0]);
}

#[test]
fn test_full_sweep_programs_every_path_point_then_parks() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::new();
    let mut hooks = RunHooks::new();
    let params = IvSweepParams {
        sweep: SweepSpec::fixed_step(0.0, 1.0, 0.5, SweepShape::Full),
        step_interval: Duration::from_micros(200),
        compliance_a: 1e-3,
        pause_at_extrema: None,
    };

    let outcome = service
        .run_iv_sweep(&mut smu, "generic", &params, &mut hooks)
        .unwrap();

    let path = vec![0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5, 0.0];
    assert!(!outcome.cancelled);
    assert_eq!(outcome.log.len(), path.len());
    assert_eq!(outcome.log.voltages(), path.as_slice());

    // Programmed levels are the path points plus the final 0 V park.
    let mut expected = path;
    expected.push(0.0);
    assert_eq!(programmed_volts(&smu), expected);
    assert_eq!(smu.commands().first(), Some(&SmuCommand::EnableOutput(true)));
    assert_eq!(smu.commands().last(), Some(&SmuCommand::EnableOutput(false)));
}

#[test]
fn test_rate_pacing_resolves_against_step_interval() {
    let spec = SweepSpec {
        start_v: 0.0,
        stop_v: 2.0,
        pacing: StepPacing::FixedRate {
            rate_v_per_s: 100.0,
        },
        shape: SweepShape::Positive,
        neg_stop_v: None,
    };
    // 100 V/s at 10 ms per point -> 1 V steps.
    let path = spec.voltage_path(Duration::from_millis(10));
    assert_eq!(path, vec![0.0, 1.0, 2.0, 1.0, 0.0]);
}

#[test]
fn test_duration_pacing_spans_the_window() {
    let spec = SweepSpec {
        start_v: 0.0,
        stop_v: 1.0,
        pacing: StepPacing::FixedDuration {
            total: Duration::from_millis(100),
        },
        shape: SweepShape::Positive,
        neg_stop_v: None,
    };
    // 2 V path over 10 points -> 0.2 V steps, 11 points with both ends.
    assert_eq!(spec.voltage_path(Duration::from_millis(10)).len(), 11);
}

#[test]
fn test_zero_step_rejected_before_any_command() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::new();
    let mut hooks = RunHooks::new();
    let params = IvSweepParams {
        sweep: SweepSpec::fixed_step(0.0, 1.0, 0.0, SweepShape::Positive),
        step_interval: Duration::from_millis(1),
        compliance_a: 1e-3,
        pause_at_extrema: None,
    };

    let err = service
        .run_iv_sweep(&mut smu, "generic", &params, &mut hooks)
        .unwrap_err();
    assert!(matches!(err, DaqError::EmptySweep));
    assert!(smu.commands().is_empty());
}

#[test]
fn test_sweep_leaving_voltage_range_rejected() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::new();
    let mut hooks = RunHooks::new();
    let params = IvSweepParams {
        sweep: SweepSpec::fixed_step(0.0, 12.0, 0.5, SweepShape::Positive),
        step_interval: Duration::from_millis(1),
        compliance_a: 1e-3,
        pause_at_extrema: None,
    };

    let err = service
        .run_iv_sweep(&mut smu, "generic", &params, &mut hooks)
        .unwrap_err();
    assert!(matches!(err, DaqError::AmplitudeOutOfRange { .. }));
    assert!(smu.commands().is_empty());
}

#[test]
fn test_cancel_mid_sweep_keeps_partial_log_and_parks() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::new();

    let token = CancelToken::new();
    let seen = token.clone();
    let mut count = 0u32;
    let mut hooks = RunHooks::new().with_cancel(token).with_on_point(move |_| {
        count += 1;
        if count >= 2 {
            seen.cancel();
        }
    });

    let params = IvSweepParams {
        sweep: SweepSpec::fixed_step(0.0, 1.0, 0.25, SweepShape::Positive),
        step_interval: Duration::from_micros(200),
        compliance_a: 1e-3,
        pause_at_extrema: None,
    };
    let outcome = service
        .run_iv_sweep(&mut smu, "generic", &params, &mut hooks)
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.log.len(), 2, "stop lands before the third point");

    let n = smu.commands().len();
    assert!(matches!(
        smu.commands()[n - 2],
        SmuCommand::SetVoltage { volts, .. } if volts == 0.0
    ));
    assert_eq!(smu.commands()[n - 1], SmuCommand::EnableOutput(false));
}
