use std::time::Duration;

use memdaq::{
    error::DaqError,
    hooks::{CancelToken, RunHooks},
    instrument::mock::{ScriptedSmu, SmuCommand},
    instrument::{MockLed, MockSmu},
    profile::ProfileRegistry,
    protocols::{endurance, ispp, noise, ppf, retention},
    service::MeasurementService,
    timing::PulseSpec,
};

fn generic_pulse(amplitude_v: f64, width: Duration) -> PulseSpec {
    let registry = ProfileRegistry::new();
    PulseSpec::for_profile(registry.get_limits("generic"), amplitude_v, width)
}

#[test]
fn test_ppf_constant_current_gives_zero_index() {
    let service = MeasurementService::new();
    // Empty script: every read returns exactly 0 A.
    let mut smu = ScriptedSmu::new();
    let mut hooks = RunHooks::new();

    let params = ppf::PpfParams {
        pulse: generic_pulse(1.0, Duration::from_micros(100)),
        intervals: vec![Duration::ZERO, Duration::from_millis(10)],
        read_v: 0.1,
        relax_between: Duration::from_micros(100),
        compliance_a: 1e-3,
    };

    let outcome = service.run_ppf(&mut smu, "generic", &params, &mut hooks).unwrap();
    assert!(!outcome.cancelled);
    assert_eq!(outcome.intervals_s.len(), 2);
    assert_eq!(outcome.ppf_index, vec![0.0, 0.0]);
}

#[test]
fn test_ispp_halts_on_first_read_at_target() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::with_currents(&[1e-7, 5e-7, 2e-5, 9e-5]);
    let mut hooks = RunHooks::new();

    let params = ispp::IsppParams {
        start_v: 0.0,
        stop_v: 2.0,
        step_v: 0.5,
        pulse_width: Duration::from_micros(100),
        read_v: 0.1,
        target_current_a: 1e-5,
        compliance_a: 1e-3,
    };

    let outcome = service.run_ispp(&mut smu, "generic", &params, &mut hooks).unwrap();
    assert_eq!(outcome.amplitudes_v, vec![0.0, 0.5, 1.0]);
    assert_eq!(outcome.hit_amplitude_v, Some(1.0));
    assert_eq!(smu.reads(), 3, "no read after the target was reached");
    assert!(
        !smu.commands()
            .iter()
            .any(|c| matches!(c, SmuCommand::SetVoltage { volts, .. } if *volts == 1.5)),
        "ladder must stop before the next rung"
    );
}

#[test]
fn test_retention_illumination_toggles_led_once() {
    let service = MeasurementService::new();
    let mut smu = MockSmu::with_seed(7);
    let mut led = MockLed::new();
    let mut hooks = RunHooks::new();

    let params = retention::RetentionParams {
        set_pulse: generic_pulse(1.5, Duration::from_micros(100)),
        read_v: 0.1,
        number: 3,
        repeat_delay: Duration::from_millis(1),
        compliance_a: 1e-3,
        illumination_mw: Some(5.0),
    };

    let outcome = service
        .run_retention(&mut smu, Some(&mut led), "generic", &params, &mut hooks)
        .unwrap();

    assert_eq!(outcome.log.len(), 3);
    assert!(!outcome.cancelled);
    assert!(!led.is_on(), "LED must be off after the run");
    assert_eq!(led.toggles(), 2, "one on, one off");
}

#[test]
fn test_illumination_without_light_source_rejected() {
    let service = MeasurementService::new();
    let mut smu = MockSmu::new();
    let mut hooks = RunHooks::new();

    let params = retention::RetentionParams {
        set_pulse: generic_pulse(1.5, Duration::from_micros(100)),
        read_v: 0.1,
        number: 1,
        repeat_delay: Duration::from_millis(1),
        compliance_a: 1e-3,
        illumination_mw: Some(5.0),
    };

    assert!(matches!(
        service.run_retention(&mut smu, None, "generic", &params, &mut hooks),
        Err(DaqError::InvalidParameter(_))
    ));
}

#[test]
fn test_endurance_aux_arrays_track_cycles() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::with_currents(&[1e-6, 2e-6, 3e-6, 4e-6]);
    let mut hooks = RunHooks::new();

    let params = endurance::EnduranceParams {
        set_pulse: generic_pulse(1.5, Duration::from_micros(100)),
        reset_pulse: generic_pulse(-1.5, Duration::from_micros(100)),
        cycles: 2,
        read_v: 0.1,
        inter_cycle_delay: Duration::ZERO,
        compliance_a: 1e-3,
    };

    let outcome = service
        .run_endurance(&mut smu, "generic", &params, &mut hooks)
        .unwrap();

    assert_eq!(outcome.cycles_completed, 2);
    assert_eq!(outcome.log.len(), 4, "two reads per cycle, no gap rows");
    assert_eq!(outcome.set_currents_a, vec![1e-6, 3e-6]);
    assert_eq!(outcome.reset_currents_a, vec![2e-6, 4e-6]);
}

#[test]
fn test_pre_cancelled_run_parks_without_pulsing() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::new();

    let token = CancelToken::new();
    token.cancel();
    let mut hooks = RunHooks::new().with_cancel(token);

    let params = endurance::EnduranceParams {
        set_pulse: generic_pulse(1.5, Duration::from_micros(100)),
        reset_pulse: generic_pulse(-1.5, Duration::from_micros(100)),
        cycles: 10,
        read_v: 0.1,
        inter_cycle_delay: Duration::from_millis(1),
        compliance_a: 1e-3,
    };

    let outcome = service
        .run_endurance(&mut smu, "generic", &params, &mut hooks)
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.cycles_completed, 0);
    assert!(outcome.log.is_empty());
    // Arm, then straight to park: no amplitude was ever programmed.
    let cmds = smu.commands();
    assert_eq!(cmds.len(), 4);
    assert_eq!(cmds[0], SmuCommand::EnableOutput(true));
    assert!(matches!(cmds[1], SmuCommand::SetVoltage { volts, .. } if volts == 0.1));
    assert!(matches!(cmds[2], SmuCommand::SetVoltage { volts, .. } if volts == 0.0));
    assert_eq!(cmds[3], SmuCommand::EnableOutput(false));
}

#[test]
fn test_noise_capture_on_simulated_device() {
    let service = MeasurementService::new();
    let mut smu = MockSmu::with_seed(3);
    let mut hooks = RunHooks::new();

    let params = noise::NoiseParams {
        read_v: 0.1,
        duration: Duration::from_millis(2),
        compliance_a: 1e-3,
    };

    let outcome = service.run_noise(&mut smu, "generic", &params, &mut hooks).unwrap();
    assert!(!outcome.cancelled);
    assert!(!outcome.log.is_empty());
    assert!(outcome.mean_current_a.is_finite());
    assert!(outcome.rms_deviation_a.is_finite());
}

#[cfg(feature = "storage_csv")]
#[test]
fn test_run_then_export_row_counts_match() {
    use memdaq::protocols::pulse;
    use memdaq::storage::{CsvWriter, RunInfo};

    let service = MeasurementService::new();
    let mut smu = MockSmu::with_seed(1);
    let mut hooks = RunHooks::new();

    let params = pulse::PulseTrainParams {
        pulse: generic_pulse(1.2, Duration::from_micros(100)),
        count: 3,
        read_v: 0.1,
        compliance_a: 1e-3,
    };
    let outcome = service
        .run_pulse_train(&mut smu, "generic", &params, &mut hooks)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let info = RunInfo::new("pulse_train", "generic")
        .with_params(&params)
        .unwrap();
    let path = CsvWriter::new(dir.path()).export(&info, &outcome.log).unwrap();

    let content = std::fs::read_to_string(path).unwrap();
    let data_rows = content
        .lines()
        .filter(|l| !l.starts_with('#') && !l.is_empty())
        .count();
    // Header line plus one line per sample.
    assert_eq!(data_rows, outcome.log.len() + 1);
}

#[test]
fn test_disconnected_instrument_rejected_at_preflight() {
    let service = MeasurementService::new();
    let mut smu = ScriptedSmu::new();
    smu.set_connected(false);
    let mut hooks = RunHooks::new();

    let params = noise::NoiseParams {
        read_v: 0.1,
        duration: Duration::from_millis(1),
        compliance_a: 1e-3,
    };

    let err = service
        .run_noise(&mut smu, "generic", &params, &mut hooks)
        .unwrap_err();
    assert!(matches!(err, DaqError::NotConnected { ref model } if model == "generic"));
    assert!(smu.commands().is_empty());
}
