//! Command-line frontend for the measurement engine.
//!
//! Every subcommand drives the built-in simulated device, so the binary
//! doubles as a dry-run tool: parameters go through the same validation and
//! sequencing as a hardware run, and `--export` writes the same CSV files.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;

use memdaq::config::Settings;
use memdaq::hooks::RunHooks;
use memdaq::instrument::{LightSource, MockLed, MockSmu};
use memdaq::protocols::{endurance, ispp, iv, noise, pulse, retention};
use memdaq::sample::SampleLog;
use memdaq::service::MeasurementService;
use memdaq::storage::{CsvWriter, RunInfo};
use memdaq::sweep::{SweepShape, SweepSpec};
use memdaq::timing::PulseSpec;

#[derive(Parser)]
#[command(
    name = "memdaq",
    author,
    version,
    about = "Timing-validated sweep and pulse runs on a simulated memristive device",
    long_about = None
)]
struct Cli {
    /// Path to a TOML settings file (default: ./memdaq.toml if present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Hardware model whose timing limits apply (overrides the settings file)
    #[arg(short, long)]
    model: Option<String>,

    /// Current compliance in milliamperes
    #[arg(long, default_value_t = 1.0)]
    compliance_ma: f64,

    /// Export the run as CSV into the configured storage directory
    #[arg(short, long)]
    export: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Staircase current/voltage sweep
    Sweep(SweepArgs),
    /// Fixed-amplitude pulse train with a read per pulse
    Pulse(PulseArgs),
    /// SET/RESET cycling with per-polarity reads
    Endurance(EnduranceArgs),
    /// One programming pulse, then periodic state reads
    Retention(RetentionArgs),
    /// Incremental-step pulse programming toward a target current
    Ispp(IsppArgs),
    /// Current-noise capture at a constant bias
    Noise(NoiseArgs),
    /// List the known hardware models and their timing limits
    Models,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ShapeArg {
    Full,
    Positive,
    Negative,
}

impl From<ShapeArg> for SweepShape {
    fn from(shape: ShapeArg) -> Self {
        match shape {
            ShapeArg::Full => SweepShape::Full,
            ShapeArg::Positive => SweepShape::Positive,
            ShapeArg::Negative => SweepShape::Negative,
        }
    }
}

#[derive(Args)]
struct SweepArgs {
    /// First voltage of the path
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start: f64,

    /// Peak voltage of the path
    #[arg(long, allow_hyphen_values = true)]
    stop: f64,

    /// Step magnitude in volts
    #[arg(long, default_value_t = 0.1)]
    step: f64,

    /// Dwell per point in milliseconds
    #[arg(long, default_value_t = 10)]
    interval_ms: u64,

    /// Which polarities the path visits
    #[arg(long, value_enum, default_value_t = ShapeArg::Full)]
    shape: ShapeArg,

    /// Dwell at 0 V on each first arrival at a turning point, in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,
}

#[derive(Args)]
struct PulseArgs {
    /// Pulse amplitude in volts
    #[arg(long, allow_hyphen_values = true)]
    amplitude: f64,

    /// Pulse width in microseconds
    #[arg(long, default_value_t = 100)]
    width_us: u64,

    /// Number of pulses
    #[arg(long, default_value_t = 10)]
    count: u32,

    /// Probe level in volts (default: the model's read voltage)
    #[arg(long, allow_hyphen_values = true)]
    read_v: Option<f64>,
}

#[derive(Args)]
struct EnduranceArgs {
    /// SET pulse amplitude in volts
    #[arg(long, default_value_t = 1.5, allow_hyphen_values = true)]
    set_v: f64,

    /// RESET pulse amplitude in volts
    #[arg(long, default_value_t = -1.5, allow_hyphen_values = true)]
    reset_v: f64,

    /// Pulse width in microseconds
    #[arg(long, default_value_t = 100)]
    width_us: u64,

    /// Number of SET/RESET cycles
    #[arg(long, default_value_t = 100)]
    cycles: u32,

    /// Observation window between cycles in milliseconds
    #[arg(long, default_value_t = 1)]
    delay_ms: u64,

    /// Probe level in volts (default: the model's read voltage)
    #[arg(long, allow_hyphen_values = true)]
    read_v: Option<f64>,
}

#[derive(Args)]
struct RetentionArgs {
    /// Programming pulse amplitude in volts
    #[arg(long, default_value_t = 1.5, allow_hyphen_values = true)]
    set_v: f64,

    /// Programming pulse width in microseconds
    #[arg(long, default_value_t = 100)]
    width_us: u64,

    /// Number of reads after the pulse
    #[arg(long, default_value_t = 60)]
    reads: u32,

    /// Wait between consecutive reads in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,

    /// Probe level in volts (default: the model's read voltage)
    #[arg(long, allow_hyphen_values = true)]
    read_v: Option<f64>,

    /// Illuminate with the simulated LED at this power during observation
    #[arg(long)]
    light_mw: Option<f64>,
}

#[derive(Args)]
struct IsppArgs {
    /// First pulse amplitude in volts
    #[arg(long, default_value_t = 0.5, allow_hyphen_values = true)]
    start: f64,

    /// Last permissible amplitude in volts
    #[arg(long, default_value_t = 3.0, allow_hyphen_values = true)]
    stop: f64,

    /// Amplitude increment in volts
    #[arg(long, default_value_t = 0.1)]
    step: f64,

    /// Pulse width in microseconds
    #[arg(long, default_value_t = 100)]
    width_us: u64,

    /// Stop once the read magnitude reaches this, in microamperes
    #[arg(long)]
    target_ua: f64,

    /// Probe level in volts (default: the model's read voltage)
    #[arg(long, allow_hyphen_values = true)]
    read_v: Option<f64>,
}

#[derive(Args)]
struct NoiseArgs {
    /// Capture window in milliseconds
    #[arg(long, default_value_t = 1000)]
    duration_ms: u64,

    /// Bias level in volts (default: the model's read voltage)
    #[arg(long, allow_hyphen_values = true)]
    read_v: Option<f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let log_level = match cli.verbose {
        0 => settings.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level)).init();

    let model = cli
        .model
        .clone()
        .unwrap_or_else(|| settings.instrument.model.clone());
    let compliance_a = cli.compliance_ma * 1e-3;

    let mut service = MeasurementService::new();
    if let Some(path) = &settings.profile_overrides {
        let touched = service.load_profile_overrides(path).with_context(|| {
            format!("failed to apply profile overrides from '{}'", path.display())
        })?;
        info!("Applied profile overrides for {touched} model(s).");
    }

    let mut smu = match settings.instrument.seed {
        Some(seed) => MockSmu::with_seed(seed),
        None => MockSmu::new(),
    };
    let mut hooks = RunHooks::new();
    let writer = cli
        .export
        .then(|| CsvWriter::new(settings.storage.default_path.as_str()));

    info!("Running against model '{model}'.");
    match cli.command {
        Commands::Sweep(args) => cmd_sweep(
            &service,
            &mut smu,
            &mut hooks,
            &model,
            compliance_a,
            writer.as_ref(),
            &args,
        ),
        Commands::Pulse(args) => cmd_pulse(
            &service,
            &mut smu,
            &mut hooks,
            &model,
            compliance_a,
            writer.as_ref(),
            &args,
        ),
        Commands::Endurance(args) => cmd_endurance(
            &service,
            &mut smu,
            &mut hooks,
            &model,
            compliance_a,
            writer.as_ref(),
            &args,
        ),
        Commands::Retention(args) => cmd_retention(
            &service,
            &mut smu,
            &mut hooks,
            &model,
            compliance_a,
            writer.as_ref(),
            &args,
        ),
        Commands::Ispp(args) => cmd_ispp(
            &service,
            &mut smu,
            &mut hooks,
            &model,
            compliance_a,
            writer.as_ref(),
            &args,
        ),
        Commands::Noise(args) => cmd_noise(
            &service,
            &mut smu,
            &mut hooks,
            &model,
            compliance_a,
            writer.as_ref(),
            &args,
        ),
        Commands::Models => cmd_models(&service),
    }
}

fn cmd_sweep(
    service: &MeasurementService,
    smu: &mut MockSmu,
    hooks: &mut RunHooks,
    model: &str,
    compliance_a: f64,
    writer: Option<&CsvWriter>,
    args: &SweepArgs,
) -> Result<()> {
    let params = iv::IvSweepParams {
        sweep: SweepSpec::fixed_step(args.start, args.stop, args.step, args.shape.into()),
        step_interval: Duration::from_millis(args.interval_ms),
        compliance_a,
        pause_at_extrema: args.pause_ms.map(Duration::from_millis),
    };

    let outcome = service.run_iv_sweep(smu, model, &params, hooks)?;
    println!(
        "iv_sweep: {} points, {} failed reads{}",
        outcome.log.len(),
        outcome.log.failed_rows(),
        cancel_note(outcome.cancelled)
    );
    maybe_export(writer, "iv_sweep", model, &params, &outcome.log)
}

fn cmd_pulse(
    service: &MeasurementService,
    smu: &mut MockSmu,
    hooks: &mut RunHooks,
    model: &str,
    compliance_a: f64,
    writer: Option<&CsvWriter>,
    args: &PulseArgs,
) -> Result<()> {
    let profile = service.registry().get_limits(model);
    let params = pulse::PulseTrainParams {
        pulse: PulseSpec::for_profile(profile, args.amplitude, Duration::from_micros(args.width_us)),
        count: args.count,
        read_v: args.read_v.unwrap_or(profile.defaults.read_v),
        compliance_a,
    };

    let outcome = service.run_pulse_train(smu, model, &params, hooks)?;
    let last = outcome.log.last().map_or(f64::NAN, |s| s.current_a);
    println!(
        "pulse_train: {} pulses, last read {last:.3e} A{}",
        outcome.log.len(),
        cancel_note(outcome.cancelled)
    );
    maybe_export(writer, "pulse_train", model, &params, &outcome.log)
}

fn cmd_endurance(
    service: &MeasurementService,
    smu: &mut MockSmu,
    hooks: &mut RunHooks,
    model: &str,
    compliance_a: f64,
    writer: Option<&CsvWriter>,
    args: &EnduranceArgs,
) -> Result<()> {
    let profile = service.registry().get_limits(model);
    let width = Duration::from_micros(args.width_us);
    let params = endurance::EnduranceParams {
        set_pulse: PulseSpec::for_profile(profile, args.set_v, width),
        reset_pulse: PulseSpec::for_profile(profile, args.reset_v, width),
        cycles: args.cycles,
        read_v: args.read_v.unwrap_or(profile.defaults.read_v),
        inter_cycle_delay: Duration::from_millis(args.delay_ms),
        compliance_a,
    };

    let outcome = service.run_endurance(smu, model, &params, hooks)?;
    println!(
        "endurance: {}/{} cycles, {} rows{}",
        outcome.cycles_completed,
        args.cycles,
        outcome.log.len(),
        cancel_note(outcome.cancelled)
    );
    maybe_export(writer, "endurance", model, &params, &outcome.log)
}

fn cmd_retention(
    service: &MeasurementService,
    smu: &mut MockSmu,
    hooks: &mut RunHooks,
    model: &str,
    compliance_a: f64,
    writer: Option<&CsvWriter>,
    args: &RetentionArgs,
) -> Result<()> {
    let profile = service.registry().get_limits(model);
    let params = retention::RetentionParams {
        set_pulse: PulseSpec::for_profile(profile, args.set_v, Duration::from_micros(args.width_us)),
        read_v: args.read_v.unwrap_or(profile.defaults.read_v),
        number: args.reads,
        repeat_delay: Duration::from_millis(args.delay_ms),
        compliance_a,
        illumination_mw: args.light_mw,
    };

    let mut led = MockLed::new();
    let light: Option<&mut dyn LightSource> = if args.light_mw.is_some() {
        Some(&mut led)
    } else {
        None
    };

    let outcome = service.run_retention(smu, light, model, &params, hooks)?;
    let last = outcome.log.last().map_or(f64::NAN, |s| s.current_a);
    println!(
        "retention: {} reads, last {last:.3e} A{}",
        outcome.log.len(),
        cancel_note(outcome.cancelled)
    );
    maybe_export(writer, "retention", model, &params, &outcome.log)
}

fn cmd_ispp(
    service: &MeasurementService,
    smu: &mut MockSmu,
    hooks: &mut RunHooks,
    model: &str,
    compliance_a: f64,
    writer: Option<&CsvWriter>,
    args: &IsppArgs,
) -> Result<()> {
    let profile = service.registry().get_limits(model);
    let params = ispp::IsppParams {
        start_v: args.start,
        stop_v: args.stop,
        step_v: args.step,
        pulse_width: Duration::from_micros(args.width_us),
        read_v: args.read_v.unwrap_or(profile.defaults.read_v),
        target_current_a: args.target_ua * 1e-6,
        compliance_a,
    };

    let outcome = service.run_ispp(smu, model, &params, hooks)?;
    match outcome.hit_amplitude_v {
        Some(v) => println!(
            "ispp: target reached at {v} V after {} pulses",
            outcome.amplitudes_v.len()
        ),
        None => println!(
            "ispp: target not reached after {} pulses{}",
            outcome.amplitudes_v.len(),
            cancel_note(outcome.cancelled)
        ),
    }
    maybe_export(writer, "ispp", model, &params, &outcome.log)
}

fn cmd_noise(
    service: &MeasurementService,
    smu: &mut MockSmu,
    hooks: &mut RunHooks,
    model: &str,
    compliance_a: f64,
    writer: Option<&CsvWriter>,
    args: &NoiseArgs,
) -> Result<()> {
    let profile = service.registry().get_limits(model);
    let params = noise::NoiseParams {
        read_v: args.read_v.unwrap_or(profile.defaults.read_v),
        duration: Duration::from_millis(args.duration_ms),
        compliance_a,
    };

    let outcome = service.run_noise(smu, model, &params, hooks)?;
    println!(
        "noise: mean {:.3e} A, rms deviation {:.3e} A over {} samples{}",
        outcome.mean_current_a,
        outcome.rms_deviation_a,
        outcome.log.len(),
        cancel_note(outcome.cancelled)
    );
    maybe_export(writer, "noise", model, &params, &outcome.log)
}

fn cmd_models(service: &MeasurementService) -> Result<()> {
    let mut models: Vec<&str> = service.registry().models().collect();
    models.sort_unstable();
    for model in models {
        let p = service.registry().get_limits(model);
        println!(
            "{model}: width >= {:?}, edges >= {:?}, {}..{} V, read at {} V",
            p.min_pulse_width,
            p.min_rise_fall,
            p.voltage_range_v.0,
            p.voltage_range_v.1,
            p.defaults.read_v
        );
    }
    Ok(())
}

fn cancel_note(cancelled: bool) -> &'static str {
    if cancelled {
        ", cancelled"
    } else {
        ""
    }
}

fn maybe_export<P: Serialize>(
    writer: Option<&CsvWriter>,
    protocol: &str,
    model: &str,
    params: &P,
    log: &SampleLog,
) -> Result<()> {
    let Some(writer) = writer else {
        return Ok(());
    };
    let run = RunInfo::new(protocol, model).with_params(params)?;
    let path = writer.export(&run, log)?;
    println!("exported: {}", path.display());
    Ok(())
}
