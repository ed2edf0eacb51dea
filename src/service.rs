//! Measurement façade: one `run_*` method per protocol.
//!
//! [`MeasurementService`] owns the [`ProfileRegistry`] and resolves the
//! caller's model name to a [`crate::profile::HardwareProfile`] before every
//! run; unknown models fall back to the generic profile, so a typo degrades
//! to conservative limits instead of failing. Everything else (validation,
//! sequencing, parking) is the protocol's job; the service adds no policy
//! of its own.
//!
//! The instrument is borrowed per call. The service itself holds no
//! hardware state, so one service can drive any number of instruments in
//! turn, and the caller decides how runs are serialized across threads.
//!
//! # Example
//!
//! ```rust,ignore
//! use memdaq::instrument::MockSmu;
//! use memdaq::hooks::RunHooks;
//! use memdaq::protocols::iv::IvSweepParams;
//! use memdaq::service::MeasurementService;
//! use memdaq::sweep::{SweepShape, SweepSpec};
//!
//! let service = MeasurementService::new();
//! let mut smu = MockSmu::new();
//! let mut hooks = RunHooks::new();
//! let params = IvSweepParams {
//!     sweep: SweepSpec::fixed_step(0.0, 1.0, 0.1, SweepShape::Full),
//!     step_interval: Duration::from_millis(1),
//!     compliance_a: 1e-3,
//!     pause_at_extrema: None,
//! };
//! let outcome = service.run_iv_sweep(&mut smu, "Keithley 4200A_pmu", &params, &mut hooks)?;
//! ```

use std::path::Path;

use crate::error::DaqResult;
use crate::hooks::RunHooks;
use crate::instrument::{LightSource, SourceMeasure};
use crate::profile::{ProfileDefaults, ProfileRegistry, ProfileUpdate};
use crate::protocols::{
    endurance, frequency, ispp, iv, noise, potentiation, ppf, pulse, retention, srdp, stdp,
    transient,
};

/// Protocol façade over an owned profile registry.
#[derive(Debug, Clone)]
pub struct MeasurementService {
    registry: ProfileRegistry,
}

impl MeasurementService {
    /// Service with the built-in profile table.
    pub fn new() -> Self {
        Self {
            registry: ProfileRegistry::new(),
        }
    }

    /// Service over a caller-prepared registry.
    pub fn with_registry(registry: ProfileRegistry) -> Self {
        Self { registry }
    }

    /// The profile table backing every run.
    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Model-specific default read/base levels and sweep shape.
    pub fn defaults(&self, model: &str) -> ProfileDefaults {
        self.registry.get_defaults(model)
    }

    /// Recalibrate limits for one model; subsequent runs see the new
    /// values.
    pub fn update_limits(&mut self, model: &str, update: &ProfileUpdate) {
        self.registry.update_limits(model, update);
    }

    /// Overlay profiles from a TOML file; returns how many models were
    /// touched.
    pub fn load_profile_overrides(&mut self, path: &Path) -> DaqResult<usize> {
        self.registry.load_overrides(path)
    }

    // =========================================================================
    // Protocol runs
    // =========================================================================

    /// Current/voltage sweep along the configured path.
    pub fn run_iv_sweep(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &iv::IvSweepParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<iv::IvSweepOutcome> {
        iv::run(smu, self.registry.get_limits(model), params, hooks)
    }

    /// State retention: one set pulse, then periodic reads.
    pub fn run_retention(
        &self,
        smu: &mut dyn SourceMeasure,
        light: Option<&mut dyn LightSource>,
        model: &str,
        params: &retention::RetentionParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<retention::RetentionOutcome> {
        retention::run(smu, light, self.registry.get_limits(model), params, hooks)
    }

    /// Fixed-amplitude pulse train with a read per pulse.
    pub fn run_pulse_train(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &pulse::PulseTrainParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<pulse::PulseTrainOutcome> {
        pulse::run_train(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Pulse-width ladder with a read per rung.
    pub fn run_width_sweep(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &pulse::WidthSweepParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<pulse::WidthSweepOutcome> {
        pulse::run_width_sweep(smu, self.registry.get_limits(model), params, hooks)
    }

    /// SET/RESET cycling with per-polarity reads.
    pub fn run_endurance(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &endurance::EnduranceParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<endurance::EnduranceOutcome> {
        endurance::run(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Incremental-step pulse programming toward a target current.
    pub fn run_ispp(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &ispp::IsppParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<ispp::IsppOutcome> {
        ispp::run_ispp(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Amplitude ladder reporting the first threshold crossing.
    pub fn run_threshold_search(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &ispp::ThresholdSearchParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<ispp::ThresholdSearchOutcome> {
        ispp::run_threshold_search(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Paired-pulse facilitation over a list of intervals.
    pub fn run_ppf(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &ppf::PpfParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<ppf::PpfOutcome> {
        ppf::run(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Spike-timing-dependent plasticity over signed spike intervals.
    pub fn run_stdp(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &stdp::StdpParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<stdp::StdpOutcome> {
        stdp::run(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Spike-rate-dependent plasticity over a list of rates.
    pub fn run_srdp(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &srdp::SrdpParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<srdp::SrdpOutcome> {
        srdp::run(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Pulse trains across frequencies with per-pulse reads.
    pub fn run_frequency_response(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &frequency::FrequencyResponseParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<frequency::FrequencyResponseOutcome> {
        frequency::run(smu, self.registry.get_limits(model), params, hooks)
    }

    /// Alternating potentiation/depression bursts.
    pub fn run_potentiation(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &potentiation::PotentiationParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<potentiation::PotentiationOutcome> {
        potentiation::run(smu, self.registry.get_limits(model), params, hooks)
    }

    /// One stimulus, then dense capture of the relaxation.
    pub fn run_transient_decay(
        &self,
        smu: &mut dyn SourceMeasure,
        light: Option<&mut dyn LightSource>,
        model: &str,
        params: &transient::TransientParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<transient::TransientOutcome> {
        transient::run_decay(smu, light, self.registry.get_limits(model), params, hooks)
    }

    /// The transient-decay cadence repeated per read bias.
    pub fn run_bias_decay(
        &self,
        smu: &mut dyn SourceMeasure,
        light: Option<&mut dyn LightSource>,
        model: &str,
        params: &transient::BiasDecayParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<transient::BiasDecayOutcome> {
        transient::run_bias_decay(smu, light, self.registry.get_limits(model), params, hooks)
    }

    /// Current-noise capture at a constant bias.
    pub fn run_noise(
        &self,
        smu: &mut dyn SourceMeasure,
        model: &str,
        params: &noise::NoiseParams,
        hooks: &mut RunHooks,
    ) -> DaqResult<noise::NoiseOutcome> {
        noise::run(smu, self.registry.get_limits(model), params, hooks)
    }
}

impl Default for MeasurementService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::DaqError;
    use crate::instrument::mock::ScriptedSmu;
    use crate::timing::PulseSpec;

    #[test]
    fn test_unknown_model_falls_back_to_generic() {
        let service = MeasurementService::new();
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();
        let params = noise::NoiseParams {
            read_v: 0.2,
            duration: Duration::from_millis(1),
            compliance_a: 1e-3,
        };

        let outcome = service
            .run_noise(&mut smu, "no such instrument", &params, &mut hooks)
            .unwrap();
        assert!(!outcome.log.is_empty());
    }

    #[test]
    fn test_update_limits_applies_to_later_runs() {
        let mut service = MeasurementService::new();
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();

        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        let params = pulse::PulseTrainParams {
            pulse: PulseSpec::for_profile(profile, 1.0, Duration::from_micros(50)),
            count: 1,
            read_v: 0.2,
            compliance_a: 1e-3,
        };
        service
            .run_pulse_train(&mut smu, "Keithley 4200A_pmu", &params, &mut hooks)
            .unwrap();

        // Recalibrate the width floor above the requested 50 us.
        service.update_limits(
            "Keithley 4200A_pmu",
            &ProfileUpdate {
                min_pulse_width: Some(Duration::from_micros(100)),
                ..ProfileUpdate::default()
            },
        );
        assert!(matches!(
            service.run_pulse_train(&mut smu, "Keithley 4200A_pmu", &params, &mut hooks),
            Err(DaqError::PulseWidthTooShort { .. })
        ));
    }

    #[test]
    fn test_defaults_resolve_per_model() {
        let service = MeasurementService::new();
        assert_eq!(service.defaults("Keithley 4200A_pmu").read_v, 0.2);
        assert_eq!(service.defaults("unknown").read_v, 0.1);
    }
}
