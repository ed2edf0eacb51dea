//! Mock Instrument Implementations
//!
//! Provides simulated instruments for running every protocol without
//! physical hardware. All mocks are plain blocking objects; none of them
//! sleeps, so test runs are fast regardless of the timing parameters used.
//!
//! # Available Mocks
//!
//! - `MockSmu` - Simulated memristive device behind an SMU front end
//! - `ScriptedSmu` - Replays a programmed list of readings and records
//!   every command it receives (for deterministic assertions)
//! - `MockLed` - Simulated LED driver
//!
//! # Device Model
//!
//! `MockSmu` carries an internal state variable in `[0, 1]` mapping linearly
//! to conductance between `g_min` and `g_max`. Voltages beyond `v_set` move
//! the state up, voltages below `v_reset` move it down, and the state
//! relaxes toward `rest_state` with time constant `tau_s` between commands.
//! Readings carry a small uniform multiplicative noise.

use std::collections::VecDeque;
use std::time::Instant;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::instrument::{InstrumentError, LightSource, Measurement, SourceMeasure};

// =============================================================================
// MockSmu - Simulated Memristive Device
// =============================================================================

/// Mock SMU wired to a simulated memristive device.
///
/// Simulates:
/// - State-dependent ohmic conductance between `g_min` and `g_max`
/// - Potentiation above `v_set`, depression below `v_reset`, proportional
///   to the overdrive on each programmed level
/// - Volatile relaxation toward `rest_state` between commands
/// - 2% multiplicative read noise (seedable)
/// - Current compliance clamping
///
/// # Example
///
/// ```rust,ignore
/// let mut smu = MockSmu::with_seed(7);
/// smu.set_voltage(1.2, 1e-3)?; // above v_set: device potentiates
/// let m = smu.measure()?;
/// assert!(m.current_a > 0.0);
/// ```
pub struct MockSmu {
    state: f64,
    rest_state: f64,
    g_min: f64,
    g_max: f64,
    v_set: f64,
    v_reset: f64,
    rate_per_volt: f64,
    tau_s: f64,
    noise_frac: f64,
    applied_v: f64,
    compliance_a: f64,
    output_on: bool,
    connected: bool,
    last_touch: Instant,
    rng: StdRng,
}

impl MockSmu {
    /// Create a mock device in its low-conductance state, entropy-seeded.
    pub fn new() -> Self {
        Self::with_seed(rand::thread_rng().gen())
    }

    /// Create a mock device with a fixed noise seed.
    ///
    /// # Arguments
    /// * `seed` - Seed for the internal noise generator
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: 0.1,
            rest_state: 0.1,
            g_min: 1e-6,  // 1 MOhm
            g_max: 1e-3,  // 1 kOhm
            v_set: 0.8,
            v_reset: -0.8,
            rate_per_volt: 0.2,
            tau_s: 30.0,
            noise_frac: 0.02,
            applied_v: 0.0,
            compliance_a: 1e-3,
            output_on: false,
            connected: true,
            last_touch: Instant::now(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Current internal state in `[0, 1]`.
    pub fn state(&self) -> f64 {
        self.state
    }

    /// Last programmed voltage in volts.
    pub fn applied_voltage(&self) -> f64 {
        self.applied_v
    }

    /// Whether the output stage is enabled.
    pub fn output_enabled(&self) -> bool {
        self.output_on
    }

    /// Simulate a dropped hardware link.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Set the volatile relaxation time constant in seconds.
    pub fn set_tau(&mut self, tau_s: f64) {
        self.tau_s = tau_s.max(1e-3);
    }

    fn conductance(&self) -> f64 {
        self.g_min + self.state * (self.g_max - self.g_min)
    }

    /// Relax the state toward rest, then apply the switching effect of the
    /// level that is currently programmed.
    fn advance(&mut self) {
        let dt = self.last_touch.elapsed().as_secs_f64();
        self.last_touch = Instant::now();
        self.state = self.rest_state + (self.state - self.rest_state) * (-dt / self.tau_s).exp();

        if self.applied_v > self.v_set {
            self.state += self.rate_per_volt * (self.applied_v - self.v_set);
        } else if self.applied_v < self.v_reset {
            self.state += self.rate_per_volt * (self.applied_v - self.v_reset);
        }
        self.state = self.state.clamp(0.0, 1.0);
    }

    fn check_link(&self) -> Result<(), InstrumentError> {
        if self.connected {
            Ok(())
        } else {
            Err(InstrumentError::NotConnected)
        }
    }
}

impl Default for MockSmu {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl SourceMeasure for MockSmu {
    fn set_voltage(&mut self, volts: f64, compliance_a: f64) -> Result<(), InstrumentError> {
        self.check_link()?;
        self.advance();
        self.applied_v = volts;
        self.compliance_a = compliance_a.abs();
        debug!("MockSmu: set {:.3} V (compliance {:.1e} A)", volts, compliance_a);
        Ok(())
    }

    fn set_current(&mut self, amps: f64, compliance_v: f64) -> Result<(), InstrumentError> {
        self.check_link()?;
        self.advance();
        // Current sourcing maps back to the voltage that would produce it.
        self.applied_v = (amps / self.conductance()).clamp(-compliance_v.abs(), compliance_v.abs());
        debug!("MockSmu: set {:.3e} A (compliance {:.2} V)", amps, compliance_v);
        Ok(())
    }

    fn measure(&mut self) -> Result<Measurement, InstrumentError> {
        self.check_link()?;
        self.advance();
        let ideal = if self.output_on {
            self.applied_v * self.conductance()
        } else {
            0.0
        };
        let noise = 1.0 + self.noise_frac * (self.rng.gen::<f64>() - 0.5) * 2.0;
        let current = (ideal * noise).clamp(-self.compliance_a, self.compliance_a);
        Ok(Measurement {
            voltage_v: self.applied_v,
            current_a: current,
        })
    }

    fn enable_output(&mut self, on: bool) -> Result<(), InstrumentError> {
        self.check_link()?;
        self.output_on = on;
        debug!("MockSmu: output {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        self.output_on = false;
        self.connected = false;
        debug!("MockSmu: session closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// =============================================================================
// ScriptedSmu - Deterministic Replay Instrument
// =============================================================================

/// One command received by [`ScriptedSmu`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SmuCommand {
    /// `set_voltage(volts, compliance_a)`
    SetVoltage { volts: f64, compliance_a: f64 },
    /// `set_current(amps, compliance_v)`
    SetCurrent { amps: f64, compliance_v: f64 },
    /// `measure()`
    Measure,
    /// `enable_output(on)`
    EnableOutput(bool),
    /// `close()`
    Close,
}

/// Instrument stub replaying a programmed list of current readings.
///
/// Every command is appended to an inspectable log, which is what tests use
/// to assert command ordering (for example that the output was parked after
/// a cancelled run). Scripted entries may be failures; once the script is
/// exhausted further reads return zero current.
///
/// # Example
///
/// ```rust,ignore
/// let mut smu = ScriptedSmu::with_currents(&[1e-6, 2e-6]);
/// smu.push_failure();
/// smu.push_current(4e-6);
/// // reads yield 1e-6, 2e-6, Err(..), 4e-6, then 0.0 forever
/// ```
pub struct ScriptedSmu {
    script: VecDeque<Result<f64, InstrumentError>>,
    log: Vec<SmuCommand>,
    last_volts: f64,
    output_on: bool,
    connected: bool,
}

impl ScriptedSmu {
    /// Create a stub with an empty script (all reads return 0 A).
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            log: Vec::new(),
            last_volts: 0.0,
            output_on: false,
            connected: true,
        }
    }

    /// Create a stub preloaded with current readings in amperes.
    pub fn with_currents(currents: &[f64]) -> Self {
        let mut smu = Self::new();
        for &i in currents {
            smu.push_current(i);
        }
        smu
    }

    /// Append one successful reading to the script.
    pub fn push_current(&mut self, amps: f64) {
        self.script.push_back(Ok(amps));
    }

    /// Append one failing reading to the script.
    pub fn push_failure(&mut self) {
        self.script
            .push_back(Err(InstrumentError::Comm("scripted fault".to_string())));
    }

    /// All commands received so far.
    pub fn commands(&self) -> &[SmuCommand] {
        &self.log
    }

    /// Number of `measure()` calls received so far.
    pub fn reads(&self) -> usize {
        self.log
            .iter()
            .filter(|c| matches!(c, SmuCommand::Measure))
            .count()
    }

    /// Last programmed voltage in volts.
    pub fn last_voltage(&self) -> f64 {
        self.last_volts
    }

    /// Whether the output stage is enabled.
    pub fn output_enabled(&self) -> bool {
        self.output_on
    }

    /// Simulate a dropped hardware link.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for ScriptedSmu {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMeasure for ScriptedSmu {
    fn set_voltage(&mut self, volts: f64, compliance_a: f64) -> Result<(), InstrumentError> {
        self.log.push(SmuCommand::SetVoltage {
            volts,
            compliance_a,
        });
        self.last_volts = volts;
        Ok(())
    }

    fn set_current(&mut self, amps: f64, compliance_v: f64) -> Result<(), InstrumentError> {
        self.log.push(SmuCommand::SetCurrent {
            amps,
            compliance_v,
        });
        Ok(())
    }

    fn measure(&mut self) -> Result<Measurement, InstrumentError> {
        self.log.push(SmuCommand::Measure);
        let current = match self.script.pop_front() {
            Some(entry) => entry?,
            None => 0.0,
        };
        Ok(Measurement {
            voltage_v: self.last_volts,
            current_a: current,
        })
    }

    fn enable_output(&mut self, on: bool) -> Result<(), InstrumentError> {
        self.log.push(SmuCommand::EnableOutput(on));
        self.output_on = on;
        Ok(())
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        self.log.push(SmuCommand::Close);
        self.output_on = false;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// =============================================================================
// MockLed - Simulated LED Driver
// =============================================================================

/// Mock LED driver tracking on/off state and drive power.
pub struct MockLed {
    on: bool,
    power_mw: f64,
    toggles: u32,
}

impl MockLed {
    /// Create a mock LED, initially off.
    pub fn new() -> Self {
        Self {
            on: false,
            power_mw: 0.0,
            toggles: 0,
        }
    }

    /// Whether the LED is currently on.
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Last programmed drive power in milliwatts.
    pub fn power_mw(&self) -> f64 {
        self.power_mw
    }

    /// Number of on/off transitions seen.
    pub fn toggles(&self) -> u32 {
        self.toggles
    }
}

impl Default for MockLed {
    fn default() -> Self {
        Self::new()
    }
}

impl LightSource for MockLed {
    fn led_on(&mut self, power_mw: f64) -> Result<(), InstrumentError> {
        if power_mw < 0.0 {
            return Err(InstrumentError::Rejected(format!(
                "negative LED power: {power_mw} mW"
            )));
        }
        if !self.on {
            self.toggles += 1;
        }
        self.on = true;
        self.power_mw = power_mw;
        debug!("MockLed: on at {:.1} mW", power_mw);
        Ok(())
    }

    fn led_off(&mut self) -> Result<(), InstrumentError> {
        if self.on {
            self.toggles += 1;
        }
        self.on = false;
        debug!("MockLed: off");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_smu_reads_ohmic_current() {
        let mut smu = MockSmu::with_seed(42);
        smu.enable_output(true).unwrap();
        smu.set_voltage(0.2, 1e-3).unwrap();

        let m = smu.measure().unwrap();
        assert_eq!(m.voltage_v, 0.2);
        // Low state: conductance near g_min plus 10% of the window.
        assert!(m.current_a > 0.0);
        assert!(m.current_a < 1e-4);
    }

    #[test]
    fn test_mock_smu_potentiates_above_set_threshold() {
        let mut smu = MockSmu::with_seed(42);
        let before = smu.state();
        smu.enable_output(true).unwrap();
        smu.set_voltage(1.5, 1e-3).unwrap();
        smu.measure().unwrap();
        assert!(smu.state() > before);
    }

    #[test]
    fn test_mock_smu_depresses_below_reset_threshold() {
        let mut smu = MockSmu::with_seed(42);
        smu.enable_output(true).unwrap();
        smu.set_voltage(1.5, 1e-3).unwrap();
        smu.measure().unwrap();
        let high = smu.state();

        smu.set_voltage(-1.5, 1e-3).unwrap();
        smu.measure().unwrap();
        assert!(smu.state() < high);
    }

    #[test]
    fn test_mock_smu_output_off_reads_zero() {
        let mut smu = MockSmu::with_seed(42);
        smu.set_voltage(1.0, 1e-3).unwrap();
        let m = smu.measure().unwrap();
        assert_eq!(m.current_a, 0.0);
    }

    #[test]
    fn test_mock_smu_disconnect_rejects_commands() {
        let mut smu = MockSmu::with_seed(42);
        smu.set_connected(false);
        assert!(!smu.is_connected());
        assert_eq!(
            smu.set_voltage(0.1, 1e-3),
            Err(InstrumentError::NotConnected)
        );
    }

    #[test]
    fn test_scripted_smu_replays_in_order() {
        let mut smu = ScriptedSmu::with_currents(&[1e-6, 2e-6]);
        smu.set_voltage(0.5, 1e-3).unwrap();

        assert_eq!(smu.measure().unwrap().current_a, 1e-6);
        assert_eq!(smu.measure().unwrap().current_a, 2e-6);
        // Exhausted script: zero current, last programmed voltage.
        let m = smu.measure().unwrap();
        assert_eq!(m.current_a, 0.0);
        assert_eq!(m.voltage_v, 0.5);
    }

    #[test]
    fn test_scripted_smu_scripted_failure_then_recovery() {
        let mut smu = ScriptedSmu::new();
        smu.push_current(1e-6);
        smu.push_failure();
        smu.push_current(3e-6);

        assert!(smu.measure().is_ok());
        assert!(smu.measure().is_err());
        assert_eq!(smu.measure().unwrap().current_a, 3e-6);
    }

    #[test]
    fn test_scripted_smu_logs_commands() {
        let mut smu = ScriptedSmu::new();
        smu.enable_output(true).unwrap();
        smu.set_voltage(1.0, 1e-3).unwrap();
        smu.measure().unwrap();
        smu.set_voltage(0.0, 1e-3).unwrap();
        smu.enable_output(false).unwrap();

        assert_eq!(smu.reads(), 1);
        assert_eq!(
            smu.commands().last(),
            Some(&SmuCommand::EnableOutput(false))
        );
        assert_eq!(smu.last_voltage(), 0.0);
        assert!(!smu.output_enabled());
    }

    #[test]
    fn test_mock_led_toggle_tracking() {
        let mut led = MockLed::new();
        assert!(!led.is_on());

        led.led_on(25.0).unwrap();
        assert!(led.is_on());
        assert_eq!(led.power_mw(), 25.0);

        // Re-asserting on is not a transition.
        led.led_on(30.0).unwrap();
        assert_eq!(led.toggles(), 1);

        led.led_off().unwrap();
        assert!(!led.is_on());
        assert_eq!(led.toggles(), 2);

        assert!(led.led_on(-1.0).is_err());
    }
}
