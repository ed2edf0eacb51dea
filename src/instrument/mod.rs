//! Instrument collaborator traits.
//!
//! The engine never talks to GPIB/VISA or a vendor SDK directly. Callers own
//! an object implementing [`SourceMeasure`] and lend it to the engine
//! (`&mut`) for the duration of one operation call. Within that call the
//! engine issues strictly sequential commands; the `&mut` borrow is what
//! enforces the at-most-one-command-in-flight guarantee at compile time.
//!
//! Every method is fallible with [`InstrumentError`] so the engine can make
//! an explicit policy decision at each call site (record `NaN`, skip, or
//! abort) instead of silently absorbing arbitrary failures.
//!
//! # Units
//!
//! Volts, amperes and seconds throughout. Compliance values are the safety
//! clamp on the complementary quantity: `compliance_a` limits current while
//! sourcing voltage, `compliance_v` limits voltage while sourcing current.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mock;

pub use mock::{MockLed, MockSmu, ScriptedSmu};

/// Errors reported by an instrument collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    /// The instrument handle is present but the hardware link is down.
    #[error("Instrument is not connected")]
    NotConnected,

    /// The command was rejected by the hardware (bad range, busy, ...).
    #[error("Command rejected: {0}")]
    Rejected(String),

    /// The transport layer failed (timeout, dropped link, garbled reply).
    #[error("Communication failure: {0}")]
    Comm(String),
}

/// A single measurement returned by the instrument.
///
/// This is the one typed result shape at the collaborator boundary. Hardware
/// backends that only report one quantity fill the other from their last
/// programmed level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measured (or last programmed) terminal voltage in volts.
    pub voltage_v: f64,
    /// Measured current in amperes.
    pub current_a: f64,
}

/// Source/measure unit as consumed by the engine.
///
/// Implementations wrap whatever transport the lab uses (KXCI over GPIB, a
/// vendor SDK, a simulation). All operations are synchronous and assumed
/// fast relative to the engine's sleep-based timing; a stuck call blocks the
/// run (known limitation: there is no internal timeout).
pub trait SourceMeasure {
    /// Source `volts` with current compliance `compliance_a`.
    fn set_voltage(&mut self, volts: f64, compliance_a: f64) -> Result<(), InstrumentError>;

    /// Source `amps` with voltage compliance `compliance_v`.
    fn set_current(&mut self, amps: f64, compliance_v: f64) -> Result<(), InstrumentError>;

    /// Take one reading at the present output level.
    fn measure(&mut self) -> Result<Measurement, InstrumentError>;

    /// Enable or disable the output stage.
    fn enable_output(&mut self, on: bool) -> Result<(), InstrumentError>;

    /// Release the hardware session.
    fn close(&mut self) -> Result<(), InstrumentError>;

    /// Whether the hardware link is currently up.
    ///
    /// Consulted by the service once per run, after validation and before
    /// the first command. Defaults to `true` for backends that cannot tell.
    fn is_connected(&self) -> bool {
        true
    }

    /// Convenience accessor: one reading, current only.
    fn measure_current(&mut self) -> Result<f64, InstrumentError> {
        Ok(self.measure()?.current_a)
    }

    /// Convenience accessor: one reading, voltage only.
    fn measure_voltage(&mut self) -> Result<f64, InstrumentError> {
        Ok(self.measure()?.voltage_v)
    }
}

/// Optional illumination collaborator (LED driver on a PSU channel).
///
/// Protocols that define optical phases (retention, transient decay) switch
/// the source at their phase boundaries; everything else ignores it.
pub trait LightSource {
    /// Switch the LED on at `power_mw` milliwatts of drive.
    fn led_on(&mut self, power_mw: f64) -> Result<(), InstrumentError>;

    /// Switch the LED off.
    fn led_off(&mut self) -> Result<(), InstrumentError>;
}
