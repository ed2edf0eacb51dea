//! Electrical-test protocol library.
//!
//! Every protocol is a free `run` function composing the same pieces: path
//! or ladder construction, timing validation against the caller's profile,
//! and repeated [`crate::sequencer::PulseSequencer`] cycles. The protocols
//! differ only in pulse ordering and inter-pulse semantics.
//!
//! # Uniform Contract
//!
//! - All validation completes before the first instrument command.
//! - The connectivity precheck runs after validation, before the first
//!   command.
//! - Results come back as a [`crate::sample::SampleLog`] plus
//!   protocol-specific auxiliary arrays in the outcome struct.
//! - A stop request ends the run at the next safe boundary and returns the
//!   partial results with `cancelled: true`; stopping is never an error.
//! - The instrument is parked (0 V, output off) on every exit path.
//!
//! # Example
//!
//! ```rust,ignore
//! use memdaq::protocols::iv;
//! use memdaq::sweep::{SweepShape, SweepSpec};
//!
//! let params = iv::IvSweepParams {
//!     sweep: SweepSpec::fixed_step(0.0, 1.0, 0.1, SweepShape::Full),
//!     step_interval: Duration::from_millis(10),
//!     compliance_a: 1e-3,
//!     pause_at_extrema: None,
//! };
//! let outcome = iv::run(&mut smu, profile, &params, &mut hooks)?;
//! println!("{} points", outcome.log.len());
//! ```

pub mod endurance;
pub mod frequency;
pub mod ispp;
pub mod iv;
pub mod noise;
pub mod potentiation;
pub mod ppf;
pub mod pulse;
pub mod retention;
pub mod srdp;
pub mod stdp;
pub mod transient;

use crate::error::{DaqError, DaqResult};
use crate::instrument::SourceMeasure;
use crate::profile::HardwareProfile;

/// Denominator floor for relative-change indices, in amperes. Keeps the
/// paired-pulse and plasticity indices finite when the baseline reading is
/// at the noise floor.
pub(crate) const EPSILON_A: f64 = 1e-12;

/// `(after - baseline) / max(|baseline|, EPSILON_A)`.
///
/// `NaN` readings propagate to a `NaN` index.
pub(crate) fn relative_change(after: f64, baseline: f64) -> f64 {
    (after - baseline) / baseline.abs().max(EPSILON_A)
}

/// Connectivity precheck shared by every protocol. Runs after validation,
/// before the first command.
pub(crate) fn preflight(smu: &dyn SourceMeasure, profile: &HardwareProfile) -> DaqResult<()> {
    if !smu.is_connected() {
        return Err(DaqError::NotConnected {
            model: profile.model.clone(),
        });
    }
    Ok(())
}
