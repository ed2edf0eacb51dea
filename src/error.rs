//! Custom error types for the measurement engine.
//!
//! This module defines the primary error type, `DaqError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration issues to timing-limit violations.
//!
//! ## Error Hierarchy
//!
//! `DaqError` is an enum that consolidates three families of failures:
//!
//! - **Validation errors** (`PulseWidthTooShort`, `AmplitudeOutOfRange`,
//!   `PeriodNotAbovePulseWidth`, `EdgeTooFast`, `EmptySweep`,
//!   `InvalidParameter`): raised by the timing validator and the sweep
//!   builder *before* any instrument command is issued for an operation.
//!   The engine never partially validates a request.
//! - **Connectivity errors** (`NotConnected`): raised when the borrowed
//!   source/measure collaborator reports not-connected at run start.
//! - **Ambient errors** (`Config`, `Io`, `Json`, `Csv`, `FeatureNotEnabled`):
//!   configuration loading and data export.
//!
//! Transient instrument faults that occur *mid-run* are deliberately not
//! represented here: the sequencer absorbs them, recording `NaN` samples or
//! skipping a level-set, so a single flaky read never aborts a multi-hour
//! sweep. See [`crate::sequencer`] for that policy.

use std::time::Duration;

use thiserror::Error;

use crate::instrument::InstrumentError;

/// Convenience alias for results using the crate error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Errors surfaced by the measurement engine.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Pulse width {width:?} is below the {model} minimum of {min:?}")]
    PulseWidthTooShort {
        /// Hardware model whose limit was violated.
        model: String,
        /// Requested pulse width.
        width: Duration,
        /// Minimum pulse width the model supports.
        min: Duration,
    },

    #[error("Amplitude {amplitude_v} V is outside the {model} voltage range {min_v}..={max_v} V")]
    AmplitudeOutOfRange {
        /// Hardware model whose limit was violated.
        model: String,
        /// Requested amplitude.
        amplitude_v: f64,
        /// Lower bound of the model voltage range.
        min_v: f64,
        /// Upper bound of the model voltage range.
        max_v: f64,
    },

    #[error("Pulse period {period:?} must be strictly greater than the pulse width {width:?}")]
    PeriodNotAbovePulseWidth {
        /// Requested pulse period.
        period: Duration,
        /// Requested pulse width.
        width: Duration,
    },

    #[error("Rise/fall time {edge:?} is below the {model} minimum of {min:?}")]
    EdgeTooFast {
        /// Hardware model whose limit was violated.
        model: String,
        /// Requested rise or fall time.
        edge: Duration,
        /// Minimum edge time the model supports.
        min: Duration,
    },

    #[error("Sweep specification produced an empty voltage path")]
    EmptySweep,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Instrument '{model}' is not connected")]
    NotConnected {
        /// Hardware model the run was addressed to.
        model: String,
    },

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}
