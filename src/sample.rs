//! Sample types shared by every protocol.
//!
//! All measured data flows through two shapes: [`Sample`], one timestamped
//! reading, and [`SampleLog`], the append-only run record kept as parallel
//! columns so callers can hand slices straight to plotting or file writers.
//!
//! # Failed Readings
//!
//! A reading that the instrument could not produce is still recorded, with
//! `current_a = NaN` and the voltage the engine had programmed. Row count
//! therefore always matches the number of attempted readings, and the gap
//! is visible in the data instead of silently shortening the run.

use serde::{Deserialize, Serialize};

/// One timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Programmed (or read-back) voltage in volts.
    pub voltage_v: f64,
    /// Measured current in amperes; `NaN` if the reading failed.
    pub current_a: f64,
    /// Seconds since the start of the run.
    pub elapsed_s: f64,
}

impl Sample {
    /// A placeholder row for a reading the instrument failed to deliver.
    pub fn failed(voltage_v: f64, elapsed_s: f64) -> Self {
        Self {
            voltage_v,
            current_a: f64::NAN,
            elapsed_s,
        }
    }

    /// Resistance in ohms, or `NaN` when voltage is zero or the reading
    /// failed.
    pub fn resistance_ohm(&self) -> f64 {
        if self.voltage_v == 0.0 {
            f64::NAN
        } else {
            self.voltage_v / self.current_a
        }
    }
}

/// Append-only record of one run, stored as parallel columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleLog {
    voltages_v: Vec<f64>,
    currents_a: Vec<f64>,
    timestamps_s: Vec<f64>,
}

impl SampleLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty log sized for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            voltages_v: Vec::with_capacity(capacity),
            currents_a: Vec::with_capacity(capacity),
            timestamps_s: Vec::with_capacity(capacity),
        }
    }

    /// Append one reading.
    pub fn push(&mut self, sample: Sample) {
        self.voltages_v.push(sample.voltage_v);
        self.currents_a.push(sample.current_a);
        self.timestamps_s.push(sample.elapsed_s);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.voltages_v.len()
    }

    /// Whether the log holds no rows.
    pub fn is_empty(&self) -> bool {
        self.voltages_v.is_empty()
    }

    /// The most recent row, if any.
    pub fn last(&self) -> Option<Sample> {
        let idx = self.len().checked_sub(1)?;
        Some(self.row(idx))
    }

    /// The row at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds, like slice indexing.
    pub fn row(&self, idx: usize) -> Sample {
        Sample {
            voltage_v: self.voltages_v[idx],
            current_a: self.currents_a[idx],
            elapsed_s: self.timestamps_s[idx],
        }
    }

    /// Programmed voltages, one per row.
    pub fn voltages(&self) -> &[f64] {
        &self.voltages_v
    }

    /// Measured currents, one per row (`NaN` marks failed readings).
    pub fn currents(&self) -> &[f64] {
        &self.currents_a
    }

    /// Seconds since run start, one per row.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps_s
    }

    /// Iterate over rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }

    /// Number of rows whose reading failed.
    pub fn failed_rows(&self) -> usize {
        self.currents_a.iter().filter(|i| i.is_nan()).count()
    }
}
