//! Voltage path construction for staircase sweeps.
//!
//! A [`SweepSpec`] turns a declarative request (span, shape, pacing) into
//! the ordered list of voltages the engine will program, one instrument
//! set per entry. Paths are built eagerly and in full before the first
//! command so a malformed request can never leave the device mid-sweep.
//!
//! # Shapes
//!
//! - `Positive`: `start → stop → start`
//! - `Negative`: `start → −|neg_stop| → start`
//! - `Full`: `start → stop → −|neg_stop| → start`
//!
//! where `neg_stop` defaults to `stop` when not given. Leg endpoints are
//! always visited and appear exactly once; every emitted point is rounded
//! to 3 decimal places to stop accumulation drift (a resolution choice,
//! not a precision guarantee).
//!
//! # Pacing
//!
//! The effective step magnitude is resolved against the caller's step
//! interval (the dwell per point):
//!
//! - `FixedStep`: `|step_v|` as given
//! - `FixedRate`: `rate_v_per_s × step_interval`
//! - `FixedDuration`: `path length ÷ (total / step_interval)`
//!
//! A resolved step of exactly zero produces an empty path. Callers that
//! need a hard failure instead check for emptiness at their boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which polarities a sweep visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepShape {
    /// `start → stop → −|neg_stop| → start`.
    Full,
    /// `start → stop → start`.
    Positive,
    /// `start → −|neg_stop| → start`.
    Negative,
}

/// How the step size of a sweep is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StepPacing {
    /// Explicit voltage increment per point.
    FixedStep {
        /// Step magnitude in volts; the sign is ignored.
        step_v: f64,
    },
    /// Constant slew rate; the step is `rate × step_interval`.
    FixedRate {
        /// Slew rate in volts per second.
        rate_v_per_s: f64,
    },
    /// Whole sweep fits in a fixed wall-clock window.
    FixedDuration {
        /// Total sweep duration.
        #[serde(with = "humantime_serde")]
        total: Duration,
    },
}

/// Declarative staircase sweep request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSpec {
    /// First and last voltage of the path.
    pub start_v: f64,
    /// Positive-going extremum.
    pub stop_v: f64,
    /// Step-size rule.
    pub pacing: StepPacing,
    /// Polarities visited.
    pub shape: SweepShape,
    /// Negative-going extremum; `|stop_v|` when `None`. Stored unsigned or
    /// signed, only the magnitude is used.
    #[serde(default)]
    pub neg_stop_v: Option<f64>,
}

impl SweepSpec {
    /// Convenience constructor for the common fixed-step case.
    pub fn fixed_step(start_v: f64, stop_v: f64, step_v: f64, shape: SweepShape) -> Self {
        Self {
            start_v,
            stop_v,
            pacing: StepPacing::FixedStep { step_v },
            shape,
            neg_stop_v: None,
        }
    }

    /// The negative extremum this spec will visit.
    pub fn negative_stop(&self) -> f64 {
        -self.neg_stop_v.unwrap_or(self.stop_v).abs()
    }

    /// Turning points after `start_v`, in visit order.
    fn leg_targets(&self) -> Vec<f64> {
        match self.shape {
            SweepShape::Positive => vec![self.stop_v, self.start_v],
            SweepShape::Negative => vec![self.negative_stop(), self.start_v],
            SweepShape::Full => vec![self.stop_v, self.negative_stop(), self.start_v],
        }
    }

    /// The sweep extrema this shape reverses at, rounded exactly as the
    /// path points are, so equality against path values is safe.
    pub fn turning_points(&self) -> Vec<f64> {
        match self.shape {
            SweepShape::Positive => vec![round3(self.stop_v)],
            SweepShape::Negative => vec![round3(self.negative_stop())],
            SweepShape::Full => {
                vec![round3(self.stop_v), round3(self.negative_stop())]
            }
        }
    }

    /// Total unsigned voltage distance covered by the path.
    pub fn path_length_v(&self) -> f64 {
        let mut from = self.start_v;
        let mut length = 0.0;
        for target in self.leg_targets() {
            length += (target - from).abs();
            from = target;
        }
        length
    }

    /// Step magnitude after applying the pacing rule.
    ///
    /// Not-a-number inputs resolve to zero so the caller sees the empty
    /// path rather than a poisoned comparison.
    pub fn resolved_step_v(&self, step_interval: Duration) -> f64 {
        let step = match self.pacing {
            StepPacing::FixedStep { step_v } => step_v.abs(),
            StepPacing::FixedRate { rate_v_per_s } => {
                rate_v_per_s.abs() * step_interval.as_secs_f64()
            }
            StepPacing::FixedDuration { total } => {
                let interval_s = step_interval.as_secs_f64();
                if interval_s == 0.0 {
                    return 0.0;
                }
                let points = total.as_secs_f64() / interval_s;
                self.path_length_v() / points
            }
        };
        if step.is_nan() {
            0.0
        } else {
            step
        }
    }

    /// Build the ordered voltage path.
    ///
    /// Returns an empty vector when the resolved step is zero.
    pub fn voltage_path(&self, step_interval: Duration) -> Vec<f64> {
        let step = self.resolved_step_v(step_interval);
        if step <= 0.0 {
            return Vec::new();
        }

        let mut path = vec![round3(self.start_v)];
        for target in self.leg_targets() {
            let from = match path.last() {
                Some(&v) => v,
                None => break,
            };
            walk_leg(from, round3(target), step, &mut path);
        }
        path
    }
}

/// Append points strictly after `from` up to and including `to`.
///
/// `from` must already be in the output; equal endpoints emit nothing,
/// which is what merges duplicates where two legs join.
fn walk_leg(from: f64, to: f64, step: f64, out: &mut Vec<f64>) {
    if to == from {
        return;
    }
    let dir = if to > from { 1.0 } else { -1.0 };
    let mut k: u64 = 1;
    loop {
        let v = round3(from + dir * step * k as f64);
        let reached = if dir > 0.0 { v >= to } else { v <= to };
        if reached {
            out.push(to);
            return;
        }
        out.push(v);
        k += 1;
    }
}

/// Round to 3 decimal places.
fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
