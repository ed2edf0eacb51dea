//! Pulse sequencing against a borrowed instrument.
//!
//! [`PulseSequencer`] owns the one pulse-apply-then-read cycle every
//! protocol is built from, plus the cancellable wait primitives. Protocols
//! never call `set_voltage`/`measure` directly; they compose these
//! primitives so level ordering, stop polling, the NaN degrade policy and
//! output parking live in exactly one place.
//!
//! # State Machine
//!
//! ```text
//! IDLE -> ARM(base/read level) -> PULSE(amplitude for width)
//!      -> RETURN(read level) -> SAMPLE -> IDLE
//! ```
//!
//! `arm` is called once per run; each [`PulseSequencer::pulse_and_read`]
//! walks PULSE -> RETURN -> SAMPLE.
//!
//! # Failure Safety
//!
//! The sequencer parks the instrument (0 V, output off) when the run ends,
//! through the explicit [`PulseSequencer::finish`] on the normal path and a
//! `Drop` fallback on every other path, including panics raised inside
//! caller callbacks. Park failures are logged and never mask the run's
//! outcome.
//!
//! # Degrade Policy
//!
//! Mid-run instrument faults do not abort: a failed `measure()` records a
//! `NaN` row, a failed level set is logged and skipped. One flaky reading
//! must not kill a multi-hour run; the gaps stay visible in the data.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::hooks::{Progress, RunHooks};
use crate::instrument::SourceMeasure;
use crate::sample::{Sample, SampleLog};
use crate::timing::PulseSpec;

/// Sleep slice for cancellable holds. Long waits are chopped into slices
/// this size so a stop request is observed promptly; waits shorter than
/// one slice sleep their exact remainder.
const HOLD_SLICE: Duration = Duration::from_millis(5);

/// Wall-clock reference for one run.
///
/// Started when the sequencer is created; every recorded sample carries
/// seconds since this origin.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    start: Instant,
}

impl RunClock {
    /// Start the clock now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds elapsed since the clock started.
    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

/// How a wait window between pulses is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapSampling {
    /// Sleep through the gap (sliced, cancellable).
    Sleep,
    /// Measure in a tight loop for the whole gap (no sleep).
    FreeRun,
}

/// Drives one instrument through pulse/read cycles for the duration of a
/// single run.
///
/// Borrows the instrument mutably, which is what guarantees at most one
/// command in flight: no other code can reach the hardware while a
/// sequencer exists.
pub struct PulseSequencer<'a> {
    smu: &'a mut dyn SourceMeasure,
    compliance_a: f64,
    level_v: f64,
    clock: RunClock,
    parked: bool,
}

impl<'a> PulseSequencer<'a> {
    /// Wrap `smu` for one run with the given current compliance.
    ///
    /// Issues no commands; call [`PulseSequencer::arm`] to energize.
    pub fn new(smu: &'a mut dyn SourceMeasure, compliance_a: f64) -> Self {
        Self {
            smu,
            compliance_a,
            level_v: 0.0,
            clock: RunClock::new(),
            parked: false,
        }
    }

    /// Seconds since this run started.
    pub fn elapsed_s(&self) -> f64 {
        self.clock.elapsed_s()
    }

    /// Last successfully programmed level in volts.
    pub fn level_v(&self) -> f64 {
        self.level_v
    }

    /// Enable the output and go to `level_v`.
    pub fn arm(&mut self, level_v: f64) {
        if let Err(e) = self.smu.enable_output(true) {
            warn!("Output enable failed ({e}); continuing");
        }
        self.set_level(level_v);
    }

    /// Program a level, skipping on failure per the degrade policy.
    pub fn set_level(&mut self, volts: f64) {
        match self.smu.set_voltage(volts, self.compliance_a) {
            Ok(()) => self.level_v = volts,
            Err(e) => warn!("Level set to {volts} V failed ({e}); skipping"),
        }
    }

    /// Take one reading, record it and notify the observer.
    ///
    /// A failed reading becomes a `NaN` row at the programmed level.
    pub fn take_sample(&mut self, log: &mut SampleLog, hooks: &mut RunHooks) -> Sample {
        let sample = match self.smu.measure() {
            Ok(m) => Sample {
                voltage_v: m.voltage_v,
                current_a: m.current_a,
                elapsed_s: self.clock.elapsed_s(),
            },
            Err(e) => {
                warn!("Measurement failed ({e}); recording NaN");
                Sample::failed(self.level_v, self.clock.elapsed_s())
            }
        };
        log.push(sample);
        hooks.notify(&sample);
        sample
    }

    /// Cancellable wait: sliced sleep with a stop poll before every slice.
    pub fn hold(&mut self, dur: Duration, hooks: &mut RunHooks) -> Progress {
        let deadline = Instant::now() + dur;
        loop {
            if hooks.stop_requested() {
                return Progress::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return Progress::Continue;
            }
            thread::sleep(deadline.saturating_duration_since(now).min(HOLD_SLICE));
        }
    }

    /// Cancellable relax/settle window. Same mechanics as `hold`; named for
    /// call sites where the wait is about the device, not the pulse shape.
    pub fn settle(&mut self, dur: Duration, hooks: &mut RunHooks) -> Progress {
        self.hold(dur, hooks)
    }

    /// Free-run sampling: measure in a tight loop, no sleeping, until `dur`
    /// has passed or a stop is requested.
    pub fn sample_during(
        &mut self,
        dur: Duration,
        log: &mut SampleLog,
        hooks: &mut RunHooks,
    ) -> Progress {
        let deadline = Instant::now() + dur;
        loop {
            if hooks.stop_requested() {
                return Progress::Cancelled;
            }
            if Instant::now() >= deadline {
                return Progress::Continue;
            }
            self.take_sample(log, hooks);
        }
    }

    /// One full PULSE -> RETURN -> SAMPLE cycle.
    ///
    /// Returns `None` when a stop request landed before the sample was
    /// taken; a stop observed before the first level change leaves the
    /// instrument untouched.
    pub fn pulse_and_read(
        &mut self,
        pulse: &PulseSpec,
        read_v: f64,
        log: &mut SampleLog,
        hooks: &mut RunHooks,
    ) -> Option<Sample> {
        if hooks.stop_requested() {
            return None;
        }
        self.set_level(pulse.amplitude_v);
        if self.hold(pulse.width, hooks).is_cancelled() {
            self.set_level(read_v);
            return None;
        }
        self.set_level(read_v);
        Some(self.take_sample(log, hooks))
    }

    /// `count` identical pulse/read cycles with the cycle gap spent per
    /// `gap`. Readings land in `log`; free-run gaps add further rows.
    pub fn pulse_train(
        &mut self,
        pulse: &PulseSpec,
        count: u32,
        read_v: f64,
        gap: GapSampling,
        log: &mut SampleLog,
        hooks: &mut RunHooks,
    ) -> Progress {
        for _ in 0..count {
            if self.pulse_and_read(pulse, read_v, log, hooks).is_none() {
                return Progress::Cancelled;
            }
            let spent = match gap {
                GapSampling::Sleep => self.hold(pulse.gap(), hooks),
                GapSampling::FreeRun => self.sample_during(pulse.gap(), log, hooks),
            };
            if spent.is_cancelled() {
                return Progress::Cancelled;
            }
        }
        Progress::Continue
    }

    /// One stimulus pulse with no read: amplitude for `width`, back to the
    /// base level. The cycle gap is not waited; callers own what follows.
    pub fn drive_pulse(&mut self, pulse: &PulseSpec, hooks: &mut RunHooks) -> Progress {
        if hooks.stop_requested() {
            return Progress::Cancelled;
        }
        self.set_level(pulse.amplitude_v);
        let held = self.hold(pulse.width, hooks);
        self.set_level(pulse.base_v);
        held
    }

    /// Drive `count` pulses with no reads at all (stimulus-only trains).
    pub fn drive_train(&mut self, pulse: &PulseSpec, count: u32, hooks: &mut RunHooks) -> Progress {
        for _ in 0..count {
            if self.drive_pulse(pulse, hooks).is_cancelled() {
                return Progress::Cancelled;
            }
            if self.hold(pulse.gap(), hooks).is_cancelled() {
                return Progress::Cancelled;
            }
        }
        Progress::Continue
    }

    /// Park the instrument and end the run.
    ///
    /// Always call this on the normal path; the `Drop` fallback exists for
    /// unwinds and early returns, not as the primary exit.
    pub fn finish(&mut self) {
        self.park();
    }

    fn park(&mut self) {
        if self.parked {
            return;
        }
        if let Err(e) = self.smu.set_voltage(0.0, self.compliance_a) {
            warn!("Park: zero-level set failed ({e})");
        }
        if let Err(e) = self.smu.enable_output(false) {
            warn!("Park: output disable failed ({e})");
        }
        self.level_v = 0.0;
        self.parked = true;
    }
}

impl Drop for PulseSequencer<'_> {
    fn drop(&mut self) {
        if !self.parked {
            debug!("Sequencer dropped without finish(); parking output");
            self.park();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{ScriptedSmu, SmuCommand};
    use crate::profile::ProfileRegistry;
    use crate::timing::PulseSpec;

    fn fast_pulse(amplitude_v: f64) -> PulseSpec {
        let registry = ProfileRegistry::new();
        let profile = registry.get_limits("Keithley 4200A_pmu");
        PulseSpec::for_profile(profile, amplitude_v, Duration::from_micros(50))
    }

    #[test]
    fn test_pulse_and_read_command_order() {
        let mut smu = ScriptedSmu::with_currents(&[2e-6]);
        let mut log = SampleLog::new();
        let mut hooks = RunHooks::new();

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        seq.arm(0.2);
        let sample = seq.pulse_and_read(&fast_pulse(1.0), 0.2, &mut log, &mut hooks);
        seq.finish();
        drop(seq);

        let sample = sample.unwrap();
        assert_eq!(sample.current_a, 2e-6);
        assert_eq!(log.len(), 1);

        let volts: Vec<f64> = smu
            .commands()
            .iter()
            .filter_map(|c| match c {
                SmuCommand::SetVoltage { volts, .. } => Some(*volts),
                _ => None,
            })
            .collect();
        // arm(read), pulse top, return to read, park.
        assert_eq!(volts, vec![0.2, 1.0, 0.2, 0.0]);
    }

    #[test]
    fn test_immediate_stop_touches_nothing() {
        let mut smu = ScriptedSmu::new();
        let mut log = SampleLog::new();
        let mut hooks = RunHooks::new().with_should_stop(|| true);

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        let sample = seq.pulse_and_read(&fast_pulse(1.0), 0.2, &mut log, &mut hooks);
        seq.finish();
        drop(seq);

        assert!(sample.is_none());
        assert!(log.is_empty());
        assert_eq!(smu.reads(), 0);
        // Only the park sequence reached the instrument.
        let nonzero_sets = smu
            .commands()
            .iter()
            .filter(|c| matches!(c, SmuCommand::SetVoltage { volts, .. } if *volts != 0.0))
            .count();
        assert_eq!(nonzero_sets, 0);
    }

    #[test]
    fn test_cancel_during_hold_skips_sample() {
        let mut smu = ScriptedSmu::with_currents(&[1e-6]);
        let mut log = SampleLog::new();
        let mut polls = 0;
        let mut hooks = RunHooks::new().with_should_stop(move || {
            polls += 1;
            polls >= 2
        });

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        seq.arm(0.2);
        let sample = seq.pulse_and_read(&fast_pulse(1.0), 0.2, &mut log, &mut hooks);
        seq.finish();
        drop(seq);

        assert!(sample.is_none());
        assert_eq!(smu.reads(), 0);
    }

    #[test]
    fn test_failed_measure_records_nan_and_continues() {
        let mut smu = ScriptedSmu::new();
        smu.push_failure();
        smu.push_current(5e-6);
        let mut log = SampleLog::new();
        let mut hooks = RunHooks::new();

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        seq.arm(0.2);
        let first = seq.pulse_and_read(&fast_pulse(1.0), 0.2, &mut log, &mut hooks);
        let second = seq.pulse_and_read(&fast_pulse(1.0), 0.2, &mut log, &mut hooks);
        seq.finish();

        assert!(first.unwrap().current_a.is_nan());
        assert_eq!(second.unwrap().current_a, 5e-6);
        assert_eq!(log.len(), 2);
        assert_eq!(log.failed_rows(), 1);
    }

    #[test]
    fn test_drop_parks_output() {
        let mut smu = ScriptedSmu::new();
        {
            let mut seq = PulseSequencer::new(&mut smu, 1e-3);
            seq.arm(0.5);
            // No finish(): simulate an early return.
        }
        assert!(!smu.output_enabled());
        assert_eq!(smu.last_voltage(), 0.0);
        assert_eq!(
            smu.commands().last(),
            Some(&SmuCommand::EnableOutput(false))
        );
    }

    #[test]
    fn test_finish_then_drop_parks_once() {
        let mut smu = ScriptedSmu::new();
        {
            let mut seq = PulseSequencer::new(&mut smu, 1e-3);
            seq.arm(0.5);
            seq.finish();
        }
        let disables = smu
            .commands()
            .iter()
            .filter(|c| matches!(c, SmuCommand::EnableOutput(false)))
            .count();
        assert_eq!(disables, 1);
    }

    #[test]
    fn test_panicking_observer_still_parks() {
        let mut smu = ScriptedSmu::with_currents(&[1e-6]);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut log = SampleLog::new();
            let mut hooks = RunHooks::new().with_on_point(|_| panic!("observer died"));
            let mut seq = PulseSequencer::new(&mut smu, 1e-3);
            seq.arm(0.2);
            seq.pulse_and_read(&fast_pulse(1.0), 0.2, &mut log, &mut hooks);
        }));

        assert!(result.is_err());
        assert!(!smu.output_enabled());
        assert_eq!(smu.last_voltage(), 0.0);
    }

    #[test]
    fn test_pulse_train_read_count() {
        let mut smu = ScriptedSmu::with_currents(&[1e-6, 2e-6, 3e-6]);
        let mut log = SampleLog::new();
        let mut hooks = RunHooks::new();

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        seq.arm(0.2);
        let done = seq.pulse_train(
            &fast_pulse(1.0),
            3,
            0.2,
            GapSampling::Sleep,
            &mut log,
            &mut hooks,
        );
        seq.finish();
        drop(seq);

        assert_eq!(done, Progress::Continue);
        assert_eq!(log.len(), 3);
        assert_eq!(smu.reads(), 3);
    }

    #[test]
    fn test_free_run_gap_adds_rows() {
        let mut smu = ScriptedSmu::new();
        let mut log = SampleLog::new();
        let mut hooks = RunHooks::new();

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        seq.arm(0.2);
        let pulse = fast_pulse(1.0).with_period(Duration::from_millis(5));
        let done = seq.pulse_train(
            &pulse,
            1,
            0.2,
            GapSampling::FreeRun,
            &mut log,
            &mut hooks,
        );
        seq.finish();

        assert_eq!(done, Progress::Continue);
        // One per-pulse read plus free-run rows from the ~5 ms gap.
        assert!(log.len() > 1);
    }

    #[test]
    fn test_drive_train_never_reads() {
        let mut smu = ScriptedSmu::new();
        let mut hooks = RunHooks::new();

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        seq.arm(0.0);
        let done = seq.drive_train(&fast_pulse(1.0), 4, &mut hooks);
        seq.finish();
        drop(seq);

        assert_eq!(done, Progress::Continue);
        assert_eq!(smu.reads(), 0);
    }

    #[test]
    fn test_sample_during_is_dense() {
        let mut smu = ScriptedSmu::new();
        let mut log = SampleLog::new();
        let mut hooks = RunHooks::new();

        let mut seq = PulseSequencer::new(&mut smu, 1e-3);
        seq.arm(0.1);
        let done = seq.sample_during(Duration::from_millis(2), &mut log, &mut hooks);
        seq.finish();

        assert_eq!(done, Progress::Continue);
        // No sleeping: a 2 ms window yields many rows even on slow machines.
        assert!(log.len() > 10);
    }
}
