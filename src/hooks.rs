//! Run control hooks: cooperative cancellation and live observation.
//!
//! Every long-running operation accepts a [`RunHooks`] bundle. Between
//! instrument commands the engine polls [`RunHooks::stop_requested`]; when
//! it reports `true` the run winds down at the next safe boundary, parks
//! the output and returns whatever was measured so far. Stopping is never
//! an error.
//!
//! Observation goes the other way: after each recorded reading the engine
//! calls the `on_point` callback with the fresh [`Sample`]. The callback is
//! for display and logging only; it cannot abort the run (use the stop
//! side for that).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::sample::Sample;

/// Whether a run step ran to completion or was stopped by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The step finished; keep going.
    Continue,
    /// A stop was requested; wind down and return partial results.
    Cancelled,
}

impl Progress {
    /// `true` if this is [`Progress::Cancelled`].
    pub fn is_cancelled(self) -> bool {
        matches!(self, Progress::Cancelled)
    }
}

/// Shareable one-way stop flag.
///
/// Clone it, hand one copy to the run and keep the other; `cancel()` from
/// any thread is observed by the engine at its next poll point. The flag
/// never resets.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Caller-supplied control bundle for one run.
///
/// All parts are optional; `RunHooks::default()` runs to completion
/// silently. Built with chained setters:
///
/// ```rust,ignore
/// let token = CancelToken::new();
/// let hooks = RunHooks::new()
///     .with_cancel(token.clone())
///     .with_on_point(|s| println!("{:.3} V -> {:.3e} A", s.voltage_v, s.current_a));
/// ```
#[derive(Default)]
pub struct RunHooks {
    cancel: Option<CancelToken>,
    should_stop: Option<Box<dyn FnMut() -> bool + Send>>,
    on_point: Option<Box<dyn FnMut(&Sample) + Send>>,
}

impl RunHooks {
    /// Hooks that never stop and observe nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a shared stop flag.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Attach a stop predicate, polled between instrument commands.
    pub fn with_should_stop(mut self, f: impl FnMut() -> bool + Send + 'static) -> Self {
        self.should_stop = Some(Box::new(f));
        self
    }

    /// Attach a per-reading observer.
    pub fn with_on_point(mut self, f: impl FnMut(&Sample) + Send + 'static) -> Self {
        self.on_point = Some(Box::new(f));
        self
    }

    /// Poll both stop sources. The token side is sticky; the predicate is
    /// asked again on every poll.
    pub fn stop_requested(&mut self) -> bool {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return true;
        }
        match self.should_stop.as_mut() {
            Some(f) => f(),
            None => false,
        }
    }

    /// Deliver a fresh reading to the observer, if any.
    pub fn notify(&mut self, sample: &Sample) {
        if let Some(f) = self.on_point.as_mut() {
            f(sample);
        }
    }
}
