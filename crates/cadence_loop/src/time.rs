//! Clocks
//!
//! The scheduler reads time through the [`Clock`] trait so delta computation,
//! error-dedup windows, and sweep timestamps are injectable. Production code
//! uses [`MonotonicClock`]; tests drive [`ManualClock`] deterministically.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A monotonic time source the scheduler samples once per tick
pub trait Clock {
    /// Current reading
    fn now(&self) -> Instant;
}

/// The real monotonic clock
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same reading: keep one clone to advance while the
/// scheduler holds another.
#[derive(Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    /// Create a clock starting at the current real time
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    /// Advance the reading by `delta`
    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
