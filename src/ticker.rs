//! Repeating-task primitive for the single-threaded cooperative scheduler.
//!
//! The host's main loop pumps every ticker with an explicit `now`; a ticker
//! that comes due re-arms itself for one interval later. Stopping is soft:
//! it only clears the next deadline, it never interrupts a tick in flight.

use std::time::{Duration, Instant};

/// One self-re-arming deadline, driven by the host loop.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arm the ticker; the first tick comes due one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    /// Disarm. Idempotent.
    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Check whether the ticker is due at `now`; if so, re-arm for one
    /// interval later and return true.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
