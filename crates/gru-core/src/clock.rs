//! Countdown and elapsed-time tracking for a timed page.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::duration::{format_clock, parse_go_duration};
use crate::error::SessionError;

/// A consistent (remaining, elapsed) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub remaining: Duration,
    pub elapsed: Duration,
}

impl ClockReading {
    pub fn remaining_display(&self) -> String {
        format_clock(self.remaining)
    }

    pub fn elapsed_display(&self) -> String {
        format_clock(self.elapsed)
    }
}

/// Result of one [`Clock::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The clock is not running.
    Idle,
    /// No whole interval has passed since the last applied one.
    Unchanged,
    /// `intervals` whole intervals were applied; time is left.
    Advanced { intervals: u64 },
    /// Remaining time reached zero. Reported once per start.
    Expired,
}

/// Countdown anchored to a monotonic start instant.
///
/// A tick does not assume one interval passed: it counts the whole intervals
/// between the start instant and `now` and applies the ones not applied yet.
/// Late ticks catch up and early or duplicate ticks are no-ops, so the clock
/// never drifts from wall time by more than one interval.
#[derive(Debug, Clone)]
pub struct Clock {
    interval: Duration,
    started_at: Option<Instant>,
    applied: u64,
    remaining: Duration,
    elapsed: Duration,
    expired: bool,
}

impl Clock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            started_at: None,
            applied: 0,
            remaining: Duration::ZERO,
            elapsed: Duration::ZERO,
            expired: false,
        }
    }

    /// Start counting down `duration` from `now`. Elapsed time restarts at
    /// zero: it measures the current timed page only.
    pub fn start(&mut self, duration: Duration, now: Instant) {
        self.started_at = Some(now);
        self.applied = 0;
        self.remaining = duration;
        self.elapsed = Duration::ZERO;
        self.expired = false;
        debug!(remaining = ?duration, "clock started");
    }

    /// Stop ticking. The last reading stays available for display.
    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && !self.expired
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let Some(started_at) = self.started_at else {
            return TickOutcome::Idle;
        };
        if self.expired {
            return TickOutcome::Idle;
        }

        let since_start = now.saturating_duration_since(started_at);
        let due = u64::try_from(since_start.as_nanos() / self.interval.as_nanos()).unwrap_or(u64::MAX);
        let pending = due.saturating_sub(self.applied);
        if pending == 0 {
            return TickOutcome::Unchanged;
        }
        if pending > 1 {
            warn!(missed = pending - 1, "clock catching up on missed ticks");
        }
        self.applied = due;

        let step = u32::try_from(pending)
            .ok()
            .and_then(|n| self.interval.checked_mul(n))
            .unwrap_or(Duration::MAX);
        self.elapsed = self.elapsed.saturating_add(step);

        match self.remaining.checked_sub(step) {
            Some(left) if !left.is_zero() => {
                self.remaining = left;
                TickOutcome::Advanced { intervals: pending }
            }
            _ => {
                self.remaining = Duration::ZERO;
                self.expired = true;
                debug!(elapsed = ?self.elapsed, "clock expired");
                TickOutcome::Expired
            }
        }
    }

    /// Reset the countdown baseline. Elapsed time and tick phase are kept.
    /// Ignored once the clock has expired.
    pub fn set_time_left(&mut self, remaining: Duration) {
        if self.expired {
            debug!(?remaining, "ignoring time correction after expiry");
            return;
        }
        self.remaining = remaining;
    }

    /// Parse a server-reported remaining time and apply it. On a malformed
    /// value the previous remaining time is kept.
    pub fn set_time_left_str(&mut self, input: &str) -> Result<Duration, SessionError> {
        match parse_go_duration(input) {
            Ok(remaining) => {
                self.set_time_left(remaining);
                Ok(remaining)
            }
            Err(source) => {
                warn!(input = %input, error = %source, kept = ?self.remaining, "malformed time left from server");
                Err(SessionError::MalformedTimerInput {
                    input: input.to_string(),
                    source,
                })
            }
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn reading(&self) -> ClockReading {
        ClockReading {
            remaining: self.remaining,
            elapsed: self.elapsed,
        }
    }
}
