//! Simulated clock for the survey simulation.
//!
//! The clock is the single source of truth for simulated time. It holds the
//! current instant and the instant the run started, and it only ever moves
//! forward through explicit advances.
//!
//! # Design Principles
//!
//! - Time never moves backward. Negative advances and repositioning to an
//!   earlier instant are rejected as errors and leave the clock untouched.
//! - All arithmetic is checked (no silent overflow of the timestamp).
//! - Durations are [`TimeDelta`] at microsecond resolution, so a sum of
//!   advances is exact.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

/// Microseconds per second, for float conversions.
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Errors that can occur during clock operations.
///
/// Every variant is a precondition violation by the caller; none of them
/// is retried.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// A negative duration was passed to [`SimClock::advance`].
    #[error("refusing to advance the clock by a negative duration ({duration})")]
    NegativeAdvance {
        /// The rejected duration.
        duration: TimeDelta,
    },

    /// [`SimClock::advance_to`] was asked to move to an earlier instant.
    #[error("refusing to move the clock backwards from {current} to {requested}")]
    Backwards {
        /// The clock's current instant.
        current: DateTime<Utc>,
        /// The rejected target instant.
        requested: DateTime<Utc>,
    },

    /// [`SimClock::elapsed_since`] was given an instant in the future.
    #[error("reference instant {reference} is after the current time {current}")]
    FutureReference {
        /// The clock's current instant.
        current: DateTime<Utc>,
        /// The rejected reference instant.
        reference: DateTime<Utc>,
    },

    /// The timestamp would leave chrono's representable range.
    #[error("simulated time overflow")]
    Overflow,
}

/// Monotonic simulated clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimClock {
    /// Current simulated instant.
    current: DateTime<Utc>,

    /// Instant the run started; environment models are driven by the time
    /// elapsed since this point.
    origin: DateTime<Utc>,
}

impl SimClock {
    /// Create a clock positioned at `start`.
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: start,
            origin: start,
        }
    }

    /// Create a clock positioned at midnight UTC of `date`.
    pub const fn starting_on(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Advance the clock by `duration`. Returns the new instant.
    ///
    /// A zero duration is accepted and leaves the clock where it is.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeAdvance`] for a negative duration and
    /// [`ClockError::Overflow`] if the result is not representable.
    pub fn advance(&mut self, duration: TimeDelta) -> Result<DateTime<Utc>, ClockError> {
        if duration < TimeDelta::zero() {
            return Err(ClockError::NegativeAdvance { duration });
        }
        self.current = self
            .current
            .checked_add_signed(duration)
            .ok_or(ClockError::Overflow)?;
        Ok(self.current)
    }

    /// Reposition the clock at the absolute instant `target`. Returns the
    /// distance moved.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::Backwards`] if `target` is earlier than the
    /// current instant.
    pub fn advance_to(&mut self, target: DateTime<Utc>) -> Result<TimeDelta, ClockError> {
        if target < self.current {
            return Err(ClockError::Backwards {
                current: self.current,
                requested: target,
            });
        }
        let delta = target.signed_duration_since(self.current);
        self.current = target;
        Ok(delta)
    }

    /// Return the current simulated instant.
    pub const fn current(&self) -> DateTime<Utc> {
        self.current
    }

    /// Return the instant the run started.
    pub const fn origin(&self) -> DateTime<Utc> {
        self.origin
    }

    /// Return `current - reference`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::FutureReference`] if `reference` is later than
    /// the current instant.
    pub fn elapsed_since(&self, reference: DateTime<Utc>) -> Result<TimeDelta, ClockError> {
        if reference > self.current {
            return Err(ClockError::FutureReference {
                current: self.current,
                reference,
            });
        }
        Ok(self.current.signed_duration_since(reference))
    }

    /// Return the time elapsed since the run started.
    pub fn elapsed(&self) -> TimeDelta {
        self.current.signed_duration_since(self.origin)
    }

    /// Render the current instant for logs.
    pub fn timestring(&self) -> String {
        self.current.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
    }
}

impl core::fmt::Display for SimClock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.timestring())
    }
}

/// Convert floating-point seconds into a [`TimeDelta`] at microsecond
/// resolution. Non-finite input maps to zero.
#[allow(clippy::cast_possible_truncation)]
pub fn seconds_to_delta(seconds: f64) -> TimeDelta {
    if !seconds.is_finite() {
        return TimeDelta::zero();
    }
    TimeDelta::microseconds((seconds * MICROS_PER_SECOND).round() as i64)
}

/// Convert a [`TimeDelta`] into floating-point seconds.
#[allow(clippy::cast_precision_loss)]
pub fn delta_to_seconds(delta: TimeDelta) -> f64 {
    delta.num_microseconds().map_or_else(
        || delta.num_milliseconds() as f64 / 1_000.0,
        |micros| micros as f64 / MICROS_PER_SECOND,
    )
}
