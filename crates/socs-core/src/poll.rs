//! Bounded polling against a wall-clock deadline.
//!
//! Every wait on the external scheduler goes through [`bounded_poll`]. The
//! caller supplies an attempt closure that returns `Ok(Some(value))` once
//! acceptable data has arrived; the primitive retries it until the
//! deadline, sleeping for the configured interval between attempts.
//!
//! What happens at the deadline depends on the [`Severity`]:
//!
//! - [`Severity::Hard`] returns [`PollError::DeadlineExceeded`]; the caller
//!   treats it as fatal.
//! - [`Severity::Soft`] logs a warning and returns `Ok(None)`; the caller
//!   proceeds without the data.
//!
//! Deadlines are measured in wall-clock time. The simulated clock does not
//! move while the driver waits.

use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::bus::BusError;

/// How a missed deadline is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Missing the deadline is an error.
    Hard,
    /// Missing the deadline means "no data".
    Soft,
}

/// Deadline and retry cadence for one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Name of the awaited data, for logs and errors.
    pub what: &'static str,
    /// Longest wall-clock time to keep trying.
    pub timeout: Duration,
    /// Sleep between attempts.
    pub interval: Duration,
    /// What a missed deadline means.
    pub severity: Severity,
}

impl PollPolicy {
    /// A policy whose breach is fatal.
    pub const fn hard(what: &'static str, timeout: Duration, interval: Duration) -> Self {
        Self {
            what,
            timeout,
            interval,
            severity: Severity::Hard,
        }
    }

    /// A policy whose breach yields no data.
    pub const fn soft(what: &'static str, timeout: Duration, interval: Duration) -> Self {
        Self {
            what,
            timeout,
            interval,
            severity: Severity::Soft,
        }
    }
}

/// Errors from a bounded poll.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// A hard deadline passed without acceptable data.
    #[error("no {what} received within {timeout:?}")]
    DeadlineExceeded {
        /// Name of the awaited data.
        what: &'static str,
        /// The deadline that passed.
        timeout: Duration,
        /// Number of attempts made.
        attempts: u64,
    },

    /// An attempt failed outright.
    #[error("bus error while waiting for data: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: BusError,
    },
}

/// Retry `attempt` until it yields a value or the policy's deadline passes.
///
/// The closure is always tried at least once, even with a zero timeout.
///
/// # Errors
///
/// Returns [`PollError::Bus`] as soon as an attempt fails, and
/// [`PollError::DeadlineExceeded`] when a hard deadline passes.
pub fn bounded_poll<T, F>(policy: &PollPolicy, mut attempt: F) -> Result<Option<T>, PollError>
where
    F: FnMut() -> Result<Option<T>, BusError>,
{
    let started = Instant::now();
    let mut attempts: u64 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        if let Some(value) = attempt()? {
            trace!(what = policy.what, attempts, "Poll satisfied");
            return Ok(Some(value));
        }

        if started.elapsed() >= policy.timeout {
            return match policy.severity {
                Severity::Hard => Err(PollError::DeadlineExceeded {
                    what: policy.what,
                    timeout: policy.timeout,
                    attempts,
                }),
                Severity::Soft => {
                    warn!(
                        what = policy.what,
                        timeout_ms = policy.timeout.as_millis(),
                        attempts,
                        "Soft timeout, continuing without data"
                    );
                    Ok(None)
                }
            };
        }

        if !policy.interval.is_zero() {
            std::thread::sleep(policy.interval);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(1);

    #[test]
    fn returns_first_value_without_waiting() {
        let policy = PollPolicy::hard("target", Duration::from_secs(60), INTERVAL);
        let started = Instant::now();
        let value = bounded_poll(&policy, || Ok(Some(7))).unwrap();
        assert_eq!(value, Some(7));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn retries_until_value_arrives() {
        let policy = PollPolicy::hard("target", Duration::from_secs(5), Duration::ZERO);
        let mut calls = 0_u32;
        let value = bounded_poll(&policy, || {
            calls = calls.saturating_add(1);
            Ok((calls == 3).then_some("ready"))
        })
        .unwrap();
        assert_eq!(value, Some("ready"));
        assert_eq!(calls, 3);
    }

    #[test]
    fn hard_deadline_fires_after_not_before() {
        let timeout = Duration::from_millis(50);
        let policy = PollPolicy::hard("target", timeout, INTERVAL);
        let started = Instant::now();
        let result: Result<Option<()>, _> = bounded_poll(&policy, || Ok(None));
        assert!(started.elapsed() >= timeout);
        assert!(matches!(
            result,
            Err(PollError::DeadlineExceeded { what: "target", .. })
        ));
    }

    #[test]
    fn soft_deadline_yields_none() {
        let timeout = Duration::from_millis(20);
        let policy = PollPolicy::soft("interest", timeout, INTERVAL);
        let started = Instant::now();
        let result: Option<u8> = bounded_poll(&policy, || Ok(None)).unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= timeout);
    }

    #[test]
    fn zero_timeout_still_tries_once() {
        let policy = PollPolicy::soft("swap", Duration::ZERO, INTERVAL);
        let mut calls = 0_u32;
        let result: Option<()> = bounded_poll(&policy, || {
            calls = calls.saturating_add(1);
            Ok(None)
        })
        .unwrap();
        assert!(result.is_none());
        assert_eq!(calls, 1);
    }

    #[test]
    fn bus_error_aborts_immediately() {
        let policy = PollPolicy::hard("target", Duration::from_secs(60), INTERVAL);
        let result: Result<Option<()>, _> = bounded_poll(&policy, || {
            Err(BusError::Transport {
                message: "connection reset".to_owned(),
            })
        });
        assert!(matches!(result, Err(PollError::Bus { .. })));
    }
}
