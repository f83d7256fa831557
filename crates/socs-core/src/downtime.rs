//! Downtime calendar: which nights the observatory is closed.
//!
//! The calendar is computed once before the run from the configured
//! scheduled outages plus an optional set of seeded random (unscheduled)
//! outages. After construction it is immutable and every lookup is pure.
//!
//! An outage starting on night `s` lasting `d` nights marks nights
//! `s..s+d`; night `n` in that range reports the *remaining* length
//! `d - (n - s)`. When outages overlap the larger remaining length wins.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use socs_types::DowntimeEntry;
use tracing::{debug, info};

use crate::config::{DowntimeConfig, OutageRange, UnscheduledDowntimeConfig};

/// Nights in one survey year.
const NIGHTS_PER_YEAR: u32 = 365;

/// Errors that can occur while building the calendar.
#[derive(Debug, thiserror::Error)]
pub enum DowntimeError {
    /// An outage range is malformed.
    #[error("invalid outage starting at night {start_night} lasting {duration} nights: {reason}")]
    InvalidRange {
        /// First night of the rejected range.
        start_night: u32,
        /// Length of the rejected range.
        duration: u32,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Precomputed night-to-outage mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DowntimeCalendar {
    /// Remaining outage length per affected night.
    nights: BTreeMap<u32, u32>,
    /// The outage ranges the calendar was built from, in start order.
    entries: Vec<DowntimeEntry>,
}

impl DowntimeCalendar {
    /// A calendar with no outages.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the calendar for a run of `total_nights` nights.
    ///
    /// Scheduled ranges are taken as given. Unscheduled ranges are drawn
    /// from a [`StdRng`] seeded with the configured seed, so the same
    /// configuration always produces the same calendar.
    ///
    /// # Errors
    ///
    /// Returns [`DowntimeError::InvalidRange`] if a scheduled range starts
    /// at night 0 or has zero length.
    pub fn build(config: &DowntimeConfig, total_nights: u32) -> Result<Self, DowntimeError> {
        let mut calendar = Self::empty();

        for range in &config.scheduled {
            validate_range(*range)?;
            calendar.insert(*range, true);
        }

        for range in unscheduled_ranges(&config.unscheduled, total_nights) {
            calendar.insert(range, false);
        }

        calendar.entries.sort_by_key(|e| (e.night, !e.scheduled));

        info!(
            scheduled = config.scheduled.len(),
            unscheduled = calendar.entries.iter().filter(|e| !e.scheduled).count(),
            down_nights = calendar.nights.len(),
            "Downtime calendar built"
        );
        Ok(calendar)
    }

    /// Build a calendar directly from scheduled ranges.
    ///
    /// # Errors
    ///
    /// Returns [`DowntimeError::InvalidRange`] for a malformed range.
    pub fn from_ranges(ranges: &[OutageRange]) -> Result<Self, DowntimeError> {
        let mut calendar = Self::empty();
        for range in ranges {
            validate_range(*range)?;
            calendar.insert(*range, true);
        }
        Ok(calendar)
    }

    /// Remaining outage length for `night`; 0 when the observatory is up.
    pub fn get_downtime(&self, night: u32) -> u32 {
        self.nights.get(&night).copied().unwrap_or(0)
    }

    /// Whether the observatory is closed on `night`.
    pub fn is_down(&self, night: u32) -> bool {
        self.get_downtime(night) > 0
    }

    /// The outage ranges the calendar was built from.
    pub fn entries(&self) -> &[DowntimeEntry] {
        &self.entries
    }

    /// Number of nights affected by any outage.
    pub fn down_night_count(&self) -> usize {
        self.nights.len()
    }

    fn insert(&mut self, range: OutageRange, scheduled: bool) {
        for offset in 0..range.duration {
            let Some(night) = range.start_night.checked_add(offset) else {
                break;
            };
            let remaining = range.duration.saturating_sub(offset);
            let slot = self.nights.entry(night).or_insert(0);
            *slot = (*slot).max(remaining);
        }
        debug!(
            start_night = range.start_night,
            duration = range.duration,
            scheduled,
            "Outage added"
        );
        self.entries.push(DowntimeEntry {
            night: range.start_night,
            duration_days: range.duration,
            scheduled,
        });
    }
}

const fn validate_range(range: OutageRange) -> Result<(), DowntimeError> {
    if range.start_night == 0 {
        return Err(DowntimeError::InvalidRange {
            start_night: range.start_night,
            duration: range.duration,
            reason: "nights are numbered from 1",
        });
    }
    if range.duration == 0 {
        return Err(DowntimeError::InvalidRange {
            start_night: range.start_night,
            duration: range.duration,
            reason: "an outage lasts at least one night",
        });
    }
    Ok(())
}

/// Draw `events_per_year` outages per started survey year.
fn unscheduled_ranges(config: &UnscheduledDowntimeConfig, total_nights: u32) -> Vec<OutageRange> {
    if config.events_per_year == 0 || total_nights == 0 {
        return Vec::new();
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let max_length = config.max_length.max(1);
    let years = total_nights.div_ceil(NIGHTS_PER_YEAR);
    let mut ranges = Vec::new();

    for _ in 0..years {
        for _ in 0..config.events_per_year {
            ranges.push(OutageRange {
                start_night: rng.random_range(1..=total_nights),
                duration: rng.random_range(1..=max_length),
            });
        }
    }
    ranges
}
