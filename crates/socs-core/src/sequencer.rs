//! Observation sequencer: turns a target into a completed observation.
//!
//! The sequencer owns the observatory model and the run-wide counters but
//! never the clock. [`ObservationSequencer::observe_target`] borrows the
//! driver's clock and advances it exactly twice: once by the slew duration,
//! once by the visit duration.

use chrono::{DateTime, Utc};
use socs_types::{
    ExposureRecord, Filter, FilterSwap, HistoryKind, Observation, ObservationId,
    ObservatoryState, SlewActivity, SlewEndpoint, SlewRecord, SlewState, Target, TargetId,
};
use tracing::{Span, debug, info, warn};

use crate::clock::{ClockError, SimClock, delta_to_seconds};
use crate::observatory::{ObservatoryModel, SlewOutcome, VisitPlan};

/// Errors that can occur while sequencing an observation.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    /// The target cannot be observed.
    #[error("target {target_id} cannot be observed: {reason}")]
    InvalidTarget {
        /// The rejected target.
        target_id: TargetId,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A clock advance failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// Everything one call to [`ObservationSequencer::observe_target`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationOutcome {
    /// The completed observation; environment fields are left at zero for
    /// the driver to fill in.
    pub observation: Observation,
    /// The slew that preceded it.
    pub slew: SlewRecord,
    /// Activities that made up the slew.
    pub slew_activities: Vec<SlewActivity>,
    /// Pose before and after the slew.
    pub slew_states: Vec<SlewState>,
    /// Planned exposures tagged with the target id.
    pub target_exposures: Vec<ExposureRecord>,
    /// Executed exposures tagged with the observation id.
    pub observation_exposures: Vec<ExposureRecord>,
}

/// Drives the observatory model through slews and visits.
pub struct ObservationSequencer {
    model: Box<dyn ObservatoryModel + Send>,
    span: Span,
    night: u32,
    total_nights: u32,
    targets_received: u64,
    observations_made: u64,
    slews: u64,
    night_targets: u64,
    night_observations: u64,
}

impl ObservationSequencer {
    /// Create a sequencer around `model`, logging under `span`.
    pub fn new(model: Box<dyn ObservatoryModel + Send>, span: Span) -> Self {
        Self {
            model,
            span,
            night: 0,
            total_nights: 0,
            targets_received: 0,
            observations_made: 0,
            slews: 0,
            night_targets: 0,
            night_observations: 0,
        }
    }

    /// Begin night `night` of `total_nights`. Resets per-night counters.
    pub fn start_night(&mut self, night: u32, total_nights: u32) {
        let _entered = self.span.enter();
        self.night = night;
        self.total_nights = total_nights;
        self.night_targets = 0;
        self.night_observations = 0;
        debug!(night, total_nights, "Sequencer night started");
    }

    /// Observatory pose at `at`. Pure.
    pub fn get_state(&self, at: DateTime<Utc>) -> ObservatoryState {
        self.model.state(at)
    }

    /// Airmass of a sky position at `at`. Pure.
    pub fn airmass(&self, ra: f64, dec: f64, at: DateTime<Utc>) -> f64 {
        self.model.airmass(ra, dec, at)
    }

    /// Filter currently in the beam.
    pub fn current_filter(&self, at: DateTime<Utc>) -> Filter {
        self.model.state(at).filter
    }

    /// Slew to `target`, take the visit, and return the records.
    ///
    /// The clock is advanced by the slew duration, the observation is
    /// stamped with the post-slew time, and the clock is advanced again by
    /// the visit duration.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::InvalidTarget`] for a target with zero
    /// exposures, before any clock advance, and
    /// [`SequencerError::Clock`] if an advance fails.
    pub fn observe_target(
        &mut self,
        target: &Target,
        clock: &mut SimClock,
    ) -> Result<ObservationOutcome, SequencerError> {
        let _entered = self.span.enter();
        if target.num_exposures == 0 {
            return Err(SequencerError::InvalidTarget {
                target_id: target.target_id,
                reason: "a visit needs at least one exposure",
            });
        }

        self.targets_received = self.targets_received.saturating_add(1);
        self.night_targets = self.night_targets.saturating_add(1);
        let observation_id = ObservationId::new(
            i64::try_from(self.observations_made.saturating_add(1)).unwrap_or(i64::MAX),
        );

        // Slew
        let slew_start = clock.current();
        let slew = self.model.slew(target, slew_start);
        let slew_end = clock.advance(slew.duration)?;
        self.slews = self.slews.saturating_add(1);
        let slew_count = self.slews;

        // Visit
        let visit = self.model.plan_visit(target);
        let observation_start_time = slew_end;
        let airmass = self
            .model
            .airmass(target.ra, target.dec, observation_start_time);
        clock.advance(visit.duration)?;

        self.observations_made = self.observations_made.saturating_add(1);
        self.night_observations = self.night_observations.saturating_add(1);

        let observation = Observation {
            observation_id,
            night: self.night,
            target_id: target.target_id,
            field_id: target.field_id,
            filter: target.filter,
            ra: target.ra,
            dec: target.dec,
            angle: target.angle,
            num_exposures: target.num_exposures,
            observation_start_time,
            visit_time: delta_to_seconds(visit.duration),
            airmass,
            cloud: 0.0,
            seeing_fwhm_500: 0.0,
            seeing_fwhm_geometric: 0.0,
            seeing_fwhm_effective: 0.0,
        };
        let (target_exposures, observation_exposures) =
            visit_exposures(target, observation_id, &visit, observation_start_time);
        let (slew_record, slew_activities, slew_states) =
            slew_records(slew, slew_count, observation_id, slew_start, slew_end);

        debug!(
            observation_id = %observation_id,
            target_id = %target.target_id,
            filter = %target.filter,
            slew_secs = slew_record.slew_time,
            visit_secs = observation.visit_time,
            "Observation complete"
        );

        Ok(ObservationOutcome {
            observation,
            slew: slew_record,
            slew_activities,
            slew_states,
            target_exposures,
            observation_exposures,
        })
    }

    /// Day-time carousel maintenance. Swaps a filter when the request asks
    /// for it; an absent request or `need_swap == false` is a no-op.
    /// Returns whether a swap happened.
    pub fn start_day(&mut self, request: Option<FilterSwap>) -> bool {
        let _entered = self.span.enter();
        match request {
            Some(FilterSwap {
                need_swap: true,
                filter_to_unmount,
            }) => {
                let swapped = self.model.swap_filter(filter_to_unmount);
                if swapped {
                    info!(night = self.night, filter = %filter_to_unmount, "Filter swapped out");
                } else {
                    warn!(night = self.night, filter = %filter_to_unmount, "Filter swap refused");
                }
                swapped
            }
            _ => false,
        }
    }

    /// End the current night: park the telescope, log and reset the
    /// per-night counters.
    pub fn end_night(&mut self) {
        let _entered = self.span.enter();
        self.model.park();
        info!(
            night = self.night,
            total_nights = self.total_nights,
            targets = self.night_targets,
            observations = self.night_observations,
            "Night complete"
        );
        self.night_targets = 0;
        self.night_observations = 0;
    }

    /// Targets accepted over the whole run.
    pub const fn targets_received(&self) -> u64 {
        self.targets_received
    }

    /// Observations completed over the whole run.
    pub const fn observations_made(&self) -> u64 {
        self.observations_made
    }

    /// Log run totals.
    pub fn finalize(&self) {
        let _entered = self.span.enter();
        info!(
            targets_received = self.targets_received,
            observations_made = self.observations_made,
            slews = self.slews,
            "Sequencer finalized"
        );
    }
}

impl std::fmt::Debug for ObservationSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationSequencer")
            .field("night", &self.night)
            .field("targets_received", &self.targets_received)
            .field("observations_made", &self.observations_made)
            .finish_non_exhaustive()
    }
}

/// Slew row, its activities, and the poses either side of it.
fn slew_records(
    slew: SlewOutcome,
    slew_count: u64,
    observation_id: ObservationId,
    slew_start: DateTime<Utc>,
    slew_end: DateTime<Utc>,
) -> (SlewRecord, Vec<SlewActivity>, Vec<SlewState>) {
    let record = SlewRecord {
        slew_count,
        observation_id,
        slew_start,
        slew_end,
        slew_time: delta_to_seconds(slew.duration),
        slew_distance: slew.distance,
    };
    let activities = slew
        .activities
        .iter()
        .map(|a| SlewActivity {
            slew_count,
            activity: a.name.to_owned(),
            delay: a.delay,
            in_critical_path: a.in_critical_path,
        })
        .collect();
    let states = vec![
        SlewState {
            slew_count,
            endpoint: SlewEndpoint::Initial,
            state: slew.initial,
        },
        SlewState {
            slew_count,
            endpoint: SlewEndpoint::Final,
            state: slew.final_state,
        },
    ];
    (record, activities, states)
}

/// Planned exposures keyed by target and executed ones keyed by
/// observation. Planned exposures all carry the visit start.
fn visit_exposures(
    target: &Target,
    observation_id: ObservationId,
    visit: &VisitPlan,
    start: DateTime<Utc>,
) -> (Vec<ExposureRecord>, Vec<ExposureRecord>) {
    let planned = exposure_records(
        HistoryKind::Target,
        target.target_id.into_inner(),
        &visit.exposure_times,
        |_| start,
    );
    let executed = exposure_records(
        HistoryKind::Observation,
        observation_id.into_inner(),
        &visit.exposure_times,
        |i| {
            visit
                .exposure_offsets
                .get(i)
                .and_then(|offset| start.checked_add_signed(*offset))
                .unwrap_or(start)
        },
    );
    (planned, executed)
}

fn exposure_records(
    kind: HistoryKind,
    owner_id: i64,
    times: &[f64],
    start_of: impl Fn(usize) -> DateTime<Utc>,
) -> Vec<ExposureRecord> {
    (0_u32..)
        .zip(times)
        .enumerate()
        .map(|(i, (num, exposure_time))| ExposureRecord {
            exposure_num: num.saturating_add(1),
            kind,
            owner_id,
            exposure_start: start_of(i),
            exposure_time: *exposure_time,
        })
        .collect()
}
