//! Survey driver: the night/day state machine.
//!
//! [`Simulator::run`] walks the survey one night at a time:
//!
//! 1. **Night start** -- compute sunset/sunrise, move the clock to sunset,
//!    clear the night buffer, consult the downtime calendar once.
//! 2. **Downtime** (down nights only) -- announce the outage and jump to
//!    one minute past sunrise without observing.
//! 3. **Exposure cycles** (until sunrise) -- publish time, pose, cloud and
//!    seeing; wait for a target (hard deadline); observe it; publish the
//!    observation; wait for proposal interest (soft deadline); buffer the
//!    cycle's records.
//! 4. **Night end** -- flush the buffer to storage in one batch.
//! 5. **Day** -- publish time, wait for a filter swap request (soft
//!    deadline), hand it to the sequencer.
//!
//! The simulator is the only writer of accepted observations. A missed
//! hard deadline aborts the run; cycles already accepted that night are
//! flushed and `finalize` still runs before the error is returned.

use std::time::Duration;

use chrono::{DateTime, Days, TimeDelta, Utc};
use socs_types::{
    CloudMessage, Delivery, Field, HistoryKind, InterestedProposal, ObservationId,
    Publication, SeeingMessage, SessionId, SurveyConfigMessage, Target, TimeMessage, Topic,
};
use tracing::{Span, debug, error, info, info_span, trace, warn};

use crate::bus::{BusError, MessageBus};
use crate::clock::{ClockError, SimClock};
use crate::config::{ConfigError, SimulationConfig};
use crate::downtime::{DowntimeCalendar, DowntimeError};
use crate::environment::{
    CloudModel, FixedNightSkyModel, NightBoundaries, SeeingModel, SkyModel, TabulatedCloudModel,
    TabulatedSeeingModel,
};
use crate::history::HistoryAggregator;
use crate::observatory::{KinematicObservatory, ObservatoryModel};
use crate::poll::{PollError, PollPolicy, bounded_poll};
use crate::sequencer::{ObservationSequencer, SequencerError};
use crate::storage::{CycleRecords, NightBatch, StorageError, StorageSink};

/// How far past sunrise a down night moves the clock, in seconds.
const DOWNTIME_SUNRISE_MARGIN_SECS: i64 = 60;

/// Consecutive sentinel fields that terminate the field catalog.
const FIELD_CATALOG_TERMINATORS: u32 = 2;

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    /// The scheduler did not supply a target within the hard deadline.
    #[error("no target received within {timeout:?}; the scheduler is not responding")]
    TargetTimeout {
        /// The hard deadline that passed.
        timeout: Duration,
    },

    /// The field catalog did not finish arriving within the deadline.
    #[error("field catalog incomplete after {timeout:?} ({received} fields received)")]
    FieldCatalogTimeout {
        /// The deadline that passed.
        timeout: Duration,
        /// Fields received before the deadline.
        received: usize,
    },

    /// A night's calendar date is not representable.
    #[error("night {night} falls outside the representable calendar")]
    DateOutOfRange {
        /// The offending night.
        night: u32,
    },

    /// `run` was called on a simulator that has already finished.
    #[error("the simulation has already finished")]
    AlreadyFinished,

    /// The configuration is invalid.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A clock operation was rejected.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The downtime calendar could not be built.
    #[error("downtime error: {source}")]
    Downtime {
        /// The underlying downtime error.
        #[from]
        source: DowntimeError,
    },

    /// The sequencer rejected a target.
    #[error("sequencer error: {source}")]
    Sequencer {
        /// The underlying sequencer error.
        #[from]
        source: SequencerError,
    },

    /// The message bus failed.
    #[error("bus error: {source}")]
    Bus {
        /// The underlying bus error.
        #[from]
        source: BusError,
    },

    /// A bounded wait failed.
    #[error("poll error: {source}")]
    Poll {
        /// The underlying poll error.
        #[from]
        source: PollError,
    },

    /// The storage sink failed.
    #[error("storage error: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: StorageError,
    },
}

/// The pluggable models a run is built from.
pub struct Models {
    /// Observatory pose and timing.
    pub observatory: Box<dyn ObservatoryModel + Send>,
    /// Night boundaries.
    pub sky: Box<dyn SkyModel + Send>,
    /// Cloud opacity.
    pub cloud: Box<dyn CloudModel + Send>,
    /// Seeing.
    pub seeing: Box<dyn SeeingModel + Send>,
}

impl Models {
    /// The shipped models, parameterized by `config`.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            observatory: Box::new(KinematicObservatory::from_config(&config.observatory)),
            sky: Box::new(FixedNightSkyModel::from_config(&config.environment.night)),
            cloud: Box::new(TabulatedCloudModel::from_config(&config.environment.cloud)),
            seeing: Box::new(TabulatedSeeingModel::from_config(&config.environment.seeing)),
        }
    }
}

impl std::fmt::Debug for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Models").finish_non_exhaustive()
    }
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Storage session the run wrote to.
    pub session_id: Option<SessionId>,
    /// Nights completed (up or down).
    pub nights: u32,
    /// Nights skipped for downtime.
    pub down_nights: u32,
    /// Cycles persisted.
    pub observations: u64,
    /// Targets the sequencer accepted.
    pub targets_received: u64,
    /// Observations the sequencer completed.
    pub observations_made: u64,
    /// Cycles observed but not persisted because the target id was the
    /// sentinel.
    pub sentinel_targets: u64,
    /// Interest waits that hit their soft deadline.
    pub missed_interest: u64,
    /// Filter swap waits that hit their soft deadline.
    pub missed_filter_swaps: u64,
    /// Filter swaps performed.
    pub filter_swaps: u64,
    /// Night batches flushed to storage.
    pub batches_written: u64,
    /// Downtime calendar lookups, one per started night.
    pub downtime_lookups: u64,
    /// Simulated time when the run ended.
    pub end_time: DateTime<Utc>,
}

impl RunSummary {
    const fn new(start: DateTime<Utc>) -> Self {
        Self {
            session_id: None,
            nights: 0,
            down_nights: 0,
            observations: 0,
            targets_received: 0,
            observations_made: 0,
            sentinel_targets: 0,
            missed_interest: 0,
            missed_filter_swaps: 0,
            filter_swaps: 0,
            batches_written: 0,
            downtime_lookups: 0,
            end_time: start,
        }
    }
}

/// The survey driver.
pub struct Simulator<'a> {
    config: SimulationConfig,
    total_nights: u32,
    clock: SimClock,
    calendar: DowntimeCalendar,
    sequencer: ObservationSequencer,
    history: HistoryAggregator,
    sky: Box<dyn SkyModel + Send>,
    cloud: Box<dyn CloudModel + Send>,
    seeing: Box<dyn SeeingModel + Send>,
    bus: &'a mut dyn MessageBus,
    sink: &'a mut dyn StorageSink,
    batch: NightBatch,
    open_night: Option<u32>,
    fields: Vec<Field>,
    summary: RunSummary,
    span: Span,
    finished: bool,
}

impl<'a> Simulator<'a> {
    /// Create a driver for the configured survey duration.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Config`] if the configuration is invalid
    /// and [`SimulatorError::Downtime`] if the calendar cannot be built.
    pub fn new(
        config: &SimulationConfig,
        models: Models,
        bus: &'a mut dyn MessageBus,
        sink: &'a mut dyn StorageSink,
    ) -> Result<Self, SimulatorError> {
        Self::with_duration(config, config.survey.duration, models, bus, sink)
    }

    /// Create a driver for `fractional_duration` years of survey. A
    /// non-positive value falls back to the configured duration.
    ///
    /// # Errors
    ///
    /// Same as [`Simulator::new`].
    pub fn with_duration(
        config: &SimulationConfig,
        fractional_duration: f64,
        models: Models,
        bus: &'a mut dyn MessageBus,
        sink: &'a mut dyn StorageSink,
    ) -> Result<Self, SimulatorError> {
        config.validate()?;
        let total_nights = config.survey.nights_with_override(fractional_duration);
        let clock = SimClock::starting_on(config.survey.start_date);

        let span = info_span!(
            "run",
            session_id = tracing::field::Empty,
            nights = total_nights
        );
        let calendar = span.in_scope(|| DowntimeCalendar::build(&config.downtime, total_nights))?;
        let sequencer =
            ObservationSequencer::new(models.observatory, info_span!(parent: &span, "sequencer"));
        let history = HistoryAggregator::new(info_span!(parent: &span, "history"));

        Ok(Self {
            config: config.clone(),
            total_nights,
            summary: RunSummary::new(clock.current()),
            clock,
            calendar,
            sequencer,
            history,
            sky: models.sky,
            cloud: models.cloud,
            seeing: models.seeing,
            bus,
            sink,
            batch: NightBatch::new(),
            open_night: None,
            fields: Vec::new(),
            span,
            finished: false,
        })
    }

    /// Run the whole survey and finalize.
    ///
    /// On a fatal error, finalization is still attempted and the original
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::TargetTimeout`] when the scheduler stops
    /// supplying targets, or any bus, storage, or clock error.
    pub fn run(&mut self) -> Result<RunSummary, SimulatorError> {
        if self.finished {
            return Err(SimulatorError::AlreadyFinished);
        }
        let span = self.span.clone();
        let _entered = span.enter();

        let outcome = self.initialize().and_then(|()| self.run_nights());
        match outcome {
            Ok(()) => {
                self.finalize()?;
                Ok(self.summary.clone())
            }
            Err(err) => {
                error!(error = %err, clock = %self.clock, "Simulation aborted");
                self.flush_open_night();
                if let Err(finalize_err) = self.finalize() {
                    warn!(error = %finalize_err, "Finalize after failure also failed");
                }
                Err(err)
            }
        }
    }

    /// Open the storage session, announce the survey, ingest the field
    /// catalog, and persist the catalog and the downtime calendar.
    ///
    /// # Errors
    ///
    /// Returns any bus or storage error, or
    /// [`SimulatorError::FieldCatalogTimeout`].
    pub fn initialize(&mut self) -> Result<(), SimulatorError> {
        let session = self.sink.begin_session(
            self.clock.origin(),
            self.total_nights,
            &self.config.survey.comment,
        )?;
        self.span
            .record("session_id", session.session_id.into_inner());
        self.summary.session_id = Some(session.session_id);

        let pose = self.sequencer.get_state(self.clock.origin());
        self.bus
            .publish(&Publication::SurveyConfig(SurveyConfigMessage {
                start_time: self.clock.origin(),
                total_nights: self.total_nights,
                site_latitude: self.config.observatory.site.latitude,
                site_longitude: self.config.observatory.site.longitude,
                mounted_filters: pose.mounted_filters,
                unmounted_filters: pose.unmounted_filters,
            }))?;

        self.ingest_fields()?;
        self.sink.write_fields(&self.fields)?;
        self.sink.write_downtime(self.calendar.entries())?;

        info!(
            session_id = %session.session_id,
            start = %self.clock,
            nights = self.total_nights,
            fields = self.fields.len(),
            down_nights = self.calendar.down_night_count(),
            "Simulation initialized"
        );
        Ok(())
    }

    /// Log totals, close the storage session, and release the bus. Runs
    /// once; later calls are no-ops.
    ///
    /// Both the sink and the bus are closed even if one of them fails; the
    /// first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the storage or bus error raised while closing.
    pub fn finalize(&mut self) -> Result<(), SimulatorError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.sequencer.finalize();
        self.summary.targets_received = self.sequencer.targets_received();
        self.summary.observations_made = self.sequencer.observations_made();
        self.summary.end_time = self.clock.current();

        let storage = if self.summary.session_id.is_some() {
            self.sink.end_session()
        } else {
            Ok(())
        };
        let bus = self.bus.finalize();

        info!(
            nights = self.summary.nights,
            down_nights = self.summary.down_nights,
            observations = self.summary.observations,
            missed_interest = self.summary.missed_interest,
            missed_filter_swaps = self.summary.missed_filter_swaps,
            end = %self.clock,
            "Simulation finished"
        );

        storage?;
        bus?;
        Ok(())
    }

    /// Number of nights the run covers.
    pub const fn total_nights(&self) -> u32 {
        self.total_nights
    }

    /// The simulated clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// The downtime calendar.
    pub const fn calendar(&self) -> &DowntimeCalendar {
        &self.calendar
    }

    /// Progress so far.
    pub const fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Fields ingested at start-up.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    // -----------------------------------------------------------------------
    // Start-up
    // -----------------------------------------------------------------------

    fn ingest_fields(&mut self) -> Result<(), SimulatorError> {
        let timeout = self.config.timeouts.target_timeout();
        let policy = PollPolicy::hard("field", timeout, self.config.timeouts.poll_interval());
        let mut terminators = 0;

        while terminators < FIELD_CATALOG_TERMINATORS {
            let bus = &mut *self.bus;
            let field = match bounded_poll(&policy, || {
                receive(bus, Topic::Field, |d| match d {
                    Delivery::Field(field) => Some(field),
                    _ => None,
                })
            }) {
                Ok(Some(field)) => field,
                Ok(None) | Err(PollError::DeadlineExceeded { .. }) => {
                    return Err(SimulatorError::FieldCatalogTimeout {
                        timeout,
                        received: self.fields.len(),
                    });
                }
                Err(err) => return Err(err.into()),
            };

            if field.field_id.is_sentinel() {
                terminators = terminators.saturating_add(1);
            } else {
                terminators = 0;
                self.fields.push(field);
            }
        }
        debug!(fields = self.fields.len(), "Field catalog received");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Night loop
    // -----------------------------------------------------------------------

    fn run_nights(&mut self) -> Result<(), SimulatorError> {
        for night in 1..=self.total_nights {
            self.run_night(night)?;
        }
        Ok(())
    }

    fn run_night(&mut self, night: u32) -> Result<(), SimulatorError> {
        let date = self
            .config
            .survey
            .start_date
            .checked_add_days(Days::new(u64::from(night.saturating_sub(1))))
            .ok_or(SimulatorError::DateOutOfRange { night })?;
        let bounds = self.sky.night_boundaries(date);

        self.sequencer.start_night(night, self.total_nights);
        self.batch.clear();
        self.open_night = Some(night);
        self.move_clock_to(bounds.sunset)?;

        let down_days = self.calendar.get_downtime(night);
        self.summary.downtime_lookups = self.summary.downtime_lookups.saturating_add(1);
        info!(
            night,
            sunset = %bounds.sunset,
            sunrise = %bounds.sunrise,
            down_days,
            "Night started"
        );

        if down_days > 0 {
            self.downtime(night, down_days, bounds)?;
        } else {
            while self.clock.current() < bounds.sunrise {
                self.exposure_cycle(night)?;
            }
        }

        self.end_night(night)?;
        self.day_phase(night, down_days)?;
        self.summary.nights = self.summary.nights.saturating_add(1);
        Ok(())
    }

    fn downtime(
        &mut self,
        night: u32,
        down_days: u32,
        bounds: NightBoundaries,
    ) -> Result<(), SimulatorError> {
        self.publish_time(night, down_days)?;
        let pose = self.sequencer.get_state(self.clock.current());
        self.bus.publish(&Publication::ObservatoryState(pose))?;

        let resume = bounds
            .sunrise
            .checked_add_signed(TimeDelta::seconds(DOWNTIME_SUNRISE_MARGIN_SECS))
            .unwrap_or(bounds.sunrise);
        self.move_clock_to(resume)?;
        self.summary.down_nights = self.summary.down_nights.saturating_add(1);
        info!(night, down_days, "Observatory down, night skipped");
        Ok(())
    }

    fn exposure_cycle(&mut self, night: u32) -> Result<(), SimulatorError> {
        let now = self.clock.current();
        self.publish_time(night, 0)?;
        let pose = self.sequencer.get_state(now);
        let filter = pose.filter;
        self.bus.publish(&Publication::ObservatoryState(pose))?;

        let elapsed = self.clock.elapsed();
        let cloud = self.cloud.cloud(elapsed);
        let zenith_seeing = self.seeing.seeing(elapsed, filter, 1.0);
        self.bus.publish(&Publication::Cloud(CloudMessage {
            timestamp: now,
            cloud,
        }))?;
        self.bus.publish(&Publication::Seeing(SeeingMessage {
            timestamp: now,
            fwhm_500: zenith_seeing.fwhm_500,
            fwhm_geometric: zenith_seeing.fwhm_geometric,
            fwhm_effective: zenith_seeing.fwhm_effective,
        }))?;

        let target = self.acquire_target()?;
        let mut outcome = self.sequencer.observe_target(&target, &mut self.clock)?;

        let observation = &mut outcome.observation;
        let seeing = self
            .seeing
            .seeing(elapsed, observation.filter, observation.airmass);
        observation.cloud = cloud;
        observation.seeing_fwhm_500 = seeing.fwhm_500;
        observation.seeing_fwhm_geometric = seeing.fwhm_geometric;
        observation.seeing_fwhm_effective = seeing.fwhm_effective;
        self.bus
            .publish(&Publication::Observation(outcome.observation.clone()))?;

        let observation_id = outcome.observation.observation_id;
        let interest = self.await_interest(observation_id)?;

        if target.target_id.is_sentinel() {
            self.summary.sentinel_targets = self.summary.sentinel_targets.saturating_add(1);
            debug!(observation_id = %observation_id, "Sentinel target observed, not persisted");
            return Ok(());
        }

        let target_proposals = self.history.record(
            HistoryKind::Target,
            target.target_id.into_inner(),
            &target.proposals,
        );
        let observation_proposals = interest.map_or_else(Vec::new, |i| {
            self.history.record(
                HistoryKind::Observation,
                observation_id.into_inner(),
                &i.entries,
            )
        });

        self.batch.push(CycleRecords {
            target,
            observation: outcome.observation,
            slew: outcome.slew,
            slew_activities: outcome.slew_activities,
            slew_states: outcome.slew_states,
            target_exposures: outcome.target_exposures,
            observation_exposures: outcome.observation_exposures,
            target_proposals,
            observation_proposals,
        });
        self.summary.observations = self.summary.observations.saturating_add(1);
        trace!(night, observation_id = %observation_id, clock = %self.clock, "Cycle accepted");
        Ok(())
    }

    fn end_night(&mut self, night: u32) -> Result<(), SimulatorError> {
        self.open_night = None;
        self.sink.write_batch(night, &self.batch)?;
        self.summary.batches_written = self.summary.batches_written.saturating_add(1);
        debug!(night, cycles = self.batch.len(), "Night batch flushed");
        self.sequencer.end_night();
        Ok(())
    }

    /// Write the cycles an aborted night had already accepted. Failures are
    /// logged; the abort's own error is what the caller sees.
    fn flush_open_night(&mut self) {
        let Some(night) = self.open_night.take() else {
            return;
        };
        if self.batch.is_empty() {
            return;
        }
        match self.sink.write_batch(night, &self.batch) {
            Ok(()) => {
                self.summary.batches_written = self.summary.batches_written.saturating_add(1);
                info!(night, cycles = self.batch.len(), "Partial night flushed after abort");
            }
            Err(err) => {
                warn!(night, cycles = self.batch.len(), error = %err, "Partial night lost");
            }
        }
    }

    fn day_phase(&mut self, night: u32, down_days: u32) -> Result<(), SimulatorError> {
        self.publish_time(night, down_days)?;

        let policy = PollPolicy::soft(
            "filter swap",
            self.config.timeouts.filter_swap_timeout(),
            self.config.timeouts.poll_interval(),
        );
        let bus = &mut *self.bus;
        let request = bounded_poll(&policy, || {
            receive(bus, Topic::FilterSwap, |d| match d {
                Delivery::FilterSwap(swap) => Some(swap),
                _ => None,
            })
        })?;
        if request.is_none() {
            self.summary.missed_filter_swaps = self.summary.missed_filter_swaps.saturating_add(1);
        }

        if self.sequencer.start_day(request) {
            self.summary.filter_swaps = self.summary.filter_swaps.saturating_add(1);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduler waits
    // -----------------------------------------------------------------------

    fn acquire_target(&mut self) -> Result<Target, SimulatorError> {
        let timeout = self.config.timeouts.target_timeout();
        let policy = PollPolicy::hard("target", timeout, self.config.timeouts.poll_interval());
        let bus = &mut *self.bus;

        let max_exposures = self.config.observatory.camera.max_exposures;

        match bounded_poll(&policy, || accept_target(bus, max_exposures)) {
            Ok(Some(target)) => Ok(target),
            Ok(None) | Err(PollError::DeadlineExceeded { .. }) => {
                Err(SimulatorError::TargetTimeout { timeout })
            }
            Err(PollError::Bus { source }) => Err(source.into()),
        }
    }

    fn await_interest(
        &mut self,
        observation_id: ObservationId,
    ) -> Result<Option<InterestedProposal>, SimulatorError> {
        let policy = PollPolicy::soft(
            "proposal interest",
            self.config.timeouts.interest_timeout(),
            self.config.timeouts.poll_interval(),
        );
        let bus = &mut *self.bus;
        let interest = bounded_poll(&policy, || {
            let reply = receive(bus, Topic::InterestedProposal, |d| match d {
                Delivery::InterestedProposal(interest) => Some(interest),
                _ => None,
            })?;
            Ok(reply.filter(|i| {
                let matches = i.observation_id == observation_id;
                if !matches {
                    debug!(
                        expected = %observation_id,
                        received = %i.observation_id,
                        "Stale proposal interest dropped"
                    );
                }
                matches
            }))
        })?;

        if interest.is_none() {
            self.summary.missed_interest = self.summary.missed_interest.saturating_add(1);
        }
        Ok(interest)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn publish_time(&mut self, night: u32, down_days: u32) -> Result<(), SimulatorError> {
        self.bus.publish(&Publication::Time(TimeMessage {
            timestamp: self.clock.current(),
            night,
            is_down: down_days > 0,
            down_days,
        }))?;
        Ok(())
    }

    /// Move the clock forward to `instant`; an instant already in the past
    /// leaves the clock where it is.
    fn move_clock_to(&mut self, instant: DateTime<Utc>) -> Result<(), SimulatorError> {
        if instant < self.clock.current() {
            warn!(
                requested = %instant,
                clock = %self.clock,
                "Clock already past the requested instant"
            );
            return Ok(());
        }
        self.clock.advance_to(instant)?;
        Ok(())
    }
}

impl std::fmt::Debug for Simulator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("total_nights", &self.total_nights)
            .field("clock", &self.clock)
            .field("summary", &self.summary)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Poll `topic` once and unwrap the payload, rejecting deliveries of the
/// wrong type.
fn receive<T>(
    bus: &mut dyn MessageBus,
    topic: Topic,
    extract: fn(Delivery) -> Option<T>,
) -> Result<Option<T>, BusError> {
    let Some(delivery) = bus.poll(topic)? else {
        return Ok(None);
    };
    let actual = delivery.topic();
    extract(delivery)
        .map(Some)
        .ok_or(BusError::UnexpectedDelivery {
            expected: topic,
            actual,
        })
}

/// A target with zero exposures means "nothing yet" and is skipped, as is
/// one asking for more exposures than a visit can take.
fn accept_target(
    bus: &mut dyn MessageBus,
    max_exposures: u32,
) -> Result<Option<Target>, BusError> {
    let target = receive(bus, Topic::Target, |d| match d {
        Delivery::Target(target) => Some(target),
        _ => None,
    })?;
    Ok(target.filter(|t| match t.num_exposures {
        0 => {
            trace!(target_id = %t.target_id, "Target without exposures skipped");
            false
        }
        n if n > max_exposures => {
            warn!(
                target_id = %t.target_id,
                num_exposures = n,
                max_exposures,
                "Target exceeds the exposure limit, skipped"
            );
            false
        }
        _ => true,
    }))
}
