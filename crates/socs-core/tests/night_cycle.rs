//! End-to-end night cycle scenarios against the scripted bus and the
//! in-memory sink.
//!
//! The observatory here is a fixed-timing stand-in: every slew takes 6 s
//! and every visit 34 s, so a 360 s night holds exactly nine cycles.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::arithmetic_side_effects
)]

use std::time::Instant;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use socs_core::bus::MemoryBus;
use socs_core::config::{OutageRange, SimulationConfig};
use socs_core::environment::{FixedNightSkyModel, TabulatedCloudModel, TabulatedSeeingModel};
use socs_core::observatory::{ActivityDelay, ObservatoryModel, SlewOutcome, VisitPlan};
use socs_core::simulator::{Models, Simulator, SimulatorError};
use socs_core::storage::MemorySink;
use socs_types::{
    Delivery, Field, FieldId, Filter, FilterSwap, HistoryKind, InterestedProposal, ObservationId,
    ObservatoryState, ProposalId, ProposalInterest, Publication, Target, TargetId, Topic,
};

/// Sunset on 2022-01-01 with the default 23.5 h offset.
const FIRST_SUNSET: i64 = 1_641_079_800;

const SLEW_SECS: i64 = 6;
const VISIT_SECS: i64 = 34;
const CYCLE_SECS: i64 = SLEW_SECS + VISIT_SECS;

// =============================================================================
// Fixtures
// =============================================================================

struct FixedTimingObservatory {
    ra: f64,
    dec: f64,
    filter: Filter,
    tracking: bool,
    mounted: Vec<Filter>,
    unmounted: Vec<Filter>,
}

impl FixedTimingObservatory {
    fn new() -> Self {
        Self {
            ra: 0.0,
            dec: 0.0,
            filter: Filter::R,
            tracking: false,
            mounted: vec![Filter::G, Filter::R, Filter::I, Filter::Z, Filter::Y],
            unmounted: vec![Filter::U],
        }
    }
}

impl ObservatoryModel for FixedTimingObservatory {
    fn state(&self, at: DateTime<Utc>) -> ObservatoryState {
        ObservatoryState {
            timestamp: at,
            ra: self.ra,
            dec: self.dec,
            angle: 0.0,
            alt: 60.0,
            az: 180.0,
            filter: self.filter,
            tracking: self.tracking,
            mounted_filters: self.mounted.clone(),
            unmounted_filters: self.unmounted.clone(),
        }
    }

    fn slew(&mut self, target: &Target, at: DateTime<Utc>) -> SlewOutcome {
        let initial = self.state(at);
        self.ra = target.ra;
        self.dec = target.dec;
        self.filter = target.filter;
        self.tracking = true;
        let duration = TimeDelta::seconds(SLEW_SECS);
        SlewOutcome {
            duration,
            distance: 1.5,
            activities: vec![ActivityDelay {
                name: "telescope",
                delay: 6.0,
                in_critical_path: true,
            }],
            initial,
            final_state: self.state(at + duration),
        }
    }

    fn plan_visit(&self, target: &Target) -> VisitPlan {
        let count = usize::try_from(target.num_exposures).unwrap();
        VisitPlan {
            exposure_times: vec![15.0; count],
            exposure_offsets: (0..i64::from(target.num_exposures))
                .map(|i| TimeDelta::seconds(18 * i))
                .collect(),
            duration: TimeDelta::seconds(VISIT_SECS),
        }
    }

    fn airmass(&self, _ra: f64, _dec: f64, _at: DateTime<Utc>) -> f64 {
        1.2
    }

    fn swap_filter(&mut self, filter: Filter) -> bool {
        let Some(pos) = self.mounted.iter().position(|f| *f == filter) else {
            return false;
        };
        if self.unmounted.is_empty() {
            return false;
        }
        let replacement = self.unmounted.remove(0);
        self.mounted[pos] = replacement;
        self.unmounted.push(filter);
        true
    }

    fn park(&mut self) {
        self.tracking = false;
    }
}

/// `nights` nights of `cycles` cycles each, with short timeouts.
fn config(nights: u32, cycles: u32) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.survey.duration = f64::from(nights) / 365.0;
    config.environment.night.night_hours = f64::from(cycles) * CYCLE_SECS as f64 / 3600.0;
    config.timeouts.target_timeout_secs = 0.2;
    config.timeouts.interest_timeout_secs = 0.02;
    config.timeouts.filter_swap_timeout_secs = 0.01;
    config.timeouts.poll_interval_ms = 1;
    config
}

fn models(config: &SimulationConfig) -> Models {
    Models {
        observatory: Box::new(FixedTimingObservatory::new()),
        sky: Box::new(FixedNightSkyModel::from_config(&config.environment.night)),
        cloud: Box::new(TabulatedCloudModel::from_config(&config.environment.cloud)),
        seeing: Box::new(TabulatedSeeingModel::from_config(&config.environment.seeing)),
    }
}

fn interest(proposal: i64) -> ProposalInterest {
    ProposalInterest {
        proposal_id: ProposalId::new(proposal),
        value: 0.5,
        need: 0.9,
        bonus: 0.1,
        boost: 0.0,
    }
}

fn target(id: i64, num_exposures: u32) -> Target {
    Target {
        target_id: TargetId::new(id),
        field_id: FieldId::new(1000 + id),
        filter: Filter::R,
        ra: 10.0 + id as f64,
        dec: -30.0,
        angle: 0.0,
        num_exposures,
        exposure_times: vec![15.0, 15.0],
        proposals: vec![interest(1)],
    }
}

fn field(id: i64) -> Field {
    Field {
        field_id: FieldId::new(id),
        fov: 3.5,
        ra: 0.0,
        dec: 0.0,
        gl: 0.0,
        gb: 0.0,
        el: 0.0,
        eb: 0.0,
    }
}

fn catalog_end() -> [Delivery; 2] {
    [Delivery::Field(field(-1)), Delivery::Field(field(-1))]
}

/// A scheduler that answers every observation with two interested
/// proposals.
fn responsive_bus() -> MemoryBus {
    let mut bus = MemoryBus::new().with_responder(Box::new(|published| match published {
        Publication::Observation(obs) => vec![Delivery::InterestedProposal(InterestedProposal {
            observation_id: obs.observation_id,
            entries: vec![interest(1), interest(2)],
        })],
        _ => Vec::new(),
    }));
    bus.push_all(catalog_end());
    bus
}

fn queue_targets(bus: &mut MemoryBus, ids: impl IntoIterator<Item = i64>) {
    bus.push_all(ids.into_iter().map(|id| Delivery::Target(target(id, 2))));
}

fn first_sunset() -> DateTime<Utc> {
    DateTime::from_timestamp(FIRST_SUNSET, 0).unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn nine_target_night_persists_every_cycle() {
    let config = config(1, 9);
    let mut bus = responsive_bus();
    queue_targets(&mut bus, 1..=9);
    let mut sink = MemorySink::new();

    let summary = {
        let mut sim = Simulator::new(&config, models(&config), &mut bus, &mut sink).unwrap();
        assert_eq!(sim.total_nights(), 1);
        sim.run().unwrap()
    };

    assert_eq!(summary.observations_made, 9);
    assert_eq!(summary.observations, 9);
    assert_eq!(summary.nights, 1);
    assert_eq!(summary.downtime_lookups, 1);
    assert_eq!(summary.missed_interest, 0);
    assert_eq!(sink.flush_count(), 1);
    assert_eq!(sink.observations().len(), 9);
    assert_eq!(sink.targets().len(), 9);

    let (night, batch) = &sink.batches()[0];
    assert_eq!(*night, 1);
    assert_eq!(batch.slews().count(), 9);
    assert_eq!(batch.slew_states().count(), 18);
    assert_eq!(batch.exposures().count(), 36);

    let ids: Vec<ObservationId> = sink.observations().iter().map(|o| o.observation_id).collect();
    assert_eq!(ids, (1..=9).map(ObservationId::new).collect::<Vec<_>>());

    // The night ends exactly at sunrise: nine 40 s cycles after sunset.
    let sunrise = first_sunset() + TimeDelta::seconds(9 * CYCLE_SECS);
    assert_eq!(summary.end_time, sunrise);
    assert_eq!(bus.poll_count(Topic::Target), 9);
    assert!(bus.is_finalized());
    assert!(sink.is_ended());
}

#[test]
fn clock_is_repositioned_to_sunset() {
    let config = config(1, 1);
    let mut bus = responsive_bus();
    queue_targets(&mut bus, [1]);
    let mut sink = MemorySink::new();

    Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    let first_time = bus
        .published_on(Topic::Time)
        .next()
        .and_then(|p| match p {
            Publication::Time(t) => Some(t.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_time.timestamp, first_sunset());
    assert!(!first_time.is_down);

    let observation = sink.observations()[0].clone();
    assert_eq!(
        observation.observation_start_time,
        first_sunset() + TimeDelta::seconds(SLEW_SECS)
    );
    assert_eq!(observation.visit_time, 34.0);
    assert_eq!(observation.airmass, 1.2);
    assert!(observation.seeing_fwhm_effective > 0.0);
}

#[test]
fn published_cycle_follows_protocol_order() {
    let config = config(1, 1);
    let mut bus = responsive_bus();
    queue_targets(&mut bus, [1]);
    let mut sink = MemorySink::new();

    Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    let topics: Vec<Topic> = bus.published().iter().map(Publication::topic).collect();
    assert_eq!(
        topics,
        vec![
            Topic::SurveyConfig,
            Topic::Time,
            Topic::ObservatoryState,
            Topic::Cloud,
            Topic::Seeing,
            Topic::Observation,
            Topic::Time,
        ]
    );
}

#[test]
fn downtime_night_observes_nothing() {
    let mut config = config(1, 9);
    config.downtime.scheduled = vec![OutageRange {
        start_night: 1,
        duration: 1,
    }];
    let mut bus = responsive_bus();
    queue_targets(&mut bus, 1..=9);
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.down_nights, 1);
    assert_eq!(summary.downtime_lookups, 1);
    assert_eq!(summary.observations_made, 0);
    assert_eq!(bus.poll_count(Topic::Target), 0);
    assert_eq!(bus.pending(Topic::Target), 9);
    assert!(sink.observations().is_empty());
    assert_eq!(sink.flush_count(), 1);
    assert_eq!(sink.downtime().len(), 1);

    // Sunrise plus one minute.
    let resume = first_sunset() + TimeDelta::seconds(9 * CYCLE_SECS + 60);
    assert_eq!(summary.end_time, resume);

    let first_time = bus
        .published_on(Topic::Time)
        .find_map(|p| match p {
            Publication::Time(t) => Some(t.clone()),
            _ => None,
        })
        .unwrap();
    assert!(first_time.is_down);
    assert_eq!(first_time.down_days, 1);
    assert_eq!(bus.published_on(Topic::Observation).count(), 0);
}

#[test]
fn missing_target_is_fatal_after_the_deadline() {
    let config = config(1, 9);
    let mut bus = responsive_bus();
    let mut sink = MemorySink::new();

    let started = Instant::now();
    let result = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run();

    match result {
        Err(SimulatorError::TargetTimeout { timeout }) => {
            assert!((timeout.as_secs_f64() - 0.2).abs() < 1e-6);
            assert!(started.elapsed() >= timeout);
        }
        other => panic!("expected a target timeout, got {other:?}"),
    }
    // Finalize still ran; nothing was flushed.
    assert!(bus.is_finalized());
    assert!(sink.is_ended());
    assert_eq!(sink.flush_count(), 0);
}

#[test]
fn aborted_night_keeps_its_accepted_cycles() {
    let config = config(1, 9);
    let mut bus = responsive_bus();
    queue_targets(&mut bus, 1..=3);
    let mut sink = MemorySink::new();

    let result = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run();

    assert!(matches!(result, Err(SimulatorError::TargetTimeout { .. })));
    assert_eq!(sink.flush_count(), 1);
    assert_eq!(sink.batches()[0].0, 1);
    assert_eq!(sink.observations().len(), 3);
    assert_eq!(sink.targets().len(), 3);
    assert!(sink.is_ended());
    assert!(bus.is_finalized());
}

#[test]
fn targets_over_the_exposure_limit_are_skipped() {
    let config = config(1, 1);
    let mut bus = responsive_bus();
    bus.push(Delivery::Target(target(1, u32::MAX)));
    bus.push(Delivery::Target(target(2, 2)));
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.observations_made, 1);
    assert_eq!(bus.poll_count(Topic::Target), 2);
    assert_eq!(sink.targets()[0].target_id, TargetId::new(2));
}

#[test]
fn zero_exposure_targets_are_skipped() {
    let config = config(1, 1);
    let mut bus = responsive_bus();
    bus.push(Delivery::Target(target(1, 0)));
    bus.push(Delivery::Target(target(2, 2)));
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.observations_made, 1);
    assert_eq!(bus.poll_count(Topic::Target), 2);
    assert_eq!(sink.targets()[0].target_id, TargetId::new(2));
}

#[test]
fn missing_interest_leaves_history_empty_without_aborting() {
    let config = config(1, 2);
    let mut bus = MemoryBus::new();
    bus.push_all(catalog_end());
    queue_targets(&mut bus, [1, 2]);
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.observations, 2);
    assert_eq!(summary.missed_interest, 2);
    let observation_rows = sink
        .proposal_history()
        .into_iter()
        .filter(|r| r.kind == HistoryKind::Observation)
        .count();
    assert_eq!(observation_rows, 0);
    // The target stream still carries the target's own proposals.
    assert_eq!(sink.proposal_history().len(), 2);
}

#[test]
fn stale_interest_is_not_attributed() {
    let config = config(1, 1);
    let mut bus = MemoryBus::new().with_responder(Box::new(|published| match published {
        Publication::Observation(obs) => vec![Delivery::InterestedProposal(InterestedProposal {
            observation_id: ObservationId::new(obs.observation_id.into_inner() + 100),
            entries: vec![interest(7)],
        })],
        _ => Vec::new(),
    }));
    bus.push_all(catalog_end());
    queue_targets(&mut bus, [1]);
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.missed_interest, 1);
    assert!(
        sink.proposal_history()
            .iter()
            .all(|r| r.kind == HistoryKind::Target)
    );
}

#[test]
fn history_counters_never_reset_between_nights() {
    let config = config(2, 1);
    let mut bus = responsive_bus();
    queue_targets(&mut bus, [1, 2]);
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.nights, 2);
    assert_eq!(summary.downtime_lookups, 2);
    assert_eq!(sink.flush_count(), 2);

    let observation_ids: Vec<u64> = sink
        .proposal_history()
        .into_iter()
        .filter(|r| r.kind == HistoryKind::Observation)
        .map(|r| r.history_id)
        .collect();
    assert_eq!(observation_ids, vec![1, 2, 3, 4]);

    let target_ids: Vec<u64> = sink
        .proposal_history()
        .into_iter()
        .filter(|r| r.kind == HistoryKind::Target)
        .map(|r| r.history_id)
        .collect();
    assert_eq!(target_ids, vec![1, 2]);

    let nights: Vec<u32> = sink.observations().iter().map(|o| o.night).collect();
    assert_eq!(nights, vec![1, 2]);
}

#[test]
fn sentinel_target_is_observed_but_not_persisted() {
    let config = config(1, 2);
    let mut bus = responsive_bus();
    bus.push(Delivery::Target(target(-1, 2)));
    bus.push(Delivery::Target(target(5, 2)));
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.observations_made, 2);
    assert_eq!(summary.sentinel_targets, 1);
    assert_eq!(sink.observations().len(), 1);
    assert_eq!(sink.observations()[0].observation_id, ObservationId::new(2));
}

#[test]
fn filter_swap_is_applied_during_the_day() {
    let config = config(1, 1);
    let mut bus = responsive_bus();
    queue_targets(&mut bus, [1]);
    bus.push(Delivery::FilterSwap(FilterSwap {
        need_swap: true,
        filter_to_unmount: Filter::Y,
    }));
    let mut sink = MemorySink::new();

    let summary = Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.filter_swaps, 1);
    assert_eq!(summary.missed_filter_swaps, 0);
}

#[test]
fn field_catalog_ends_after_two_consecutive_sentinels() {
    let config = config(1, 1);
    let mut bus = MemoryBus::new();
    bus.push_all([
        Delivery::Field(field(1)),
        Delivery::Field(field(-1)),
        Delivery::Field(field(2)),
        Delivery::Field(field(3)),
    ]);
    bus.push_all(catalog_end());
    queue_targets(&mut bus, [1]);
    let mut sink = MemorySink::new();

    Simulator::new(&config, models(&config), &mut bus, &mut sink)
        .unwrap()
        .run()
        .unwrap();

    let ids: Vec<i64> = sink.fields().iter().map(|f| f.field_id.into_inner()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(sink.session().is_some());
}

#[test]
fn run_cannot_be_repeated() {
    let config = config(1, 1);
    let mut bus = responsive_bus();
    queue_targets(&mut bus, [1]);
    let mut sink = MemorySink::new();

    let mut sim = Simulator::new(&config, models(&config), &mut bus, &mut sink).unwrap();
    sim.run().unwrap();
    assert!(matches!(sim.run(), Err(SimulatorError::AlreadyFinished)));
}

#[test]
fn non_positive_duration_override_uses_configured_length() {
    let config = config(2, 1);
    let mut bus = responsive_bus();
    let mut sink = MemorySink::new();
    let sim = Simulator::with_duration(&config, -1.0, models(&config), &mut bus, &mut sink)
        .unwrap();
    assert_eq!(sim.total_nights(), 2);
    assert_eq!(
        sim.clock().current(),
        NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
    );
}
