//! Core value structs: targets, observations, fields, observatory pose, and
//! the history records appended to storage.
//!
//! Every struct here is a plain value. Nothing is shared or mutated in
//! place once it has been handed to the bus or to storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{Filter, HistoryKind};
use crate::ids::{FieldId, ObservationId, ProposalId, SessionId, TargetId};

// ---------------------------------------------------------------------------
// Scheduler inputs
// ---------------------------------------------------------------------------

/// One proposal's interest in a target or observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalInterest {
    /// The interested proposal.
    pub proposal_id: ProposalId,
    /// Scheduler ranking value.
    pub value: f64,
    /// How far the proposal is from completing this field/filter.
    pub need: f64,
    /// Time-based bonus applied by the scheduler.
    pub bonus: f64,
    /// Additional boost applied by the scheduler.
    pub boost: f64,
}

/// A requested observation candidate supplied by the external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Scheduler-assigned target identifier.
    pub target_id: TargetId,
    /// Sky field the target points at.
    pub field_id: FieldId,
    /// Requested filter.
    pub filter: Filter,
    /// Right ascension in degrees.
    pub ra: f64,
    /// Declination in degrees.
    pub dec: f64,
    /// Sky rotation angle in degrees.
    #[serde(default)]
    pub angle: f64,
    /// Number of exposures in the visit. Zero means "no target yet".
    pub num_exposures: u32,
    /// Per-exposure shutter-open times in seconds.
    #[serde(default)]
    pub exposure_times: Vec<f64>,
    /// Proposals interested in this target.
    #[serde(default)]
    pub proposals: Vec<ProposalInterest>,
}

/// A sky field from the survey tessellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field identifier ([`FieldId::SENTINEL`] terminates the catalog).
    pub field_id: FieldId,
    /// Field of view in degrees.
    pub fov: f64,
    /// Right ascension in degrees.
    pub ra: f64,
    /// Declination in degrees.
    pub dec: f64,
    /// Galactic longitude in degrees.
    pub gl: f64,
    /// Galactic latitude in degrees.
    pub gb: f64,
    /// Ecliptic longitude in degrees.
    pub el: f64,
    /// Ecliptic latitude in degrees.
    pub eb: f64,
}

// ---------------------------------------------------------------------------
// Observatory pose
// ---------------------------------------------------------------------------

/// Read-only projection of the observatory's pose at an instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservatoryState {
    /// Instant the pose describes.
    pub timestamp: DateTime<Utc>,
    /// Pointing right ascension in degrees.
    pub ra: f64,
    /// Pointing declination in degrees.
    pub dec: f64,
    /// Sky rotation angle in degrees.
    pub angle: f64,
    /// Altitude in degrees.
    pub alt: f64,
    /// Azimuth in degrees.
    pub az: f64,
    /// Filter currently in the beam.
    pub filter: Filter,
    /// Whether the telescope is tracking a field.
    pub tracking: bool,
    /// Filters loaded in the carousel.
    pub mounted_filters: Vec<Filter>,
    /// Filters stored off the camera.
    pub unmounted_filters: Vec<Filter>,
}

// ---------------------------------------------------------------------------
// Observation outputs
// ---------------------------------------------------------------------------

/// The realized result of executing a target through slew and exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observation identifier.
    pub observation_id: ObservationId,
    /// Night index the observation was taken on.
    pub night: u32,
    /// The target this observation realizes.
    pub target_id: TargetId,
    /// Observed field.
    pub field_id: FieldId,
    /// Filter used.
    pub filter: Filter,
    /// Right ascension in degrees.
    pub ra: f64,
    /// Declination in degrees.
    pub dec: f64,
    /// Sky rotation angle in degrees.
    pub angle: f64,
    /// Number of exposures taken.
    pub num_exposures: u32,
    /// Post-slew instant the visit started.
    pub observation_start_time: DateTime<Utc>,
    /// Visit duration in seconds.
    pub visit_time: f64,
    /// Airmass at the start of the visit.
    pub airmass: f64,
    /// Cloud opacity (filled in by the driver).
    pub cloud: f64,
    /// Zenith seeing at 500 nm in arcseconds (filled in by the driver).
    pub seeing_fwhm_500: f64,
    /// Geometric seeing in arcseconds (filled in by the driver).
    pub seeing_fwhm_geometric: f64,
    /// Effective seeing in arcseconds (filled in by the driver).
    pub seeing_fwhm_effective: f64,
}

/// One slew, tagged with the observation it preceded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlewRecord {
    /// Run-wide slew counter (1-based).
    pub slew_count: u64,
    /// Observation the slew led to.
    pub observation_id: ObservationId,
    /// Instant the slew began.
    pub slew_start: DateTime<Utc>,
    /// Instant the slew finished.
    pub slew_end: DateTime<Utc>,
    /// Slew duration in seconds.
    pub slew_time: f64,
    /// Angular distance travelled in degrees.
    pub slew_distance: f64,
}

/// One activity contributing to a slew's duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlewActivity {
    /// Slew the activity belongs to.
    pub slew_count: u64,
    /// Activity name (e.g. `telescope`, `settle`, `filter`).
    pub activity: String,
    /// Activity duration in seconds.
    pub delay: f64,
    /// Whether the activity sets the slew duration.
    pub in_critical_path: bool,
}

/// Which end of a slew a recorded pose describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlewEndpoint {
    /// Pose before the slew.
    Initial,
    /// Pose after the slew.
    Final,
}

/// Observatory pose at one end of a slew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlewState {
    /// Slew the pose belongs to.
    pub slew_count: u64,
    /// Start or end of the slew.
    pub endpoint: SlewEndpoint,
    /// The pose.
    pub state: ObservatoryState,
}

/// One exposure, planned (target) or executed (observation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    /// 1-based exposure number within the visit.
    pub exposure_num: u32,
    /// Which stream the exposure belongs to.
    pub kind: HistoryKind,
    /// Owning target or observation id.
    pub owner_id: i64,
    /// Instant the shutter opened (planned exposures use the visit start).
    pub exposure_start: DateTime<Utc>,
    /// Shutter-open time in seconds.
    pub exposure_time: f64,
}

/// A normalized proposal-interest row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalHistoryRow {
    /// Run-wide counter for this row's stream (1-based).
    pub history_id: u64,
    /// Which stream the row belongs to.
    pub kind: HistoryKind,
    /// The interested proposal.
    pub proposal_id: ProposalId,
    /// Scheduler ranking value.
    pub value: f64,
    /// Proposal need.
    pub need: f64,
    /// Time bonus.
    pub bonus: f64,
    /// Boost.
    pub boost: f64,
    /// Owning target or observation id.
    pub owner_id: i64,
}

// ---------------------------------------------------------------------------
// Session and calendar records
// ---------------------------------------------------------------------------

/// A scheduled outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowntimeEntry {
    /// Night the outage starts on.
    pub night: u32,
    /// Outage length in days.
    pub duration_days: u32,
    /// Whether the outage came from the scheduled list.
    pub scheduled: bool,
}

/// Metadata recorded when a simulation session opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier assigned by storage.
    pub session_id: SessionId,
    /// Survey start instant.
    pub start_time: DateTime<Utc>,
    /// Number of nights in the run.
    pub total_nights: u32,
    /// Free-form run comment.
    pub comment: String,
}
