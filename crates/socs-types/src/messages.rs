//! Bus messages exchanged with the external scheduler.
//!
//! Each topic has a declared payload struct. Outbound payloads are wrapped
//! in [`Publication`] and inbound payloads in [`Delivery`], one variant per
//! topic, so a transport only ever moves immutable values.
//!
//! # Subject Convention
//!
//! Transports that address topics by name use `socs.{topic}`, see
//! [`Topic::subject`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::Filter;
use crate::ids::ObservationId;
use crate::structs::{Field, Observation, ObservatoryState, ProposalInterest, Target};

/// Every topic known to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Simulated time (published).
    Time,
    /// Observatory pose (published).
    ObservatoryState,
    /// Cloud opacity (published).
    Cloud,
    /// Seeing figures (published).
    Seeing,
    /// Completed observation (published).
    Observation,
    /// Survey configuration (published once at start-up).
    SurveyConfig,
    /// Requested target (subscribed).
    Target,
    /// Field catalog entry (subscribed at start-up).
    Field,
    /// Proposal interest in the last observation (subscribed).
    InterestedProposal,
    /// Day-time filter swap request (subscribed).
    FilterSwap,
}

impl Topic {
    /// The topic's short name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::ObservatoryState => "observatory_state",
            Self::Cloud => "cloud",
            Self::Seeing => "seeing",
            Self::Observation => "observation",
            Self::SurveyConfig => "survey_config",
            Self::Target => "target",
            Self::Field => "field",
            Self::InterestedProposal => "interested_proposal",
            Self::FilterSwap => "filter_swap",
        }
    }

    /// Transport subject for this topic: `socs.{name}`.
    pub fn subject(self) -> String {
        format!("socs.{}", self.name())
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// Current simulated time, with the night's downtime status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeMessage {
    /// Current simulated instant.
    pub timestamp: DateTime<Utc>,
    /// Current night index (1-based).
    pub night: u32,
    /// Whether the observatory is down tonight.
    pub is_down: bool,
    /// Remaining outage length in days (0 when up).
    pub down_days: u32,
}

/// Cloud opacity reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudMessage {
    /// Instant of the reading.
    pub timestamp: DateTime<Utc>,
    /// Cloud opacity in tenths of sky (0.0 = clear, 1.0 = overcast).
    pub cloud: f64,
}

/// Seeing reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeeingMessage {
    /// Instant of the reading.
    pub timestamp: DateTime<Utc>,
    /// Zenith seeing at 500 nm in arcseconds.
    pub fwhm_500: f64,
    /// Geometric seeing in arcseconds.
    pub fwhm_geometric: f64,
    /// Effective seeing in arcseconds.
    pub fwhm_effective: f64,
}

/// Survey-level configuration announced to the scheduler at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyConfigMessage {
    /// Survey start instant.
    pub start_time: DateTime<Utc>,
    /// Number of nights to simulate.
    pub total_nights: u32,
    /// Site latitude in degrees.
    pub site_latitude: f64,
    /// Site longitude in degrees (east positive).
    pub site_longitude: f64,
    /// Filters loaded in the carousel at start-up.
    pub mounted_filters: Vec<Filter>,
    /// Filters stored off the camera at start-up.
    pub unmounted_filters: Vec<Filter>,
}

/// A message this system publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum Publication {
    /// Simulated time.
    Time(TimeMessage),
    /// Observatory pose.
    ObservatoryState(ObservatoryState),
    /// Cloud opacity.
    Cloud(CloudMessage),
    /// Seeing figures.
    Seeing(SeeingMessage),
    /// Completed observation.
    Observation(Observation),
    /// Survey configuration.
    SurveyConfig(SurveyConfigMessage),
}

impl Publication {
    /// The topic this publication belongs to.
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Time(_) => Topic::Time,
            Self::ObservatoryState(_) => Topic::ObservatoryState,
            Self::Cloud(_) => Topic::Cloud,
            Self::Seeing(_) => Topic::Seeing,
            Self::Observation(_) => Topic::Observation,
            Self::SurveyConfig(_) => Topic::SurveyConfig,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Proposal interest in a completed observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestedProposal {
    /// Observation the interest refers to.
    pub observation_id: ObservationId,
    /// One entry per interested proposal.
    #[serde(default)]
    pub entries: Vec<ProposalInterest>,
}

/// Day-time filter swap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSwap {
    /// Whether a swap is wanted.
    pub need_swap: bool,
    /// Filter to take out of the carousel.
    pub filter_to_unmount: Filter,
}

/// A message this system receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum Delivery {
    /// Requested target.
    Target(Target),
    /// Field catalog entry.
    Field(Field),
    /// Proposal interest.
    InterestedProposal(InterestedProposal),
    /// Filter swap request.
    FilterSwap(FilterSwap),
}

impl Delivery {
    /// The topic this delivery arrived on.
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Target(_) => Topic::Target,
            Self::Field(_) => Topic::Field,
            Self::InterestedProposal(_) => Topic::InterestedProposal,
            Self::FilterSwap(_) => Topic::FilterSwap,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ids::{FieldId, TargetId};

    #[test]
    fn subjects_are_namespaced() {
        assert_eq!(Topic::Target.subject(), "socs.target");
        assert_eq!(Topic::InterestedProposal.subject(), "socs.interested_proposal");
    }

    #[test]
    fn delivery_topic_matches_variant() {
        let swap = Delivery::FilterSwap(FilterSwap {
            need_swap: false,
            filter_to_unmount: Filter::Z,
        });
        assert_eq!(swap.topic(), Topic::FilterSwap);
    }

    #[test]
    fn delivery_is_tagged_by_topic() {
        let json = r#"{"topic":"target","payload":{
            "target_id": 9, "field_id": 12, "filter": "g",
            "ra": 1.0, "dec": -2.0, "num_exposures": 2}}"#;
        let delivery: Delivery = serde_json::from_str(json).unwrap();
        assert_eq!(delivery.topic(), Topic::Target);
        if let Delivery::Target(target) = delivery {
            assert_eq!(target.target_id, TargetId::new(9));
            assert_eq!(target.field_id, FieldId::new(12));
        }
    }
}
