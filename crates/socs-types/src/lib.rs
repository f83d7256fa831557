//! Shared type definitions for the simulated observatory control system.
//!
//! This crate is the single source of truth for the values that cross
//! crate boundaries: identifiers, filters, scheduler targets, completed
//! observations, history records, and the bus messages exchanged with the
//! external scheduler.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe `i64` wrappers for scheduler and storage identifiers
//! - [`enums`] -- Filters and history stream kinds
//! - [`structs`] -- Targets, observations, observatory pose, history records
//! - [`messages`] -- Per-topic payloads and the [`Publication`]/[`Delivery`] envelopes

pub mod enums;
pub mod ids;
pub mod messages;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{Filter, HistoryKind};
pub use ids::{FieldId, ObservationId, ProposalId, SessionId, TargetId};
pub use messages::{
    CloudMessage, Delivery, FilterSwap, InterestedProposal, Publication, SeeingMessage,
    SurveyConfigMessage, TimeMessage, Topic,
};
pub use structs::{
    DowntimeEntry, ExposureRecord, Field, Observation, ObservatoryState, ProposalHistoryRow,
    ProposalInterest, SessionInfo, SlewActivity, SlewEndpoint, SlewRecord, SlewState, Target,
};
