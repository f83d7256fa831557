//! Simulated clock, night cycle, and survey driver for the observatory
//! control simulation.
//!
//! This crate owns the night/day state machine that drives a survey:
//! Night Start, Exposure Cycles, Night End, and Day, with an optional
//! Downtime branch inside Night Start.
//!
//! # Modules
//!
//! - [`clock`] -- Monotonic simulated clock.
//! - [`config`] -- Configuration loading from `socs-config.yaml` into
//!   strongly-typed structs.
//! - [`downtime`] -- Precomputed night-to-outage calendar.
//! - [`poll`] -- The single bounded-wait primitive with hard and soft
//!   deadlines.
//! - [`bus`] -- [`MessageBus`] trait and the scripted [`MemoryBus`].
//! - [`storage`] -- [`StorageSink`] trait, per-night batches, and
//!   [`MemorySink`].
//! - [`environment`] -- Sky, cloud, and seeing models.
//! - [`observatory`] -- Observatory pose and timing model.
//! - [`sequencer`] -- Turns targets into observations.
//! - [`history`] -- Proposal history rows with run-wide counters.
//! - [`simulator`] -- The survey driver.
//!
//! [`MessageBus`]: bus::MessageBus
//! [`MemoryBus`]: bus::MemoryBus
//! [`StorageSink`]: storage::StorageSink
//! [`MemorySink`]: storage::MemorySink

pub mod bus;
pub mod clock;
pub mod config;
pub mod downtime;
pub mod environment;
pub mod history;
pub mod observatory;
pub mod poll;
pub mod sequencer;
pub mod simulator;
pub mod storage;
