//! `PostgreSQL` storage for the survey simulation.
//!
//! The driver accumulates a night of history in memory and hands it to a
//! [`StorageSink`](socs_core::storage::StorageSink) at night end. This
//! crate provides the `PostgreSQL` implementation of that sink.
//!
//! # Architecture
//!
//! ```text
//! Simulator (sync)
//!     |
//!     +-- PostgresSink ------ block_in_place bridge
//!         |
//!         +-- HistoryStore
//!             |-- session, field, downtime      (start-up)
//!             +-- nightly streams               (one transaction per night)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool, configuration, migrations
//! - [`history_store`] -- Batch `UNNEST` inserts and read-back queries
//! - [`sink`] -- The [`StorageSink`](socs_core::storage::StorageSink) bridge
//! - [`error`] -- Shared error types

pub mod error;
pub mod history_store;
pub mod postgres;
pub mod sink;

// Re-export primary types for convenience.
pub use error::DbError;
pub use history_store::{HistoryStore, HistoryTable, ObservationRow, SessionRow};
pub use postgres::{PostgresConfig, PostgresPool};
pub use sink::PostgresSink;
