//! [`StorageSink`] backed by `PostgreSQL`.
//!
//! # Sync/Async Bridge
//!
//! The driver calls the sink synchronously from inside the engine's tokio
//! runtime. Each call grabs the current runtime handle and runs the async
//! query under [`tokio::task::block_in_place`], so the executor thread is
//! not starved while the query runs. A multi-threaded runtime is required.

use std::future::Future;

use chrono::{DateTime, Utc};
use socs_core::storage::{NightBatch, StorageError, StorageSink};
use socs_types::{DowntimeEntry, Field, SessionId, SessionInfo};
use tracing::{debug, info};

use crate::error::DbError;
use crate::history_store::HistoryStore;
use crate::postgres::PostgresPool;

/// Writes simulation history to `PostgreSQL`, one transaction per night.
#[derive(Debug)]
pub struct PostgresSink {
    pool: PostgresPool,
    session: Option<SessionId>,
}

impl PostgresSink {
    /// Wrap an already-migrated pool.
    pub const fn new(pool: PostgresPool) -> Self {
        Self {
            pool,
            session: None,
        }
    }

    /// The open session, if any.
    pub const fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PostgresPool {
        &self.pool
    }

    fn open_session(&self) -> Result<SessionId, StorageError> {
        self.session.ok_or(StorageError::NoSession)
    }
}

impl StorageSink for PostgresSink {
    fn begin_session(
        &mut self,
        start_time: DateTime<Utc>,
        total_nights: u32,
        comment: &str,
    ) -> Result<SessionInfo, StorageError> {
        let store = HistoryStore::new(self.pool.pool());
        let session_id = bridge(
            "create session",
            store.create_session(start_time, total_nights, comment),
        )?;
        self.session = Some(session_id);
        Ok(SessionInfo {
            session_id,
            start_time,
            total_nights,
            comment: comment.to_owned(),
        })
    }

    fn write_fields(&mut self, fields: &[Field]) -> Result<(), StorageError> {
        let session = self.open_session()?;
        let store = HistoryStore::new(self.pool.pool());
        bridge("insert fields", store.insert_fields(session, fields))
    }

    fn write_downtime(&mut self, entries: &[DowntimeEntry]) -> Result<(), StorageError> {
        let session = self.open_session()?;
        let store = HistoryStore::new(self.pool.pool());
        bridge("insert downtime", store.insert_downtime(session, entries))
    }

    fn write_batch(&mut self, night: u32, batch: &NightBatch) -> Result<(), StorageError> {
        let session = self.open_session()?;
        let store = HistoryStore::new(self.pool.pool());
        bridge("insert night", store.insert_night(session, night, batch))?;
        debug!(session_id = %session, night, cycles = batch.len(), "Night persisted");
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), StorageError> {
        let session = self.open_session()?;
        let store = HistoryStore::new(self.pool.pool());
        bridge("end session", store.end_session(session))?;
        self.session = None;
        info!(session_id = %session, "Session closed");
        Ok(())
    }
}

/// Run a database future to completion from synchronous code.
fn bridge<T>(
    operation: &str,
    future: impl Future<Output = Result<T, DbError>>,
) -> Result<T, StorageError> {
    let handle = tokio::runtime::Handle::try_current().map_err(|e| StorageError::Backend {
        message: format!("no tokio runtime available for {operation}: {e}"),
    })?;

    tokio::task::block_in_place(|| handle.block_on(future)).map_err(|e| StorageError::Backend {
        message: format!("{operation} failed: {e}"),
    })
}
