//! Storage seam for simulation history.
//!
//! The driver accumulates everything produced during a night in a
//! [`NightBatch`] and hands it to the [`StorageSink`] in one call at the end
//! of the night. A [`CycleRecords`] value holds everything one accepted
//! exposure cycle produced, so a cycle is either fully in the batch or not
//! at all.
//!
//! [`MemorySink`] keeps every write in memory; it backs the test suite and
//! dry runs. The `PostgreSQL` sink lives in `socs-db`.

use chrono::{DateTime, Utc};
use socs_types::{
    DowntimeEntry, ExposureRecord, Field, Observation, ProposalHistoryRow, SessionId, SessionInfo,
    SlewActivity, SlewRecord, SlewState, Target,
};
use tracing::{debug, info};

/// Errors that can occur when writing history.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend rejected a write.
    #[error("storage backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// A write was attempted outside an open session.
    #[error("no storage session is open")]
    NoSession,
}

/// Everything one accepted exposure cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecords {
    /// The target as received from the scheduler.
    pub target: Target,
    /// The completed observation.
    pub observation: Observation,
    /// The slew that preceded it.
    pub slew: SlewRecord,
    /// Activities that made up the slew.
    pub slew_activities: Vec<SlewActivity>,
    /// Pose before and after the slew.
    pub slew_states: Vec<SlewState>,
    /// Planned exposures, tagged with the target id.
    pub target_exposures: Vec<ExposureRecord>,
    /// Executed exposures, tagged with the observation id.
    pub observation_exposures: Vec<ExposureRecord>,
    /// Proposal interest carried by the target.
    pub target_proposals: Vec<ProposalHistoryRow>,
    /// Proposal interest reported for the observation.
    pub observation_proposals: Vec<ProposalHistoryRow>,
}

/// Per-night buffer of accepted cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NightBatch {
    cycles: Vec<CycleRecords>,
}

impl NightBatch {
    /// Create an empty batch.
    pub const fn new() -> Self {
        Self { cycles: Vec::new() }
    }

    /// Append one cycle.
    pub fn push(&mut self, cycle: CycleRecords) {
        self.cycles.push(cycle);
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.cycles.clear();
    }

    /// Number of cycles buffered.
    pub const fn len(&self) -> usize {
        self.cycles.len()
    }

    /// Whether no cycle is buffered.
    pub const fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// The buffered cycles in acceptance order.
    pub fn cycles(&self) -> &[CycleRecords] {
        &self.cycles
    }

    /// Target rows.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.cycles.iter().map(|c| &c.target)
    }

    /// Observation rows.
    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.cycles.iter().map(|c| &c.observation)
    }

    /// Slew rows.
    pub fn slews(&self) -> impl Iterator<Item = &SlewRecord> {
        self.cycles.iter().map(|c| &c.slew)
    }

    /// Slew activity rows.
    pub fn slew_activities(&self) -> impl Iterator<Item = &SlewActivity> {
        self.cycles.iter().flat_map(|c| &c.slew_activities)
    }

    /// Slew endpoint poses.
    pub fn slew_states(&self) -> impl Iterator<Item = &SlewState> {
        self.cycles.iter().flat_map(|c| &c.slew_states)
    }

    /// Planned and executed exposure rows.
    pub fn exposures(&self) -> impl Iterator<Item = &ExposureRecord> {
        self.cycles
            .iter()
            .flat_map(|c| c.target_exposures.iter().chain(&c.observation_exposures))
    }

    /// Proposal history rows from both streams.
    pub fn proposal_history(&self) -> impl Iterator<Item = &ProposalHistoryRow> {
        self.cycles
            .iter()
            .flat_map(|c| c.target_proposals.iter().chain(&c.observation_proposals))
    }
}

/// Destination for simulation history.
///
/// Calls arrive in a fixed order: [`begin_session`], then field and
/// downtime writes, then one [`write_batch`] per night, then
/// [`end_session`].
///
/// [`begin_session`]: StorageSink::begin_session
/// [`write_batch`]: StorageSink::write_batch
/// [`end_session`]: StorageSink::end_session
pub trait StorageSink {
    /// Open a session and assign its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the session cannot be created.
    fn begin_session(
        &mut self,
        start_time: DateTime<Utc>,
        total_nights: u32,
        comment: &str,
    ) -> Result<SessionInfo, StorageError>;

    /// Persist the field catalog.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn write_fields(&mut self, fields: &[Field]) -> Result<(), StorageError>;

    /// Persist the downtime calendar.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn write_downtime(&mut self, entries: &[DowntimeEntry]) -> Result<(), StorageError>;

    /// Persist one night's records atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails; nothing from the batch
    /// is persisted in that case.
    fn write_batch(&mut self, night: u32, batch: &NightBatch) -> Result<(), StorageError>;

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the session cannot be closed.
    fn end_session(&mut self) -> Result<(), StorageError>;
}

/// In-memory storage sink.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// The open (or last) session.
    session: Option<SessionInfo>,
    /// Next session id to hand out.
    next_session: i64,
    /// Field catalog.
    fields: Vec<Field>,
    /// Downtime calendar.
    downtime: Vec<DowntimeEntry>,
    /// One entry per `write_batch` call.
    batches: Vec<(u32, NightBatch)>,
    /// Whether the session has been closed.
    ended: bool,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The session opened by the driver.
    pub const fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Stored field catalog.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Stored downtime calendar.
    pub fn downtime(&self) -> &[DowntimeEntry] {
        &self.downtime
    }

    /// Every flushed batch with its night index.
    pub fn batches(&self) -> &[(u32, NightBatch)] {
        &self.batches
    }

    /// Number of `write_batch` calls.
    pub const fn flush_count(&self) -> usize {
        self.batches.len()
    }

    /// All stored observations across nights.
    pub fn observations(&self) -> Vec<&Observation> {
        self.batches
            .iter()
            .flat_map(|(_, batch)| batch.observations())
            .collect()
    }

    /// All stored targets across nights.
    pub fn targets(&self) -> Vec<&Target> {
        self.batches
            .iter()
            .flat_map(|(_, batch)| batch.targets())
            .collect()
    }

    /// All stored proposal history rows across nights.
    pub fn proposal_history(&self) -> Vec<&ProposalHistoryRow> {
        self.batches
            .iter()
            .flat_map(|(_, batch)| batch.proposal_history())
            .collect()
    }

    /// Whether the session has been closed.
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    const fn require_session(&self) -> Result<(), StorageError> {
        if self.session.is_none() || self.ended {
            return Err(StorageError::NoSession);
        }
        Ok(())
    }
}

impl StorageSink for MemorySink {
    fn begin_session(
        &mut self,
        start_time: DateTime<Utc>,
        total_nights: u32,
        comment: &str,
    ) -> Result<SessionInfo, StorageError> {
        self.next_session = self.next_session.saturating_add(1);
        let info = SessionInfo {
            session_id: SessionId::new(self.next_session),
            start_time,
            total_nights,
            comment: comment.to_owned(),
        };
        info!(session_id = %info.session_id, "Memory session opened");
        self.session = Some(info.clone());
        self.ended = false;
        Ok(info)
    }

    fn write_fields(&mut self, fields: &[Field]) -> Result<(), StorageError> {
        self.require_session()?;
        self.fields.extend_from_slice(fields);
        Ok(())
    }

    fn write_downtime(&mut self, entries: &[DowntimeEntry]) -> Result<(), StorageError> {
        self.require_session()?;
        self.downtime.extend_from_slice(entries);
        Ok(())
    }

    fn write_batch(&mut self, night: u32, batch: &NightBatch) -> Result<(), StorageError> {
        self.require_session()?;
        debug!(night, cycles = batch.len(), "Memory batch stored");
        self.batches.push((night, batch.clone()));
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), StorageError> {
        self.require_session()?;
        self.ended = true;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_640_995_200, 0).unwrap()
    }

    #[test]
    fn writes_require_an_open_session() {
        let mut sink = MemorySink::new();
        assert!(matches!(
            sink.write_batch(1, &NightBatch::new()),
            Err(StorageError::NoSession)
        ));

        let info = sink.begin_session(start(), 3, "test").unwrap();
        assert_eq!(info.session_id, SessionId::new(1));
        sink.write_batch(1, &NightBatch::new()).unwrap();
        sink.end_session().unwrap();
        assert!(sink.is_ended());
        assert!(sink.write_downtime(&[]).is_err());
    }

    #[test]
    fn every_flush_is_recorded() {
        let mut sink = MemorySink::new();
        sink.begin_session(start(), 2, "").unwrap();
        sink.write_batch(1, &NightBatch::new()).unwrap();
        sink.write_batch(2, &NightBatch::new()).unwrap();
        assert_eq!(sink.flush_count(), 2);
        assert!(sink.observations().is_empty());
    }

    #[test]
    fn empty_batch_reports_empty() {
        let mut batch = NightBatch::new();
        assert!(batch.is_empty());
        batch.clear();
        assert_eq!(batch.len(), 0);
        assert_eq!(batch.exposures().count(), 0);
    }
}
