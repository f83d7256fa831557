//! Session and history persistence.
//!
//! A night's [`NightBatch`] is written in a single transaction: every
//! stream is inserted with one `UNNEST` statement, and either the whole
//! night is committed or none of it is.

use chrono::{DateTime, Utc};
use socs_core::storage::NightBatch;
use socs_types::{DowntimeEntry, ExposureRecord, Field, ProposalHistoryRow, SessionId, SlewEndpoint};
use sqlx::{PgConnection, PgPool};

use crate::error::DbError;

/// Tables holding per-session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryTable {
    /// Field catalog.
    Field,
    /// Downtime calendar.
    Downtime,
    /// Targets received.
    TargetHistory,
    /// Observations made.
    ObservationHistory,
    /// Slews.
    SlewHistory,
    /// Slew activities.
    SlewActivities,
    /// Pose at both ends of each slew.
    SlewStates,
    /// Planned exposures.
    TargetExposures,
    /// Executed exposures.
    ObservationExposures,
    /// Proposal interest carried by targets.
    TargetProposalHistory,
    /// Proposal interest reported for observations.
    ObservationProposalHistory,
}

impl HistoryTable {
    /// Every history table.
    pub const ALL: [Self; 11] = [
        Self::Field,
        Self::Downtime,
        Self::TargetHistory,
        Self::ObservationHistory,
        Self::SlewHistory,
        Self::SlewActivities,
        Self::SlewStates,
        Self::TargetExposures,
        Self::ObservationExposures,
        Self::TargetProposalHistory,
        Self::ObservationProposalHistory,
    ];

    /// SQL table name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::Downtime => "downtime",
            Self::TargetHistory => "target_history",
            Self::ObservationHistory => "observation_history",
            Self::SlewHistory => "slew_history",
            Self::SlewActivities => "slew_activities",
            Self::SlewStates => "slew_states",
            Self::TargetExposures => "target_exposures",
            Self::ObservationExposures => "observation_exposures",
            Self::TargetProposalHistory => "target_proposal_history",
            Self::ObservationProposalHistory => "observation_proposal_history",
        }
    }
}

/// A row from the `observation_history` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ObservationRow {
    /// Observation identifier.
    pub observation_id: i64,
    /// Night index.
    pub night: i32,
    /// Target realized.
    pub target_id: i64,
    /// Filter band letter.
    pub filter: String,
    /// Post-slew visit start.
    pub observation_start_time: DateTime<Utc>,
    /// Visit duration in seconds.
    pub visit_time: f64,
    /// Airmass at visit start.
    pub airmass: f64,
    /// Cloud opacity.
    pub cloud: f64,
    /// Effective seeing in arcseconds.
    pub seeing_fwhm_effective: f64,
}

/// A row from the `session` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    /// Session identifier.
    pub session_id: i64,
    /// Survey start.
    pub start_time: DateTime<Utc>,
    /// Nights in the run.
    pub total_nights: i32,
    /// Run comment.
    pub comment: String,
    /// When the session was closed, if it has been.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Operations on the session and history tables.
pub struct HistoryStore<'a> {
    pool: &'a PgPool,
}

impl<'a> HistoryStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Insert a session row and return its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn create_session(
        &self,
        start_time: DateTime<Utc>,
        total_nights: u32,
        comment: &str,
    ) -> Result<SessionId, DbError> {
        let id: i64 = sqlx::query_scalar(
            r"INSERT INTO session (start_time, total_nights, comment)
              VALUES ($1, $2, $3)
              RETURNING session_id",
        )
        .bind(start_time)
        .bind(to_i32(total_nights))
        .bind(comment)
        .fetch_one(self.pool)
        .await?;

        tracing::info!(session_id = id, total_nights, "Session created");
        Ok(SessionId::new(id))
    }

    /// Stamp the session's end time.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn end_session(&self, session: SessionId) -> Result<(), DbError> {
        sqlx::query("UPDATE session SET ended_at = now() WHERE session_id = $1")
            .bind(session.into_inner())
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a session row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_session(&self, session: SessionId) -> Result<Option<SessionRow>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r"SELECT session_id, start_time, total_nights, comment, ended_at
              FROM session WHERE session_id = $1",
        )
        .bind(session.into_inner())
        .fetch_optional(self.pool)
        .await?;
        Ok(row)
    }

    // =========================================================================
    // Start-up records
    // =========================================================================

    /// Insert the field catalog. Fields already stored for the session are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn insert_fields(&self, session: SessionId, fields: &[Field]) -> Result<(), DbError> {
        if fields.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = fields.iter().map(|f| f.field_id.into_inner()).collect();
        let fov: Vec<f64> = fields.iter().map(|f| f.fov).collect();
        let ra: Vec<f64> = fields.iter().map(|f| f.ra).collect();
        let dec: Vec<f64> = fields.iter().map(|f| f.dec).collect();
        let gl: Vec<f64> = fields.iter().map(|f| f.gl).collect();
        let gb: Vec<f64> = fields.iter().map(|f| f.gb).collect();
        let el: Vec<f64> = fields.iter().map(|f| f.el).collect();
        let eb: Vec<f64> = fields.iter().map(|f| f.eb).collect();

        sqlx::query(
            r"INSERT INTO field (session_id, field_id, fov, ra, dec, gl, gb, el, eb)
              SELECT $1, * FROM UNNEST($2::BIGINT[], $3::FLOAT8[], $4::FLOAT8[], $5::FLOAT8[], $6::FLOAT8[], $7::FLOAT8[], $8::FLOAT8[], $9::FLOAT8[])
              ON CONFLICT (session_id, field_id) DO NOTHING",
        )
        .bind(session.into_inner())
        .bind(&ids)
        .bind(&fov)
        .bind(&ra)
        .bind(&dec)
        .bind(&gl)
        .bind(&gb)
        .bind(&el)
        .bind(&eb)
        .execute(self.pool)
        .await?;

        tracing::debug!(count = fields.len(), "Inserted field catalog (batch UNNEST)");
        Ok(())
    }

    /// Insert the downtime calendar.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails.
    pub async fn insert_downtime(
        &self,
        session: SessionId,
        entries: &[DowntimeEntry],
    ) -> Result<(), DbError> {
        if entries.is_empty() {
            return Ok(());
        }

        let nights: Vec<i32> = entries.iter().map(|e| to_i32(e.night)).collect();
        let durations: Vec<i32> = entries.iter().map(|e| to_i32(e.duration_days)).collect();
        let scheduled: Vec<bool> = entries.iter().map(|e| e.scheduled).collect();

        sqlx::query(
            r"INSERT INTO downtime (session_id, night, duration_days, scheduled)
              SELECT $1, * FROM UNNEST($2::INTEGER[], $3::INTEGER[], $4::BOOLEAN[])",
        )
        .bind(session.into_inner())
        .bind(&nights)
        .bind(&durations)
        .bind(&scheduled)
        .execute(self.pool)
        .await?;

        tracing::debug!(count = entries.len(), "Inserted downtime calendar");
        Ok(())
    }

    // =========================================================================
    // Nightly batch
    // =========================================================================

    /// Insert every stream of one night's batch in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if any insert fails (the night is
    /// rolled back), or [`DbError::Serialization`] if a filter list cannot
    /// be encoded.
    pub async fn insert_night(
        &self,
        session: SessionId,
        night: u32,
        batch: &NightBatch,
    ) -> Result<(), DbError> {
        if batch.is_empty() {
            tracing::debug!(night, "Empty night, nothing to insert");
            return Ok(());
        }

        let session = session.into_inner();
        let mut tx = self.pool.begin().await?;

        insert_targets(&mut tx, session, night, batch).await?;
        insert_observations(&mut tx, session, batch).await?;
        insert_slews(&mut tx, session, batch).await?;
        insert_slew_activities(&mut tx, session, batch).await?;
        insert_slew_states(&mut tx, session, batch).await?;
        insert_exposures(&mut tx, session, batch).await?;
        insert_proposal_history(&mut tx, session, batch).await?;

        tx.commit().await?;

        tracing::debug!(night, cycles = batch.len(), "Inserted night batch");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Count the rows a session has in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn count_rows(&self, session: SessionId, table: HistoryTable) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE session_id = $1", table.name());
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(session.into_inner())
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// A session's observations in id order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_observations(&self, session: SessionId) -> Result<Vec<ObservationRow>, DbError> {
        let rows = sqlx::query_as::<_, ObservationRow>(
            r"SELECT observation_id, night, target_id, filter, observation_start_time,
                     visit_time, airmass, cloud, seeing_fwhm_effective
              FROM observation_history
              WHERE session_id = $1
              ORDER BY observation_id",
        )
        .bind(session.into_inner())
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// History ids on one proposal stream, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn get_history_ids(
        &self,
        session: SessionId,
        table: HistoryTable,
    ) -> Result<Vec<i64>, DbError> {
        let sql = format!(
            "SELECT history_id FROM {} WHERE session_id = $1 ORDER BY history_id",
            table.name()
        );
        let ids: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(session.into_inner())
            .fetch_all(self.pool)
            .await?;
        Ok(ids)
    }
}

// =============================================================================
// Per-stream inserts
// =============================================================================

async fn insert_targets(
    conn: &mut PgConnection,
    session: i64,
    night: u32,
    batch: &NightBatch,
) -> Result<(), sqlx::Error> {
    let mut ids = Vec::with_capacity(batch.len());
    let mut fields = Vec::with_capacity(batch.len());
    let mut filters = Vec::with_capacity(batch.len());
    let mut ra = Vec::with_capacity(batch.len());
    let mut dec = Vec::with_capacity(batch.len());
    let mut angle = Vec::with_capacity(batch.len());
    let mut exposures = Vec::with_capacity(batch.len());

    for target in batch.targets() {
        ids.push(target.target_id.into_inner());
        fields.push(target.field_id.into_inner());
        filters.push(target.filter.as_str().to_owned());
        ra.push(target.ra);
        dec.push(target.dec);
        angle.push(target.angle);
        exposures.push(to_i32(target.num_exposures));
    }

    sqlx::query(
        r"INSERT INTO target_history (session_id, night, target_id, field_id, filter, ra, dec, angle, num_exposures)
          SELECT $1, $2, * FROM UNNEST($3::BIGINT[], $4::BIGINT[], $5::TEXT[], $6::FLOAT8[], $7::FLOAT8[], $8::FLOAT8[], $9::INTEGER[])",
    )
    .bind(session)
    .bind(to_i32(night))
    .bind(&ids)
    .bind(&fields)
    .bind(&filters)
    .bind(&ra)
    .bind(&dec)
    .bind(&angle)
    .bind(&exposures)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_observations(
    conn: &mut PgConnection,
    session: i64,
    batch: &NightBatch,
) -> Result<(), sqlx::Error> {
    let len = batch.len();
    let mut ids = Vec::with_capacity(len);
    let mut nights = Vec::with_capacity(len);
    let mut targets = Vec::with_capacity(len);
    let mut fields = Vec::with_capacity(len);
    let mut filters = Vec::with_capacity(len);
    let mut ra = Vec::with_capacity(len);
    let mut dec = Vec::with_capacity(len);
    let mut angle = Vec::with_capacity(len);
    let mut exposures = Vec::with_capacity(len);
    let mut starts = Vec::with_capacity(len);
    let mut visit = Vec::with_capacity(len);
    let mut airmass = Vec::with_capacity(len);
    let mut cloud = Vec::with_capacity(len);
    let mut fwhm_500 = Vec::with_capacity(len);
    let mut fwhm_geometric = Vec::with_capacity(len);
    let mut fwhm_effective = Vec::with_capacity(len);

    for obs in batch.observations() {
        ids.push(obs.observation_id.into_inner());
        nights.push(to_i32(obs.night));
        targets.push(obs.target_id.into_inner());
        fields.push(obs.field_id.into_inner());
        filters.push(obs.filter.as_str().to_owned());
        ra.push(obs.ra);
        dec.push(obs.dec);
        angle.push(obs.angle);
        exposures.push(to_i32(obs.num_exposures));
        starts.push(obs.observation_start_time);
        visit.push(obs.visit_time);
        airmass.push(obs.airmass);
        cloud.push(obs.cloud);
        fwhm_500.push(obs.seeing_fwhm_500);
        fwhm_geometric.push(obs.seeing_fwhm_geometric);
        fwhm_effective.push(obs.seeing_fwhm_effective);
    }

    sqlx::query(
        r"INSERT INTO observation_history
            (session_id, observation_id, night, target_id, field_id, filter, ra, dec, angle, num_exposures,
             observation_start_time, visit_time, airmass, cloud, seeing_fwhm_500, seeing_fwhm_geometric, seeing_fwhm_effective)
          SELECT $1, * FROM UNNEST($2::BIGINT[], $3::INTEGER[], $4::BIGINT[], $5::BIGINT[], $6::TEXT[], $7::FLOAT8[], $8::FLOAT8[],
                                   $9::FLOAT8[], $10::INTEGER[], $11::TIMESTAMPTZ[], $12::FLOAT8[], $13::FLOAT8[], $14::FLOAT8[],
                                   $15::FLOAT8[], $16::FLOAT8[], $17::FLOAT8[])",
    )
    .bind(session)
    .bind(&ids)
    .bind(&nights)
    .bind(&targets)
    .bind(&fields)
    .bind(&filters)
    .bind(&ra)
    .bind(&dec)
    .bind(&angle)
    .bind(&exposures)
    .bind(&starts)
    .bind(&visit)
    .bind(&airmass)
    .bind(&cloud)
    .bind(&fwhm_500)
    .bind(&fwhm_geometric)
    .bind(&fwhm_effective)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_slews(
    conn: &mut PgConnection,
    session: i64,
    batch: &NightBatch,
) -> Result<(), sqlx::Error> {
    let mut counts = Vec::with_capacity(batch.len());
    let mut observations = Vec::with_capacity(batch.len());
    let mut starts = Vec::with_capacity(batch.len());
    let mut ends = Vec::with_capacity(batch.len());
    let mut times = Vec::with_capacity(batch.len());
    let mut distances = Vec::with_capacity(batch.len());

    for slew in batch.slews() {
        counts.push(to_i64(slew.slew_count));
        observations.push(slew.observation_id.into_inner());
        starts.push(slew.slew_start);
        ends.push(slew.slew_end);
        times.push(slew.slew_time);
        distances.push(slew.slew_distance);
    }

    sqlx::query(
        r"INSERT INTO slew_history (session_id, slew_count, observation_id, slew_start, slew_end, slew_time, slew_distance)
          SELECT $1, * FROM UNNEST($2::BIGINT[], $3::BIGINT[], $4::TIMESTAMPTZ[], $5::TIMESTAMPTZ[], $6::FLOAT8[], $7::FLOAT8[])",
    )
    .bind(session)
    .bind(&counts)
    .bind(&observations)
    .bind(&starts)
    .bind(&ends)
    .bind(&times)
    .bind(&distances)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_slew_activities(
    conn: &mut PgConnection,
    session: i64,
    batch: &NightBatch,
) -> Result<(), sqlx::Error> {
    let mut counts = Vec::new();
    let mut names = Vec::new();
    let mut delays = Vec::new();
    let mut critical = Vec::new();

    for activity in batch.slew_activities() {
        counts.push(to_i64(activity.slew_count));
        names.push(activity.activity.clone());
        delays.push(activity.delay);
        critical.push(activity.in_critical_path);
    }
    if counts.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r"INSERT INTO slew_activities (session_id, slew_count, activity, delay, in_critical_path)
          SELECT $1, * FROM UNNEST($2::BIGINT[], $3::TEXT[], $4::FLOAT8[], $5::BOOLEAN[])",
    )
    .bind(session)
    .bind(&counts)
    .bind(&names)
    .bind(&delays)
    .bind(&critical)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_slew_states(
    conn: &mut PgConnection,
    session: i64,
    batch: &NightBatch,
) -> Result<(), DbError> {
    let mut counts = Vec::new();
    let mut endpoints = Vec::new();
    let mut times = Vec::new();
    let mut ra = Vec::new();
    let mut dec = Vec::new();
    let mut angle = Vec::new();
    let mut alt = Vec::new();
    let mut az = Vec::new();
    let mut filters = Vec::new();
    let mut tracking = Vec::new();
    let mut mounted = Vec::new();
    let mut unmounted = Vec::new();

    for record in batch.slew_states() {
        let state = &record.state;
        counts.push(to_i64(record.slew_count));
        endpoints.push(
            match record.endpoint {
                SlewEndpoint::Initial => "initial",
                SlewEndpoint::Final => "final",
            }
            .to_owned(),
        );
        times.push(state.timestamp);
        ra.push(state.ra);
        dec.push(state.dec);
        angle.push(state.angle);
        alt.push(state.alt);
        az.push(state.az);
        filters.push(state.filter.as_str().to_owned());
        tracking.push(state.tracking);
        mounted.push(serde_json::to_value(&state.mounted_filters)?);
        unmounted.push(serde_json::to_value(&state.unmounted_filters)?);
    }

    sqlx::query(
        r"INSERT INTO slew_states
            (session_id, slew_count, endpoint, state_time, ra, dec, angle, alt, az, filter, tracking, mounted_filters, unmounted_filters)
          SELECT $1, * FROM UNNEST($2::BIGINT[], $3::TEXT[], $4::TIMESTAMPTZ[], $5::FLOAT8[], $6::FLOAT8[], $7::FLOAT8[],
                                   $8::FLOAT8[], $9::FLOAT8[], $10::TEXT[], $11::BOOLEAN[], $12::JSONB[], $13::JSONB[])",
    )
    .bind(session)
    .bind(&counts)
    .bind(&endpoints)
    .bind(&times)
    .bind(&ra)
    .bind(&dec)
    .bind(&angle)
    .bind(&alt)
    .bind(&az)
    .bind(&filters)
    .bind(&tracking)
    .bind(&mounted)
    .bind(&unmounted)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_exposures(
    conn: &mut PgConnection,
    session: i64,
    batch: &NightBatch,
) -> Result<(), sqlx::Error> {
    let planned: Vec<&ExposureRecord> = batch
        .cycles()
        .iter()
        .flat_map(|c| &c.target_exposures)
        .collect();
    let executed: Vec<&ExposureRecord> = batch
        .cycles()
        .iter()
        .flat_map(|c| &c.observation_exposures)
        .collect();

    for (table, owner_column, rows) in [
        ("target_exposures", "target_id", planned),
        ("observation_exposures", "observation_id", executed),
    ] {
        if rows.is_empty() {
            continue;
        }
        let owners: Vec<i64> = rows.iter().map(|r| r.owner_id).collect();
        let numbers: Vec<i32> = rows.iter().map(|r| to_i32(r.exposure_num)).collect();
        let starts: Vec<DateTime<Utc>> = rows.iter().map(|r| r.exposure_start).collect();
        let times: Vec<f64> = rows.iter().map(|r| r.exposure_time).collect();

        let sql = format!(
            "INSERT INTO {table} (session_id, {owner_column}, exposure_num, exposure_start, exposure_time)
             SELECT $1, * FROM UNNEST($2::BIGINT[], $3::INTEGER[], $4::TIMESTAMPTZ[], $5::FLOAT8[])"
        );
        sqlx::query(&sql)
            .bind(session)
            .bind(&owners)
            .bind(&numbers)
            .bind(&starts)
            .bind(&times)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_proposal_history(
    conn: &mut PgConnection,
    session: i64,
    batch: &NightBatch,
) -> Result<(), sqlx::Error> {
    let target_rows: Vec<&ProposalHistoryRow> = batch
        .cycles()
        .iter()
        .flat_map(|c| &c.target_proposals)
        .collect();
    let observation_rows: Vec<&ProposalHistoryRow> = batch
        .cycles()
        .iter()
        .flat_map(|c| &c.observation_proposals)
        .collect();

    for (table, owner_column, rows) in [
        ("target_proposal_history", "target_id", target_rows),
        ("observation_proposal_history", "observation_id", observation_rows),
    ] {
        if rows.is_empty() {
            continue;
        }
        let ids: Vec<i64> = rows.iter().map(|r| to_i64(r.history_id)).collect();
        let owners: Vec<i64> = rows.iter().map(|r| r.owner_id).collect();
        let proposals: Vec<i64> = rows.iter().map(|r| r.proposal_id.into_inner()).collect();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
        let needs: Vec<f64> = rows.iter().map(|r| r.need).collect();
        let bonuses: Vec<f64> = rows.iter().map(|r| r.bonus).collect();
        let boosts: Vec<f64> = rows.iter().map(|r| r.boost).collect();

        let sql = format!(
            "INSERT INTO {table} (session_id, history_id, {owner_column}, proposal_id, value, need, bonus, boost)
             SELECT $1, * FROM UNNEST($2::BIGINT[], $3::BIGINT[], $4::BIGINT[], $5::FLOAT8[], $6::FLOAT8[], $7::FLOAT8[], $8::FLOAT8[])"
        );
        sqlx::query(&sql)
            .bind(session)
            .bind(&ids)
            .bind(&owners)
            .bind(&proposals)
            .bind(&values)
            .bind(&needs)
            .bind(&bonuses)
            .bind(&boosts)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_unique() {
        let mut names: Vec<&str> = HistoryTable::ALL.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), HistoryTable::ALL.len());
    }

    #[test]
    fn oversized_counters_saturate() {
        assert_eq!(to_i32(u32::MAX), i32::MAX);
        assert_eq!(to_i64(7), 7);
    }
}
