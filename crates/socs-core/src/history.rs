//! Proposal history aggregation.
//!
//! Scheduler interest arrives as a list of [`ProposalInterest`] entries,
//! either attached to a target or reported for a completed observation.
//! [`HistoryAggregator::record`] normalizes each entry into a
//! [`ProposalHistoryRow`] stamped with the next counter value for its
//! stream.
//!
//! The target and observation streams keep separate counters. Both start
//! at 1, increase by one per row, and are never reset for the lifetime of
//! the run (in particular not between nights), so a history id is never
//! reused.

use socs_types::{HistoryKind, ProposalHistoryRow, ProposalInterest};
use tracing::{Span, trace};

/// Issues run-wide history ids and builds proposal history rows.
#[derive(Debug, Clone)]
pub struct HistoryAggregator {
    span: Span,
    /// Last id issued on the target stream (0 = none yet).
    target_issued: u64,
    /// Last id issued on the observation stream (0 = none yet).
    observation_issued: u64,
}

impl HistoryAggregator {
    /// Create an aggregator logging under `span`.
    pub const fn new(span: Span) -> Self {
        Self {
            span,
            target_issued: 0,
            observation_issued: 0,
        }
    }

    /// Build one row per entry, owned by `owner_id` on the `kind` stream.
    pub fn record(
        &mut self,
        kind: HistoryKind,
        owner_id: i64,
        entries: &[ProposalInterest],
    ) -> Vec<ProposalHistoryRow> {
        let _entered = self.span.enter();
        let counter = match kind {
            HistoryKind::Target => &mut self.target_issued,
            HistoryKind::Observation => &mut self.observation_issued,
        };

        let rows: Vec<ProposalHistoryRow> = entries
            .iter()
            .map(|entry| {
                *counter = counter.saturating_add(1);
                ProposalHistoryRow {
                    history_id: *counter,
                    kind,
                    proposal_id: entry.proposal_id,
                    value: entry.value,
                    need: entry.need,
                    bonus: entry.bonus,
                    boost: entry.boost,
                    owner_id,
                }
            })
            .collect();

        trace!(kind = kind.as_str(), owner_id, rows = rows.len(), "Proposal history recorded");
        rows
    }

    /// Last id issued on a stream (0 when nothing has been recorded).
    pub const fn issued(&self, kind: HistoryKind) -> u64 {
        match kind {
            HistoryKind::Target => self.target_issued,
            HistoryKind::Observation => self.observation_issued,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use socs_types::ProposalId;

    use super::*;

    fn interest(proposal: i64) -> ProposalInterest {
        ProposalInterest {
            proposal_id: ProposalId::new(proposal),
            value: 1.5,
            need: 0.25,
            bonus: 0.0,
            boost: 1.0,
        }
    }

    fn ids(rows: &[ProposalHistoryRow]) -> Vec<u64> {
        rows.iter().map(|r| r.history_id).collect()
    }

    #[test]
    fn one_row_per_entry() {
        let mut agg = HistoryAggregator::new(Span::none());
        let rows = agg.record(HistoryKind::Target, 42, &[interest(1), interest(3)]);
        assert_eq!(ids(&rows), vec![1, 2]);
        assert!(rows.iter().all(|r| r.owner_id == 42 && r.kind == HistoryKind::Target));
        assert_eq!(rows.get(1).unwrap().proposal_id, ProposalId::new(3));
    }

    #[test]
    fn streams_count_independently() {
        let mut agg = HistoryAggregator::new(Span::none());
        agg.record(HistoryKind::Target, 1, &[interest(1), interest(2)]);
        let obs = agg.record(HistoryKind::Observation, 1, &[interest(1)]);
        assert_eq!(ids(&obs), vec![1]);
        assert_eq!(agg.issued(HistoryKind::Target), 2);
        assert_eq!(agg.issued(HistoryKind::Observation), 1);
    }

    #[test]
    fn counters_strictly_increase_across_calls() {
        let mut agg = HistoryAggregator::new(Span::none());
        let first = agg.record(HistoryKind::Observation, 1, &[interest(1), interest(2)]);
        let second = agg.record(HistoryKind::Observation, 2, &[interest(1)]);
        let third = agg.record(HistoryKind::Observation, 3, &[interest(5), interest(6)]);
        let all: Vec<u64> = [first, second, third].iter().flat_map(|r| ids(r)).collect();
        assert_eq!(all, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_entries_issue_nothing() {
        let mut agg = HistoryAggregator::new(Span::none());
        assert!(agg.record(HistoryKind::Target, 9, &[]).is_empty());
        assert_eq!(agg.issued(HistoryKind::Target), 0);
    }
}
