//! Talent score aggregation.
//!
//! Every qualifying post or reply is worth exactly [`POINTS_PER_RECORD`] to its author and
//! produces exactly one ledger entry. Totals only ever contain students with at least one
//! entry; zeroing everyone else is the writer's job.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::db::models::{EntryKind, LedgerEntry, SourceRecord, StudentName};

pub mod cutoff;

/// Policy constant: one point per post or reply. Not a tunable.
pub const POINTS_PER_RECORD: i64 = 1;

/// Source records the store already filtered to `occurred_at >= cutoff`.
#[derive(Debug, Clone, Default)]
pub struct SourceRecords {
    pub posts: Vec<SourceRecord>,
    /// Keyed by post id.
    pub replies_by_post: BTreeMap<String, Vec<SourceRecord>>,
}

impl SourceRecords {
    pub fn record_count(&self) -> usize {
        self.posts.len() + self.replies_by_post.values().map(Vec::len).sum::<usize>()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recomputation {
    pub totals: BTreeMap<StudentName, i64>,
    pub entries: Vec<LedgerEntry>,
}

impl Recomputation {
    pub fn points_awarded(&self) -> i64 {
        self.totals.values().sum()
    }

    /// Highest total first, ties broken by name.
    pub fn leaderboard(&self) -> Vec<(&StudentName, i64)> {
        let mut rows: Vec<_> = self.totals.iter().map(|(s, t)| (s, *t)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }
}

#[instrument(
    skip(records),
    fields(posts = records.posts.len(), reply_threads = records.replies_by_post.len())
)]
pub fn recompute(cutoff: DateTime<Utc>, records: &SourceRecords) -> Recomputation {
    let mut out = Recomputation {
        totals: BTreeMap::new(),
        entries: Vec::with_capacity(records.record_count()),
    };

    let posts = records.posts.iter().map(|r| (r, EntryKind::Post));
    let replies = records
        .replies_by_post
        .values()
        .flatten()
        .map(|r| (r, EntryKind::Reply));

    let mut before_cutoff = 0usize;
    for (record, kind) in posts.chain(replies) {
        // the store is trusted to have filtered already; only flag it
        if record.occurred_at < cutoff {
            tracing::trace!(
                record = %record.id,
                occurred_at = %record.occurred_at,
                "before cutoff"
            );
            before_cutoff += 1;
        }

        *out.totals.entry(record.author.clone()).or_insert(0) += POINTS_PER_RECORD;
        out.entries.push(LedgerEntry {
            student: record.author.clone(),
            points: POINTS_PER_RECORD,
            kind,
            occurred_at: record.occurred_at,
        });
    }

    if before_cutoff > 0 {
        tracing::warn!(
            before_cutoff,
            %cutoff,
            "source records older than the cutoff were supplied and still counted"
        );
    }

    tracing::debug!(
        students = out.totals.len(),
        entries = out.entries.len(),
        "recomputed talent totals"
    );

    out
}
