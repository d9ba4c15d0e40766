//! End-to-end talent recalculation: snapshot, scan, aggregate, write.
//!
//! The run is strictly sequential apart from the reply queries, which fan out with a bounded
//! concurrency. Nothing is retried; the first failure aborts the run and is reported with the
//! phase it happened in. Concurrent writers to the same collections are not guarded against.

use core::fmt;
use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use thiserror::Error;
use tracing::instrument;

use crate::constants::{FIELD_POST_AUTHOR, FIELD_REPLY_AUTHOR, LEADERBOARD_LOG_ROWS};
use crate::db::models::{Document, MalformedReason, SourceRecord, StudentName};
use crate::db::repositories::DocumentStore;
use crate::db::repositories::aggregate::{AggregateWriter, CommitSummary};
use crate::db::{StoreErr, StoreResult};
use crate::scoring::cutoff::{Clock, CutoffErr, todays_cutoff};
use crate::scoring::{self, SourceRecords};
use crate::util::env::{Env, EnvResult};

#[derive(Debug, Clone)]
pub struct RecalcOptions {
    pub cutoff_offset: FixedOffset,
    pub cutoff_hour: u32,
    /// Replaces the computed "today at `cutoff_hour`" cutoff.
    pub cutoff_override: Option<DateTime<Utc>>,
    /// Students that must end the run with an explicit total, even a zero one.
    pub roster: Vec<StudentName>,
    pub reply_query_concurrency: usize,
    pub dry_run: bool,
}

impl RecalcOptions {
    pub fn from_env(env: &Env) -> EnvResult<Self> {
        Ok(Self {
            cutoff_offset: env.cutoff_offset()?,
            cutoff_hour: env.cutoff_hour,
            cutoff_override: None,
            roster: Vec::new(),
            reply_query_concurrency: env.reply_query_concurrency,
            dry_run: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecalcReport {
    pub cutoff: DateTime<Utc>,
    pub students_reset: usize,
    pub ledger_entries_deleted: usize,
    pub totals: BTreeMap<StudentName, i64>,
    pub entries_written: usize,
    pub skipped_records: usize,
    pub batches_committed: usize,
    pub dry_run: bool,
}

struct Scan {
    records: SourceRecords,
    skipped: usize,
}

pub struct Recalculator<S, C> {
    store: S,
    clock: C,
    options: RecalcOptions,
}

impl<S: DocumentStore, C: Clock> Recalculator<S, C> {
    pub fn new(store: S, clock: C, options: RecalcOptions) -> Self {
        Self {
            store,
            clock,
            options,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cutoff(&self) -> RecalcResult<DateTime<Utc>> {
        match self.options.cutoff_override {
            Some(cutoff) => Ok(cutoff),
            None => Ok(todays_cutoff(
                &self.clock,
                self.options.cutoff_offset,
                self.options.cutoff_hour,
            )?),
        }
    }

    #[instrument(skip(self), fields(dry_run = self.options.dry_run))]
    pub async fn run(&self) -> RecalcResult<RecalcReport> {
        let cutoff = self.cutoff()?;
        tracing::info!(%cutoff, "starting talent recalculation");

        let writer = AggregateWriter::new(&self.store);

        let plan = writer
            .plan_reset(&self.options.roster)
            .await
            .map_err(in_phase(Phase::Clear))?;

        let scan = self.scan(cutoff).await.map_err(in_phase(Phase::Scan))?;
        if scan.skipped > 0 {
            tracing::warn!(skipped = scan.skipped, "malformed source records were skipped");
        }

        let recomputation = scoring::recompute(cutoff, &scan.records);

        let summary = match self.options.dry_run {
            true => {
                tracing::info!("dry run; nothing written");
                CommitSummary::default()
            }
            false => {
                let summary = writer
                    .replace(&plan, &recomputation)
                    .await
                    .map_err(in_phase(Phase::Write))?;
                tracing::info!(
                    writes = summary.writes,
                    batches = summary.batches,
                    points = recomputation.points_awarded(),
                    "write phase complete"
                );
                summary
            }
        };

        for (rank, (student, total)) in recomputation
            .leaderboard()
            .into_iter()
            .take(LEADERBOARD_LOG_ROWS)
            .enumerate()
        {
            tracing::info!(rank = rank + 1, %student, total, "leaderboard");
        }

        Ok(RecalcReport {
            cutoff,
            students_reset: plan.students.len(),
            ledger_entries_deleted: plan.ledger_ids.len(),
            entries_written: recomputation.entries.len(),
            totals: recomputation.totals,
            skipped_records: scan.skipped,
            batches_committed: summary.batches,
            dry_run: self.options.dry_run,
        })
    }

    #[instrument(skip(self))]
    async fn scan(&self, cutoff: DateTime<Utc>) -> StoreResult<Scan> {
        let posts = self.store.posts_since(cutoff).await?;
        tracing::debug!(posts = posts.len(), "fetched posts since cutoff");

        let mut skipped = 0usize;
        let mut records = SourceRecords::default();
        records.posts = parse_records(&posts, FIELD_POST_AUTHOR, &mut skipped);

        // a post with a bad author still has replies worth counting
        let replies: Vec<(String, Vec<Document>)> = stream::iter(posts.iter())
            .map(|post| async move {
                self.store
                    .replies_since(post, cutoff)
                    .await
                    .map(|replies| (post.id().to_string(), replies))
            })
            .buffer_unordered(self.options.reply_query_concurrency.max(1))
            .try_collect()
            .await?;

        for (post_id, docs) in replies {
            let parsed = parse_records(&docs, FIELD_REPLY_AUTHOR, &mut skipped);
            if !parsed.is_empty() {
                records.replies_by_post.insert(post_id, parsed);
            }
        }

        tracing::debug!(records = records.record_count(), skipped, "scan complete");
        Ok(Scan { records, skipped })
    }
}

fn parse_records(
    docs: &[Document],
    author_field: &'static str,
    skipped: &mut usize,
) -> Vec<SourceRecord> {
    docs.iter()
        .filter_map(|doc| match SourceRecord::from_document(doc, author_field) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    document = %e.document,
                    reason = %e.reason,
                    "skipping malformed record"
                );
                *skipped += 1;
                None
            }
        })
        .collect()
}

/// One name per line. Blank lines and `#` comments are ignored, duplicates collapse.
pub fn parse_roster(contents: &str) -> Result<Vec<StudentName>, MalformedReason> {
    let mut roster = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(StudentName::parse)
        .collect::<Result<Vec<_>, _>>()?;

    roster.sort();
    roster.dedup();
    Ok(roster)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Clear,
    Scan,
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Clear => "clear",
            Phase::Scan => "scan",
            Phase::Write => "write",
        })
    }
}

fn in_phase(phase: Phase) -> impl FnOnce(StoreErr) -> RecalcErr {
    move |source| RecalcErr::Phase { phase, source }
}

pub type RecalcResult<T> = core::result::Result<T, RecalcErr>;

#[derive(Debug, Error)]
pub enum RecalcErr {
    #[error("{phase} phase failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: StoreErr,
    },

    #[error(transparent)]
    Cutoff(#[from] CutoffErr),
}
