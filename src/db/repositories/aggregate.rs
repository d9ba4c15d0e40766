use std::collections::{BTreeMap, BTreeSet};

use tracing::instrument;
use uuid::Uuid;

use crate::db::models::{LedgerEntry, StudentName};
use crate::db::repositories::{DocumentStore, Write};
use crate::db::{StoreErr, StoreResult};
use crate::scoring::Recomputation;

/// What a reset has to undo: every student whose total gets zeroed and every ledger entry that
/// gets deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetPlan {
    pub students: BTreeSet<StudentName>,
    pub ledger_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub writes: usize,
    pub batches: usize,
}

/// Persists talent totals and the ledger through atomic store batches.
///
/// Write sets larger than [`DocumentStore::max_batch_writes`] are split into several batches that
/// are committed in order. Each batch is atomic on its own, but if a later batch fails the earlier
/// ones stay applied and the caller gets [`StoreErr::PartialCommit`].
pub struct AggregateWriter<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: DocumentStore + ?Sized> AggregateWriter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Reads the current set of totals and ledger ids. `roster` adds students that must end up
    /// with an explicit total even if they have no record yet.
    #[instrument(skip(self, roster), fields(roster = roster.len()))]
    pub async fn plan_reset(&self, roster: &[StudentName]) -> StoreResult<ResetPlan> {
        let totals = self.store.list_totals().await?;
        let points_before: i64 = totals.iter().map(|t| t.total_points).sum();

        let mut students: BTreeSet<StudentName> =
            totals.into_iter().map(|t| t.student).collect();
        let existing = students.len();
        students.extend(roster.iter().cloned());

        let ledger_ids = self.store.list_ledger_ids().await?;

        tracing::debug!(
            existing_totals = existing,
            roster_only = students.len() - existing,
            ledger_entries = ledger_ids.len(),
            points_before,
            "planned reset"
        );

        Ok(ResetPlan {
            students,
            ledger_ids,
        })
    }

    // Standalone phases. The pipeline uses `replace`, which builds the same writes in one set.

    #[allow(dead_code)]
    #[instrument(skip(self, students), fields(students = students.len()))]
    pub async fn reset(&self, students: &[StudentName]) -> StoreResult<CommitSummary> {
        self.apply(zero_writes(students).collect()).await
    }

    #[allow(dead_code)]
    #[instrument(skip(self, ids), fields(entries = ids.len()))]
    pub async fn clear_ledger(&self, ids: &[String]) -> StoreResult<CommitSummary> {
        self.apply(delete_writes(ids).collect()).await
    }

    #[allow(dead_code)]
    #[instrument(
        skip(self, totals, entries),
        fields(totals = totals.len(), entries = entries.len())
    )]
    pub async fn commit(
        &self,
        totals: &BTreeMap<StudentName, i64>,
        entries: &[LedgerEntry],
    ) -> StoreResult<CommitSummary> {
        let writes = total_writes(totals).chain(insert_writes(entries)).collect();
        self.apply(writes).await
    }

    /// Reset, clear and commit folded into one write set, so that a run which fits in a single
    /// batch is all-or-nothing.
    #[instrument(skip(self, plan, recomputation))]
    pub async fn replace(
        &self,
        plan: &ResetPlan,
        recomputation: &Recomputation,
    ) -> StoreResult<CommitSummary> {
        self.apply(net_writes(plan, recomputation)).await
    }

    async fn apply(&self, writes: Vec<Write>) -> StoreResult<CommitSummary> {
        if writes.is_empty() {
            tracing::debug!("nothing to write");
            return Ok(CommitSummary::default());
        }

        let limit = self.store.max_batch_writes().max(1);
        let total = writes.len().div_ceil(limit);

        if total > 1 {
            tracing::warn!(
                writes = writes.len(),
                limit,
                batches = total,
                "write set exceeds a single batch; \
                 a late failure will leave earlier batches applied"
            );
        }

        for (idx, chunk) in writes.chunks(limit).enumerate() {
            if let Err(e) = self.store.commit(chunk).await {
                tracing::error!(
                    error = ?e,
                    batch = idx + 1,
                    batches = total,
                    "batch commit failed"
                );
                return Err(match idx {
                    0 => e,
                    applied => StoreErr::PartialCommit {
                        applied,
                        total,
                        source: Box::new(e),
                    },
                });
            }

            tracing::debug!(
                batch = idx + 1,
                batches = total,
                writes = chunk.len(),
                "batch committed"
            );
        }

        Ok(CommitSummary {
            writes: writes.len(),
            batches: total,
        })
    }
}

/// Totals first (recomputed students, then zeroed ones), then ledger deletions, then new
/// entries. Every student appears at most once.
pub fn net_writes(plan: &ResetPlan, recomputation: &Recomputation) -> Vec<Write> {
    let zeroed: Vec<StudentName> = plan
        .students
        .iter()
        .filter(|student| !recomputation.totals.contains_key(*student))
        .cloned()
        .collect();

    total_writes(&recomputation.totals)
        .chain(zero_writes(&zeroed))
        .chain(delete_writes(&plan.ledger_ids))
        .chain(insert_writes(&recomputation.entries))
        .collect()
}

fn total_writes(totals: &BTreeMap<StudentName, i64>) -> impl Iterator<Item = Write> + '_ {
    totals.iter().map(|(student, total)| Write::SetTotal {
        student: student.clone(),
        total: *total,
    })
}

fn zero_writes(students: &[StudentName]) -> impl Iterator<Item = Write> + '_ {
    students.iter().map(|student| Write::SetTotal {
        student: student.clone(),
        total: 0,
    })
}

fn delete_writes(ids: &[String]) -> impl Iterator<Item = Write> + '_ {
    ids.iter().map(|id| Write::DeleteEntry { id: id.clone() })
}

fn insert_writes(entries: &[LedgerEntry]) -> impl Iterator<Item = Write> + '_ {
    entries.iter().map(|entry| Write::InsertEntry {
        id: Uuid::new_v4().simple().to_string(),
        entry: entry.clone(),
    })
}
