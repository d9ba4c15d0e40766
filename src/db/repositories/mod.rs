use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::constants::FIRESTORE_MAX_BATCH_WRITES;
use crate::db::StoreResult;
use crate::db::models::{Document, LedgerEntry, ScoreTotal, StudentName};

pub mod aggregate;

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Upserts `talents/{student}.totalPoints`, leaving any other field on the document alone.
    SetTotal { student: StudentName, total: i64 },
    /// Creates `talentTransactions/{id}`; fails the batch if the id is already taken.
    InsertEntry { id: String, entry: LedgerEntry },
    DeleteEntry { id: String },
}

/// Everything the recalculation needs from the hosted document store.
///
/// Reads are plain queries. `commit` must apply every write or none of them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every `talents` record, whatever its current value.
    async fn list_totals(&self) -> StoreResult<Vec<ScoreTotal>>;

    /// Ids of every `talentTransactions` record.
    async fn list_ledger_ids(&self) -> StoreResult<Vec<String>>;

    /// Posts with `timestamp >= cutoff`.
    async fn posts_since(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Document>>;

    /// Replies under `post` with `timestamp >= cutoff`.
    async fn replies_since(
        &self,
        post: &Document,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Document>>;

    async fn commit(&self, writes: &[Write]) -> StoreResult<()>;

    fn max_batch_writes(&self) -> usize {
        FIRESTORE_MAX_BATCH_WRITES
    }
}
