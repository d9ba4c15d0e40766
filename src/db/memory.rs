//! In-process [`DocumentStore`] used by the test suite.
//!
//! Batches are applied to a copy of the state and swapped in only once every write succeeded,
//! which mirrors the all-or-nothing behaviour of a real commit. Individual commits can be made to
//! fail on demand.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::constants::{FIELD_TIMESTAMP, QUESTIONS_COLLECTION, REPLIES_COLLECTION};
use crate::db::models::{Document, FieldValue, LedgerEntry, ScoreTotal, StudentName};
use crate::db::repositories::{DocumentStore, Write};
use crate::db::{StoreErr, StoreResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub totals: BTreeMap<StudentName, i64>,
    pub ledger: BTreeMap<String, LedgerEntry>,
    pub posts: Vec<Document>,
    /// Keyed by post id.
    pub replies: HashMap<String, Vec<Document>>,
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    batch_limit: usize,
    commits_seen: Mutex<usize>,
    rejected_commits: HashSet<usize>,
    fail_reads: bool,
    fail_reply_queries: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            batch_limit: crate::constants::FIRESTORE_MAX_BATCH_WRITES,
            commits_seen: Mutex::new(0),
            rejected_commits: HashSet::new(),
            fail_reads: false,
            fail_reply_queries: false,
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Rejects the `n`th commit call (zero-based).
    pub fn reject_commit(mut self, n: usize) -> Self {
        self.rejected_commits.insert(n);
        self
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Only `replies_since` fails; totals, ledger and post reads still succeed.
    pub fn failing_reply_queries(mut self) -> Self {
        self.fail_reply_queries = true;
        self
    }

    pub fn with_total(self, student: &str, total: i64) -> Self {
        self.lock().totals.insert(StudentName::from(student), total);
        self
    }

    pub fn with_ledger_entry(self, id: &str, entry: LedgerEntry) -> Self {
        self.lock().ledger.insert(id.to_string(), entry);
        self
    }

    pub fn with_post(self, id: &str, author: FieldValue, at: DateTime<Utc>) -> Self {
        let doc = Document::new(format!("{QUESTIONS_COLLECTION}/{id}"))
            .with_field(crate::constants::FIELD_POST_AUTHOR, author)
            .with_field(FIELD_TIMESTAMP, FieldValue::Timestamp(at));
        self.lock().posts.push(doc);
        self
    }

    pub fn with_reply(
        self,
        post_id: &str,
        id: &str,
        author: FieldValue,
        at: DateTime<Utc>,
    ) -> Self {
        let doc = Document::new(format!(
            "{QUESTIONS_COLLECTION}/{post_id}/{REPLIES_COLLECTION}/{id}"
        ))
        .with_field(crate::constants::FIELD_REPLY_AUTHOR, author)
        .with_field(FIELD_TIMESTAMP, FieldValue::Timestamp(at));
        self.lock()
            .replies
            .entry(post_id.to_string())
            .or_default()
            .push(doc);
        self
    }

    pub fn snapshot(&self) -> MemoryState {
        self.lock().clone()
    }

    pub fn commits_seen(&self) -> usize {
        *self.commits_seen.lock().unwrap()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads {
            return Err(StoreErr::Rejected("reads disabled".into()));
        }
        Ok(())
    }
}

fn since(docs: &[Document], cutoff: DateTime<Utc>) -> Vec<Document> {
    docs.iter()
        .filter(|d| {
            matches!(d.get(FIELD_TIMESTAMP), Some(FieldValue::Timestamp(ts)) if *ts >= cutoff)
        })
        .cloned()
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_totals(&self) -> StoreResult<Vec<ScoreTotal>> {
        self.check_reads()?;
        Ok(self
            .lock()
            .totals
            .iter()
            .map(|(student, total)| ScoreTotal {
                student: student.clone(),
                total_points: *total,
            })
            .collect())
    }

    async fn list_ledger_ids(&self) -> StoreResult<Vec<String>> {
        self.check_reads()?;
        Ok(self.lock().ledger.keys().cloned().collect())
    }

    async fn posts_since(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Document>> {
        self.check_reads()?;
        Ok(since(&self.lock().posts, cutoff))
    }

    async fn replies_since(
        &self,
        post: &Document,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Document>> {
        self.check_reads()?;
        if self.fail_reply_queries {
            return Err(StoreErr::Rejected("permission denied".into()));
        }

        let state = self.lock();
        Ok(state
            .replies
            .get(post.id())
            .map(|docs| since(docs, cutoff))
            .unwrap_or_default())
    }

    async fn commit(&self, writes: &[Write]) -> StoreResult<()> {
        let call = {
            let mut seen = self.commits_seen.lock().unwrap();
            let call = *seen;
            *seen += 1;
            call
        };

        if self.rejected_commits.contains(&call) {
            return Err(StoreErr::Rejected(format!("commit #{call} rejected")));
        }

        if writes.len() > self.batch_limit {
            return Err(StoreErr::BatchTooLarge {
                len: writes.len(),
                limit: self.batch_limit,
            });
        }

        let mut state = self.lock();
        let mut next = state.clone();
        for write in writes {
            match write {
                Write::SetTotal { student, total } => {
                    next.totals.insert(student.clone(), *total);
                }
                Write::InsertEntry { id, entry } => {
                    if next.ledger.insert(id.clone(), entry.clone()).is_some() {
                        return Err(StoreErr::Rejected(format!("ledger entry {id} exists")));
                    }
                }
                Write::DeleteEntry { id } => {
                    next.ledger.remove(id);
                }
            }
        }

        *state = next;
        Ok(())
    }

    fn max_batch_writes(&self) -> usize {
        self.batch_limit
    }
}
