use thiserror::Error;

pub mod firestore;
#[cfg(test)]
pub mod memory;
pub mod models;
pub mod repositories;

pub mod prelude {
    pub use crate::db::StoreErr;
    pub use crate::db::firestore::FirestoreStore;
}

pub type StoreResult<T> = core::result::Result<T, StoreErr>;

#[derive(Debug, Error)]
pub enum StoreErr {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("store responded with {status}: {body}")]
    Status {
        status: http::StatusCode,
        body: String,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("batch of {len} writes exceeds the store limit of {limit}")]
    BatchTooLarge { len: usize, limit: usize },

    #[error("batch rejected by store: {0}")]
    Rejected(String),

    /// Only produced when a write set spans several batches; the first `applied` batches are
    /// durable and the rest were never sent.
    #[error("committed {applied} of {total} batches before failing: {source}")]
    PartialCommit {
        applied: usize,
        total: usize,
        #[source]
        source: Box<StoreErr>,
    },
}
