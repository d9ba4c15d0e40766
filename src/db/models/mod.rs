pub mod source;
pub mod talent;

pub use source::{Document, FieldValue, MalformedReason, MalformedRecord, SourceRecord};
pub use talent::{EntryKind, LedgerEntry, ScoreTotal, StudentName};
