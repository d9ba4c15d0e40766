use core::fmt;

use chrono::{DateTime, Utc};

use super::source::MalformedReason;

/// A student's full display name. Doubles as the document id of their `talents` record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StudentName(pub String);

impl StudentName {
    /// Accepts any name that can be used verbatim as a Firestore document id.
    pub fn parse(raw: &str) -> Result<Self, MalformedReason> {
        let invalid = raw.trim().is_empty()
            || raw.contains('/')
            || raw == "."
            || raw == ".."
            || (raw.len() >= 4 && raw.starts_with("__") && raw.ends_with("__"));

        if invalid {
            return Err(MalformedReason::InvalidName(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StudentName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Base `talents` document model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTotal {
    pub student: StudentName,
    pub total_points: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    Post,
    Reply,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Post => "post",
            EntryKind::Reply => "reply",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable point award, written to `talentTransactions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub student: StudentName,
    pub points: i64,
    pub kind: EntryKind,
    pub occurred_at: DateTime<Utc>,
}
