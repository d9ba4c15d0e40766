use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::talent::StudentName;
use crate::constants::FIELD_TIMESTAMP;

/// The subset of Firestore's typed values this tool reads or writes; anything else is carried
/// through untouched as raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Other(serde_json::Value),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Integer(_) => "integer",
            FieldValue::Double(_) => "double",
            FieldValue::String(_) => "string",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Other(_) => "other",
        }
    }
}

/// A document as returned by a store read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// Resource name; the last path segment is the document id.
    pub name: String,
    pub fields: HashMap<String, FieldValue>,
}

#[cfg(test)]
impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, field: &str, value: FieldValue) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }
}

impl Document {
    pub fn id(&self) -> &str {
        self.name
            .rsplit_once('/')
            .map_or(self.name.as_str(), |(_, id)| id)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// A post or reply: read-only input to the scoring engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: String,
    pub author: StudentName,
    pub occurred_at: DateTime<Utc>,
}

impl SourceRecord {
    /// `author_field` differs between posts (`name`) and replies (`authorFullName`).
    pub fn from_document(
        doc: &Document,
        author_field: &'static str,
    ) -> Result<Self, MalformedRecord> {
        let malformed = |reason| MalformedRecord {
            document: doc.name.clone(),
            reason,
        };

        let author = match doc.get(author_field) {
            Some(FieldValue::String(s)) => StudentName::parse(s).map_err(malformed)?,
            Some(other) => {
                return Err(malformed(MalformedReason::WrongType {
                    field: author_field,
                    found: other.type_name(),
                }));
            }
            None => return Err(malformed(MalformedReason::MissingField(author_field))),
        };

        let occurred_at = match doc.get(FIELD_TIMESTAMP) {
            Some(FieldValue::Timestamp(ts)) => *ts,
            Some(other) => {
                return Err(malformed(MalformedReason::WrongType {
                    field: FIELD_TIMESTAMP,
                    found: other.type_name(),
                }));
            }
            None => return Err(malformed(MalformedReason::MissingField(FIELD_TIMESTAMP))),
        };

        Ok(Self {
            id: doc.id().to_string(),
            author,
            occurred_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("skipping malformed record {document}: {reason}")]
pub struct MalformedRecord {
    pub document: String,
    pub reason: MalformedReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has type {found}")]
    WrongType {
        field: &'static str,
        found: &'static str,
    },

    #[error("'{0}' is not usable as a student name")]
    InvalidName(String),
}
