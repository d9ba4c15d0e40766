//! Firestore REST typed-value encoding.
//!
//! Values travel as single-key objects, e.g. `{"integerValue": "3"}` (64-bit integers are sent
//! as strings) or `{"timestampValue": "2024-03-04T16:00:00Z"}`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::db::models::{Document, FieldValue};

#[derive(Debug, Deserialize)]
pub struct RawDocument {
    pub name: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default)]
    pub documents: Vec<RawDocument>,
    pub next_page_token: Option<String>,
}

/// One element of a `runQuery` response stream. Elements that only carry progress information
/// (`readTime`, `skippedResults`) have no document.
#[derive(Debug, Deserialize)]
pub struct QueryResponseItem {
    pub document: Option<RawDocument>,
}

impl From<RawDocument> for Document {
    fn from(raw: RawDocument) -> Self {
        Document {
            name: raw.name,
            fields: raw
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect(),
        }
    }
}

pub fn decode_value(raw: &Value) -> FieldValue {
    let Some((kind, inner)) = raw.as_object().and_then(|o| o.iter().next()) else {
        return FieldValue::Other(raw.clone());
    };

    let decoded = match kind.as_str() {
        "nullValue" => Some(FieldValue::Null),
        "booleanValue" => inner.as_bool().map(FieldValue::Boolean),
        "integerValue" => match inner {
            Value::String(s) => s.parse().ok(),
            other => other.as_i64(),
        }
        .map(FieldValue::Integer),
        "doubleValue" => inner.as_f64().map(FieldValue::Double),
        "stringValue" => inner.as_str().map(|s| FieldValue::String(s.to_string())),
        "timestampValue" => inner
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc))),
        _ => None,
    };

    decoded.unwrap_or_else(|| FieldValue::Other(raw.clone()))
}

pub fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => json!({ "nullValue": null }),
        FieldValue::Boolean(b) => json!({ "booleanValue": b }),
        FieldValue::Integer(n) => json!({ "integerValue": n.to_string() }),
        FieldValue::Double(d) => json!({ "doubleValue": d }),
        FieldValue::String(s) => json!({ "stringValue": s }),
        FieldValue::Timestamp(ts) => json!({ "timestampValue": encode_timestamp(ts) }),
        FieldValue::Other(raw) => raw.clone(),
    }
}

pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn encode_fields(fields: &[(&str, FieldValue)]) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), encode_value(v)))
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_decode_known_values() {
        assert_eq!(decode_value(&json!({ "integerValue": "42" })), FieldValue::Integer(42));
        assert_eq!(decode_value(&json!({ "integerValue": 7 })), FieldValue::Integer(7));
        assert_eq!(
            decode_value(&json!({ "stringValue": "Ada" })),
            FieldValue::String("Ada".into())
        );
        assert_eq!(decode_value(&json!({ "nullValue": null })), FieldValue::Null);
        assert_eq!(
            decode_value(&json!({ "timestampValue": "2024-03-04T16:00:00.123456Z" })),
            FieldValue::Timestamp(
                Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap()
                    + chrono::Duration::microseconds(123_456)
            )
        );
    }

    #[test]
    fn test_decode_unknown_kept_raw() {
        let map = json!({ "mapValue": { "fields": {} } });
        assert_eq!(decode_value(&map), FieldValue::Other(map.clone()));

        let bad_int = json!({ "integerValue": "lots" });
        assert_eq!(decode_value(&bad_int), FieldValue::Other(bad_int.clone()));
    }

    #[test]
    fn test_encode_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap();
        let fields = encode_fields(&[
            ("points", FieldValue::Integer(1)),
            ("timestamp", FieldValue::Timestamp(ts)),
        ]);

        assert_eq!(
            fields,
            json!({
                "points": { "integerValue": "1" },
                "timestamp": { "timestampValue": "2024-03-04T16:00:00.000000Z" },
            })
        );
    }

    #[test]
    fn test_raw_document_conversion() {
        let raw: RawDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/talents/Ada Lovelace",
            "fields": { "totalPoints": { "integerValue": "3" } },
            "createTime": "2024-03-04T16:00:00Z",
        }))
        .unwrap();

        let doc = Document::from(raw);
        assert_eq!(doc.id(), "Ada Lovelace");
        assert_eq!(doc.get("totalPoints"), Some(&FieldValue::Integer(3)));
    }
}
