use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::instrument;

use crate::constants::{
    FIELD_LEDGER_KIND, FIELD_LEDGER_POINTS, FIELD_LEDGER_STUDENT, FIELD_TIMESTAMP,
    FIELD_TOTAL_POINTS, FIRESTORE_LIST_PAGE_SIZE, QUESTIONS_COLLECTION, REPLIES_COLLECTION,
    TALENTS_COLLECTION, TRANSACTIONS_COLLECTION,
};
use crate::db::models::{Document, FieldValue, ScoreTotal, StudentName};
use crate::db::repositories::{DocumentStore, Write};
use crate::db::{StoreErr, StoreResult};
use crate::util::env::Env;

pub mod codec;

use codec::{ListResponse, QueryResponseItem, encode_fields, encode_timestamp};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct FirestoreConfig {
    pub base_url: String,
    pub project_id: String,
    pub database_id: String,
    pub collection_root: String,
    pub access_token: Option<String>,
}

impl From<&Env> for FirestoreConfig {
    fn from(env: &Env) -> Self {
        Self {
            base_url: env.firestore_base_url.clone(),
            project_id: env.firestore_project_id.clone(),
            database_id: env.firestore_database_id.clone(),
            collection_root: env.collection_root.clone(),
            access_token: env.firestore_access_token.clone(),
        }
    }
}

/// [`DocumentStore`] over the Firestore v1 REST API.
pub struct FirestoreStore {
    client: reqwest::Client,
    base_url: String,
    /// `projects/{p}/databases/{d}/documents`
    documents: String,
    /// `documents` plus the deployment's collection root, if any
    scoped: String,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig) -> StoreResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.access_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        } else {
            tracing::warn!("no access token configured; requests will be unauthenticated");
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let documents = format!(
            "projects/{}/databases/{}/documents",
            config.project_id, config.database_id
        );
        let root = config.collection_root.trim_matches('/');
        let scoped = match root.is_empty() {
            true => documents.clone(),
            false => format!("{documents}/{root}"),
        };

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            documents,
            scoped,
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    fn collection(&self, collection: &str) -> String {
        format!("{}/{}", self.scoped, collection)
    }

    fn talent_name(&self, student: &StudentName) -> String {
        format!("{}/{}", self.collection(TALENTS_COLLECTION), student)
    }

    fn ledger_name(&self, id: &str) -> String {
        format!("{}/{}", self.collection(TRANSACTIONS_COLLECTION), id)
    }

    /// Checks the status of a response and parses its body as `T`, keeping the error body around
    /// for non-2xx responses.
    async fn parse<T: DeserializeOwned>(res: reqwest::Response) -> StoreResult<T> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(code = %status, body = %body, "non-2xx response from firestore");
            return Err(StoreErr::Status { status, body });
        }

        let bytes = res.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fetches every document in a collection, following page tokens until exhausted.
    #[instrument(skip(self))]
    async fn list_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let uri = self.url(&self.collection(collection));
        let page_size = FIRESTORE_LIST_PAGE_SIZE.to_string();

        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.client.get(&uri).query(&[("pageSize", page_size.as_str())]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }

            let page: ListResponse = Self::parse(req.send().await?).await?;
            documents.extend(page.documents.into_iter().map(Document::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(count = documents.len(), "listed collection");
        Ok(documents)
    }

    /// `timestamp >= cutoff` over `collection_id` directly beneath `parent`.
    #[instrument(skip(self))]
    async fn query_since(
        &self,
        parent: &str,
        collection_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Document>> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection_id }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": FIELD_TIMESTAMP },
                        "op": "GREATER_THAN_OR_EQUAL",
                        "value": { "timestampValue": encode_timestamp(&cutoff) },
                    }
                },
            }
        });

        let res = self
            .client
            .post(self.url(&format!("{parent}:runQuery")))
            .json(&body)
            .send()
            .await?;

        let items: Vec<QueryResponseItem> = Self::parse(res).await?;
        let documents: Vec<Document> = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(Document::from)
            .collect();

        tracing::debug!(count = documents.len(), "query returned documents");
        Ok(documents)
    }

    pub fn encode_write(&self, write: &Write) -> Value {
        match write {
            Write::SetTotal { student, total } => json!({
                "update": {
                    "name": self.talent_name(student),
                    "fields": encode_fields(&[(FIELD_TOTAL_POINTS, FieldValue::Integer(*total))]),
                },
                "updateMask": { "fieldPaths": [FIELD_TOTAL_POINTS] },
            }),
            Write::InsertEntry { id, entry } => json!({
                "update": {
                    "name": self.ledger_name(id),
                    "fields": encode_fields(&[
                        (FIELD_LEDGER_STUDENT, FieldValue::String(entry.student.to_string())),
                        (FIELD_LEDGER_POINTS, FieldValue::Integer(entry.points)),
                        (FIELD_LEDGER_KIND, FieldValue::String(entry.kind.to_string())),
                        (FIELD_TIMESTAMP, FieldValue::Timestamp(entry.occurred_at)),
                    ]),
                },
                "currentDocument": { "exists": false },
            }),
            Write::DeleteEntry { id } => json!({ "delete": self.ledger_name(id) }),
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    #[instrument(skip(self))]
    async fn list_totals(&self) -> StoreResult<Vec<ScoreTotal>> {
        let documents = self.list_all(TALENTS_COLLECTION).await?;

        Ok(documents
            .into_iter()
            .map(|doc| {
                let total_points = match doc.get(FIELD_TOTAL_POINTS) {
                    Some(FieldValue::Integer(n)) => *n,
                    other => {
                        tracing::warn!(
                            document = %doc.name,
                            value = ?other,
                            "talent record without an integer total"
                        );
                        0
                    }
                };

                ScoreTotal {
                    student: StudentName(doc.id().to_string()),
                    total_points,
                }
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_ledger_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .list_all(TRANSACTIONS_COLLECTION)
            .await?
            .iter()
            .map(|doc| doc.id().to_string())
            .collect())
    }

    async fn posts_since(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Document>> {
        self.query_since(&self.scoped, QUESTIONS_COLLECTION, cutoff)
            .await
    }

    async fn replies_since(
        &self,
        post: &Document,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Document>> {
        // documents read back from the API already carry their full resource name
        let parent = match post.name.starts_with("projects/") {
            true => post.name.clone(),
            false => self.collection(&format!("{QUESTIONS_COLLECTION}/{}", post.id())),
        };

        self.query_since(&parent, REPLIES_COLLECTION, cutoff).await
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn commit(&self, writes: &[Write]) -> StoreResult<()> {
        let limit = self.max_batch_writes();
        if writes.len() > limit {
            return Err(StoreErr::BatchTooLarge {
                len: writes.len(),
                limit,
            });
        }

        let body = json!({
            "writes": writes.iter().map(|w| self.encode_write(w)).collect::<Vec<_>>(),
        });

        let res = self
            .client
            .post(self.url(&format!("{}:commit", self.documents)))
            .json(&body)
            .send()
            .await?;

        let _: Value = Self::parse(res).await?;
        Ok(())
    }
}
