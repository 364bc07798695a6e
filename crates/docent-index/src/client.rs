//! Remote index capability interface.
//!
//! The engine needs exactly four operations from a vector store: an exact
//! metadata filter query, a similarity search with an optional filter, a
//! batch insert, and a batch delete by id. Every [`IndexClient`] is bound
//! to a single collection at construction.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Payload stored next to each vector.
pub type Payload = HashMap<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum IndexClientError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("insert error: {0}")]
    Insert(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// `limit` for [`IndexClient::query_by_filter`] that returns every match.
pub const NO_LIMIT: u64 = u64::MAX;

/// Exact match of a string payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCondition {
    pub field: String,
    pub value: String,
}

/// Conjunction of exact-match conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldFilter {
    pub must: Vec<FieldCondition>,
}

impl FieldFilter {
    /// Match entries whose `file_path` equals `path`.
    #[must_use]
    pub fn file_path(path: impl Into<String>) -> Self {
        Self::default().and_text("file_path", path)
    }

    #[must_use]
    pub fn and_text(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.must.push(FieldCondition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Whether `payload` satisfies every condition.
    #[must_use]
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|cond| {
            payload
                .get(&cond.field)
                .is_some_and(|val| val.as_str() == Some(cond.value.as_str()))
        })
    }
}

/// An entry returned by a metadata filter query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub payload: Payload,
}

impl IndexEntry {
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.payload.get(field).and_then(serde_json::Value::as_f64)
    }
}

/// An entry returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// An entry to insert; the index assigns its id.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub vector: Vec<f32>,
    pub payload: Payload,
}

pub trait IndexClient: Send + Sync {
    /// Name of the collection this client reads and writes.
    fn collection(&self) -> &str;

    /// Create the collection if missing. Idempotent.
    fn ensure_collection(&self, vector_size: u64) -> BoxFuture<'_, Result<(), IndexClientError>>;

    /// Exact-match metadata query, no vector math. At most `limit` rows.
    fn query_by_filter(
        &self,
        filter: FieldFilter,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<IndexEntry>, IndexClientError>>;

    /// Top-`top_k` entries by descending similarity to `vector`.
    fn similarity_search(
        &self,
        vector: Vec<f32>,
        top_k: u64,
        filter: Option<FieldFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, IndexClientError>>;

    /// Insert entries in one batch, returning the assigned ids in input order.
    fn insert(&self, entries: Vec<NewEntry>)
    -> BoxFuture<'_, Result<Vec<String>, IndexClientError>>;

    /// Delete entries by id in one batch. An empty batch is a no-op.
    fn delete_by_ids(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), IndexClientError>>;
}
