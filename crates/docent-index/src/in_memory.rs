//! In-process [`IndexClient`] for tests and dry runs.

use std::collections::HashSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::client::{
    BoxFuture, FieldFilter, IndexClient, IndexClientError, IndexEntry, NewEntry, Payload,
    ScoredEntry,
};

struct StoredEntry {
    id: String,
    vector: Vec<f32>,
    payload: Payload,
}

/// Entries are kept in insertion order, which is also the order of
/// filter query results.
pub struct InMemoryIndex {
    collection: String,
    entries: RwLock<Vec<StoredEntry>>,
    vector_size: RwLock<Option<u64>>,
    failing_queries: RwLock<HashSet<String>>,
    fail_writes: AtomicBool,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            entries: RwLock::new(Vec::new()),
            vector_size: RwLock::new(None),
            failing_queries: RwLock::new(HashSet::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make filter queries on `file_path` fail until cleared.
    pub fn fail_queries_for(&self, file_path: impl Into<String>) {
        if let Ok(mut set) = self.failing_queries.write() {
            set.insert(file_path.into());
        }
    }

    /// Make every insert and delete fail while set.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every stored entry for `file_path`.
    #[must_use]
    pub fn ids_for(&self, file_path: &str) -> Vec<String> {
        let filter = FieldFilter::file_path(file_path);
        self.entries.read().map_or_else(
            |_| Vec::new(),
            |entries| {
                entries
                    .iter()
                    .filter(|e| filter.matches(&e.payload))
                    .map(|e| e.id.clone())
                    .collect()
            },
        )
    }

    fn check_writable(&self, err: fn(String) -> IndexClientError) -> Result<(), IndexClientError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(err("injected write failure".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new("source_code_collection")
    }
}

impl std::fmt::Debug for InMemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIndex")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn to_usize(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

impl IndexClient for InMemoryIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn ensure_collection(&self, vector_size: u64) -> BoxFuture<'_, Result<(), IndexClientError>> {
        Box::pin(async move {
            let mut size = self
                .vector_size
                .write()
                .map_err(|e| IndexClientError::Collection(e.to_string()))?;
            size.get_or_insert(vector_size);
            Ok(())
        })
    }

    fn query_by_filter(
        &self,
        filter: FieldFilter,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<IndexEntry>, IndexClientError>> {
        Box::pin(async move {
            {
                let failing = self
                    .failing_queries
                    .read()
                    .map_err(|e| IndexClientError::Query(e.to_string()))?;
                if let Some(path) = filter
                    .must
                    .iter()
                    .find(|c| c.field == "file_path" && failing.contains(&c.value))
                    .map(|c| c.value.clone())
                {
                    return Err(IndexClientError::Query(format!(
                        "injected query failure for {path}"
                    )));
                }
            }

            let entries = self
                .entries
                .read()
                .map_err(|e| IndexClientError::Query(e.to_string()))?;
            Ok(entries
                .iter()
                .filter(|e| filter.matches(&e.payload))
                .take(to_usize(limit))
                .map(|e| IndexEntry {
                    id: e.id.clone(),
                    payload: e.payload.clone(),
                })
                .collect())
        })
    }

    fn similarity_search(
        &self,
        vector: Vec<f32>,
        top_k: u64,
        filter: Option<FieldFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, IndexClientError>> {
        Box::pin(async move {
            let entries = self
                .entries
                .read()
                .map_err(|e| IndexClientError::Search(e.to_string()))?;
            let filter = filter.unwrap_or_default();

            let mut scored: Vec<ScoredEntry> = entries
                .iter()
                .filter(|e| filter.matches(&e.payload))
                .map(|e| ScoredEntry {
                    id: e.id.clone(),
                    score: cosine_similarity(&vector, &e.vector),
                    payload: e.payload.clone(),
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            scored.truncate(to_usize(top_k));
            Ok(scored)
        })
    }

    fn insert(
        &self,
        entries: Vec<NewEntry>,
    ) -> BoxFuture<'_, Result<Vec<String>, IndexClientError>> {
        Box::pin(async move {
            self.check_writable(IndexClientError::Insert)?;
            let mut stored = self
                .entries
                .write()
                .map_err(|e| IndexClientError::Insert(e.to_string()))?;
            let mut ids = Vec::with_capacity(entries.len());
            for entry in entries {
                let id = uuid::Uuid::new_v4().to_string();
                ids.push(id.clone());
                stored.push(StoredEntry {
                    id,
                    vector: entry.vector,
                    payload: entry.payload,
                });
            }
            Ok(ids)
        })
    }

    fn delete_by_ids(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), IndexClientError>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            self.check_writable(IndexClientError::Delete)?;
            let ids: HashSet<String> = ids.into_iter().collect();
            let mut stored = self
                .entries
                .write()
                .map_err(|e| IndexClientError::Delete(e.to_string()))?;
            stored.retain(|e| !ids.contains(&e.id));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, vector: Vec<f32>) -> NewEntry {
        NewEntry {
            vector,
            payload: Payload::from([("file_path".into(), serde_json::json!(path))]),
        }
    }

    #[tokio::test]
    async fn insert_assigns_unique_ids() {
        let index = InMemoryIndex::default();
        let ids = index
            .insert(vec![entry("/a.py", vec![1.0]), entry("/a.py", vec![1.0])])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn query_by_filter_returns_only_matching() {
        let index = InMemoryIndex::default();
        index
            .insert(vec![entry("/a.py", vec![1.0]), entry("/b.py", vec![1.0])])
            .await
            .unwrap();
        let rows = index
            .query_by_filter(FieldFilter::file_path("/a.py"), 1000)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str_field("file_path"), Some("/a.py"));
    }

    #[tokio::test]
    async fn query_by_filter_honours_limit() {
        let index = InMemoryIndex::default();
        let batch = (0..5).map(|_| entry("/a.py", vec![1.0])).collect();
        index.insert(batch).await.unwrap();
        let rows = index
            .query_by_filter(FieldFilter::file_path("/a.py"), 3)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn similarity_search_ranks_by_score() {
        let index = InMemoryIndex::default();
        index
            .insert(vec![
                entry("/a.py", vec![0.0, 1.0]),
                entry("/b.py", vec![1.0, 0.0]),
                entry("/c.py", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        let hits = index
            .similarity_search(vec![1.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload["file_path"], "/b.py");
        assert_eq!(hits[1].payload["file_path"], "/c.py");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn similarity_search_with_filter() {
        let index = InMemoryIndex::default();
        index
            .insert(vec![entry("/a.py", vec![1.0, 0.0]), entry("/b.py", vec![1.0, 0.0])])
            .await
            .unwrap();
        let hits = index
            .similarity_search(vec![1.0, 0.0], 10, Some(FieldFilter::file_path("/b.py")))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["file_path"], "/b.py");
    }

    #[tokio::test]
    async fn delete_by_ids_removes_only_given() {
        let index = InMemoryIndex::default();
        let ids = index
            .insert(vec![entry("/a.py", vec![1.0]), entry("/b.py", vec![1.0])])
            .await
            .unwrap();
        index.delete_by_ids(vec![ids[0].clone()]).await.unwrap();
        assert!(index.ids_for("/a.py").is_empty());
        assert_eq!(index.ids_for("/b.py"), vec![ids[1].clone()]);
    }

    #[tokio::test]
    async fn delete_empty_batch_is_noop_even_when_failing() {
        let index = InMemoryIndex::default();
        index.set_fail_writes(true);
        index.delete_by_ids(Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures() {
        let index = InMemoryIndex::default();
        index.fail_queries_for("/bad.py");
        assert!(
            index
                .query_by_filter(FieldFilter::file_path("/bad.py"), 10)
                .await
                .is_err()
        );
        assert!(
            index
                .query_by_filter(FieldFilter::file_path("/good.py"), 10)
                .await
                .is_ok()
        );

        index.set_fail_writes(true);
        let err = index.insert(vec![entry("/a.py", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, IndexClientError::Insert(_)));
    }

    #[tokio::test]
    async fn ensure_collection_is_idempotent() {
        let index = InMemoryIndex::new("c");
        index.ensure_collection(768).await.unwrap();
        index.ensure_collection(768).await.unwrap();
        assert_eq!(index.collection(), "c");
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }
}
