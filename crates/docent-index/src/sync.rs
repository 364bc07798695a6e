//! Index synchronizer: aligns the remote index with freshly scanned records.
//!
//! Each file is queried by `file_path`, classified as unchanged or stale,
//! and stale files are replaced wholesale. After every file is classified
//! the pass issues one batch delete followed by one batch insert. Deleting
//! first means a crash between the two leaves a gap, never duplicates.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use docent_llm::EmbeddingProvider;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::client::{FieldFilter, IndexClient, IndexEntry, NO_LIMIT, NewEntry};
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result, with_timeout};
use crate::record::{Chunk, FileRecord};

/// How a file is recognised as already indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Exact match on `file_last_updated_at`.
    #[default]
    Timestamp,
    /// Match on the blake3 digest stored as `file_content_hash`.
    ContentHash,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub change_detection: ChangeDetection,
    /// Files queried, and chunks embedded, at once.
    pub concurrency: usize,
    /// Limit applied to every remote call.
    pub remote_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            change_detection: ChangeDetection::Timestamp,
            concurrency: 8,
            remote_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Fingerprint found in the index; nothing was written.
    Unchanged,
    /// Prior entries deleted and current chunks inserted.
    Reconciled { deleted: usize, inserted: usize },
    /// The existing-entries query failed; the file was left untouched.
    Rejected(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationSummary {
    pub inserted_count: usize,
    pub deleted_count: usize,
    /// Outcome per `file_path`.
    pub outcomes: BTreeMap<String, FileOutcome>,
}

impl ReconciliationSummary {
    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }

    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Unchanged))
    }

    #[must_use]
    pub fn reconciled(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Reconciled { .. }))
    }

    #[must_use]
    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Rejected(_)))
    }
}

/// Per-`file_path` async locks. Guards are always taken in sorted path
/// order so overlapping batches cannot deadlock.
#[derive(Debug, Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub async fn acquire<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<&str> = paths.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mutexes: Vec<Arc<tokio::sync::Mutex<()>>> = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, m| Arc::strong_count(m) > 1);
            sorted
                .iter()
                .map(|p| Arc::clone(map.entry((*p).to_string()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for m in mutexes {
            guards.push(m.lock_owned().await);
        }
        guards
    }
}

enum Classified {
    Unchanged,
    Stale {
        delete_ids: Vec<String>,
        record: FileRecord,
    },
    Rejected(String),
}

pub struct Synchronizer<E: EmbeddingProvider> {
    client: Arc<dyn IndexClient>,
    embedder: Arc<E>,
    config: SyncConfig,
    locks: Arc<PathLocks>,
}

impl<E: EmbeddingProvider> Clone for Synchronizer<E> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            embedder: Arc::clone(&self.embedder),
            config: self.config.clone(),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<E: EmbeddingProvider> std::fmt::Debug for Synchronizer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("collection", &self.client.collection())
            .field("embedder", &self.embedder.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: EmbeddingProvider> Synchronizer<E> {
    #[must_use]
    pub fn new(client: Arc<dyn IndexClient>, embedder: Arc<E>, config: SyncConfig) -> Self {
        Self::with_locks(client, embedder, config, Arc::default())
    }

    /// Build a synchronizer that serializes per-path work with every other
    /// holder of `locks`.
    #[must_use]
    pub fn with_locks(
        client: Arc<dyn IndexClient>,
        embedder: Arc<E>,
        config: SyncConfig,
        locks: Arc<PathLocks>,
    ) -> Self {
        Self {
            client,
            embedder,
            config,
            locks,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Reconcile the index with `records`.
    ///
    /// Safe to re-run on the same input: unchanged files are skipped.
    ///
    /// # Errors
    ///
    /// Fails if embedding, the batch delete, or the batch insert fails.
    /// A failed existing-entries query only rejects that file.
    pub async fn reconcile(&self, records: Vec<FileRecord>) -> Result<ReconciliationSummary> {
        self.reconcile_with_cancel(records, &CancellationToken::new())
            .await
    }

    /// [`Self::reconcile`] that stops between per-file units once `cancel`
    /// fires. Cancellation before the write phase leaves the index
    /// untouched; once the batch delete starts the pass runs to completion.
    ///
    /// # Errors
    ///
    /// As [`Self::reconcile`], plus [`IndexError::Cancelled`].
    pub async fn reconcile_with_cancel(
        &self,
        records: Vec<FileRecord>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationSummary> {
        let records = dedup_by_path(records);
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let _guards = self
            .locks
            .acquire(records.iter().map(|r| r.file_path.as_str()))
            .await;

        tracing::info!(files = records.len(), "reconciliation started");

        let classified: Vec<(String, Classified)> = futures::stream::iter(records)
            .map(|record| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let path = record.file_path.clone();
                Some((path, self.classify(record).await))
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|c| async move { c })
            .collect()
            .await;

        if cancel.is_cancelled() {
            tracing::info!("reconciliation cancelled before write phase");
            return Err(IndexError::Cancelled);
        }

        let mut summary = ReconciliationSummary::default();
        let mut delete_batch = Vec::new();
        let mut stale = Vec::new();

        for (path, class) in classified {
            match class {
                Classified::Unchanged => {
                    tracing::debug!(file = %path, "unchanged");
                    summary.outcomes.insert(path, FileOutcome::Unchanged);
                }
                Classified::Rejected(reason) => {
                    tracing::warn!(file = %path, "existing-entries query failed: {reason}");
                    summary.outcomes.insert(path, FileOutcome::Rejected(reason));
                }
                Classified::Stale { delete_ids, record } => {
                    summary.outcomes.insert(
                        path,
                        FileOutcome::Reconciled {
                            deleted: delete_ids.len(),
                            inserted: record.chunks.len(),
                        },
                    );
                    delete_batch.extend(delete_ids);
                    stale.push(record);
                }
            }
        }

        let insert_batch = self.embed_records(&stale).await?;

        if cancel.is_cancelled() {
            tracing::info!("reconciliation cancelled before write phase");
            return Err(IndexError::Cancelled);
        }

        summary.deleted_count = delete_batch.len();
        summary.inserted_count = insert_batch.len();

        self.write_batches(delete_batch, insert_batch).await?;

        for (path, outcome) in &summary.outcomes {
            if let FileOutcome::Reconciled { deleted, inserted } = outcome {
                tracing::info!(file = %path, deleted, inserted, "reconciled");
            }
        }
        tracing::info!(
            inserted = summary.inserted_count,
            deleted = summary.deleted_count,
            unchanged = summary.unchanged(),
            rejected = summary.rejected(),
            "reconciliation complete"
        );

        Ok(summary)
    }

    /// Delete every entry of `file_path`, e.g. after the file was removed.
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Fails if the query or the delete fails.
    pub async fn remove_file(&self, file_path: &str) -> Result<usize> {
        let _guards = self.locks.acquire([file_path]).await;

        let ids: Vec<String> = self
            .existing_entries(file_path)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        let count = ids.len();

        if count > 0 {
            with_timeout(
                "delete_by_ids",
                self.config.remote_timeout,
                self.client.delete_by_ids(ids),
            )
            .await?;
        }
        tracing::info!(file = %file_path, deleted = count, "removed file from index");
        Ok(count)
    }

    /// Every entry stored for `file_path`. Uncapped, since a partial list
    /// would leave stale entries behind after the delete.
    async fn existing_entries(&self, file_path: &str) -> Result<Vec<IndexEntry>> {
        with_timeout(
            "query_by_filter",
            self.config.remote_timeout,
            self.client
                .query_by_filter(FieldFilter::file_path(file_path), NO_LIMIT),
        )
        .await
    }

    async fn classify(&self, record: FileRecord) -> Classified {
        let entries = match self.existing_entries(&record.file_path).await {
            Ok(entries) => entries,
            Err(e) => return Classified::Rejected(e.to_string()),
        };

        if is_unchanged(&entries, &record, self.config.change_detection) {
            return Classified::Unchanged;
        }
        if entries.is_empty() && record.chunks.is_empty() {
            return Classified::Unchanged;
        }

        Classified::Stale {
            delete_ids: entries.into_iter().map(|e| e.id).collect(),
            record,
        }
    }

    async fn embed_records(&self, records: &[FileRecord]) -> Result<Vec<NewEntry>> {
        let jobs = records
            .iter()
            .flat_map(|r| r.chunks.iter().map(move |c| (c, r.chunks.len())));

        futures::stream::iter(jobs)
            .map(|(chunk, total)| self.embed_chunk(chunk, total))
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await
    }

    async fn embed_chunk(&self, chunk: &Chunk, total: usize) -> Result<NewEntry> {
        let text = contextualize_for_embedding(chunk, total);
        let vector = with_timeout(
            "embed",
            self.config.remote_timeout,
            self.embedder.embed(&text),
        )
        .await?;
        tracing::debug!(file = %chunk.file_path, chunk = chunk.chunk_index, "embedded chunk");
        Ok(NewEntry {
            vector,
            payload: chunk.to_payload()?,
        })
    }

    async fn write_batches(&self, delete_ids: Vec<String>, inserts: Vec<NewEntry>) -> Result<()> {
        if !delete_ids.is_empty() {
            with_timeout(
                "delete_by_ids",
                self.config.remote_timeout,
                self.client.delete_by_ids(delete_ids),
            )
            .await?;
        }
        if !inserts.is_empty() {
            with_timeout(
                "insert",
                self.config.remote_timeout,
                self.client.insert(inserts),
            )
            .await?;
        }
        Ok(())
    }
}

/// Later records win when a path appears twice in one batch.
fn dedup_by_path(records: Vec<FileRecord>) -> Vec<FileRecord> {
    let mut by_path: BTreeMap<String, FileRecord> = BTreeMap::new();
    for record in records {
        if let Some(prev) = by_path.insert(record.file_path.clone(), record) {
            tracing::warn!(file = %prev.file_path, "duplicate record in batch, keeping the last");
        }
    }
    by_path.into_values().collect()
}

#[allow(clippy::float_cmp)]
fn is_unchanged(entries: &[IndexEntry], record: &FileRecord, mode: ChangeDetection) -> bool {
    match mode {
        ChangeDetection::Timestamp => entries
            .iter()
            .any(|e| e.f64_field("file_last_updated_at") == Some(record.last_modified)),
        ChangeDetection::ContentHash => entries
            .iter()
            .any(|e| e.str_field("file_content_hash") == Some(record.content_hash.as_str())),
    }
}
