use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docent_llm::EmbeddingProvider;
use notify_debouncer_mini::{DebouncedEventKind, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::error::Result;
use crate::languages::is_indexable;
use crate::record::{FileRecord, index_key};
use crate::sync::{ReconciliationSummary, Synchronizer};

/// What a single-path refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathChange {
    Reconciled(ReconciliationSummary),
    /// The file is gone; this many entries were deleted.
    Removed(usize),
}

/// Debounced recursive watcher feeding changed source files back into the
/// synchronizer.
pub struct IndexWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::Receiver<PathBuf>,
    root: PathBuf,
}

impl std::fmt::Debug for IndexWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl IndexWatcher {
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start(root: &Path, debounce: Duration) -> Result<Self> {
        let (notify_tx, rx) = mpsc::channel::<PathBuf>(64);

        let mut debouncer = new_debouncer(
            debounce,
            move |events: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("index watcher error: {e}");
                        return;
                    }
                };

                let paths: HashSet<PathBuf> = events
                    .into_iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any && is_indexable(&e.path))
                    .map(|e| e.path)
                    .collect();

                for path in paths {
                    let _ = notify_tx.blocking_send(path);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;

        tracing::info!(root = %root.display(), "watching for changes");
        Ok(Self {
            _debouncer: debouncer,
            rx,
            root: root.to_path_buf(),
        })
    }

    /// Process change events until `cancel` fires. Per-path failures are
    /// logged and do not stop the loop.
    pub async fn run<E: EmbeddingProvider>(
        mut self,
        sync: &Synchronizer<E>,
        chunker: &Chunker,
        cancel: &CancellationToken,
    ) {
        loop {
            let path = tokio::select! {
                () = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            match sync_path(sync, chunker, &path).await {
                Ok(PathChange::Reconciled(summary)) => tracing::debug!(
                    path = %path.display(),
                    inserted = summary.inserted_count,
                    deleted = summary.deleted_count,
                    "refreshed"
                ),
                Ok(PathChange::Removed(n)) => {
                    tracing::debug!(path = %path.display(), deleted = n, "removed");
                }
                Err(e) => tracing::warn!(path = %path.display(), "refresh failed: {e}"),
            }
        }
        tracing::info!(root = %self.root.display(), "watcher stopped");
    }
}

/// Bring the index in line with the current state of one path.
///
/// # Errors
///
/// Propagates record build and reconciliation failures.
pub async fn sync_path<E: EmbeddingProvider>(
    sync: &Synchronizer<E>,
    chunker: &Chunker,
    path: &Path,
) -> Result<PathChange> {
    if tokio::fs::try_exists(path).await? {
        let record = FileRecord::build(path, chunker).await?;
        let summary = sync.reconcile(vec![record]).await?;
        return Ok(PathChange::Reconciled(summary));
    }

    let file_path = index_key(path)?;
    let removed = sync.remove_file(&file_path).await?;
    Ok(PathChange::Removed(removed))
}
