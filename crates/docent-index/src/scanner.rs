//! Corpus scanner: directory walk, extension filter, concurrent record build.

use std::path::{Path, PathBuf};

use futures::StreamExt;

use crate::chunker::Chunker;
use crate::error::{IndexError, Result};
use crate::languages::detect_language;
use crate::record::FileRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Skip paths excluded by `.gitignore` / `.ignore` files.
    pub respect_gitignore: bool,
    /// Descend into dot-directories and read dotfiles.
    pub include_hidden: bool,
    /// Files read and chunked at once.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: false,
            include_hidden: true,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scanner {
    chunker: Chunker,
    config: ScanConfig,
}

impl Scanner {
    #[must_use]
    pub fn new(chunker: Chunker, config: ScanConfig) -> Self {
        Self { chunker, config }
    }

    #[must_use]
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Build a [`FileRecord`] for every supported file under `root`.
    ///
    /// A file that fails to build is logged and skipped. The result has no
    /// ordering guarantee.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::FileRead`] if `root` itself cannot be stat'ed.
    pub async fn scan(&self, root: &Path) -> Result<Vec<FileRecord>> {
        tokio::fs::metadata(root)
            .await
            .map_err(|source| IndexError::FileRead {
                path: root.to_path_buf(),
                source,
            })?;

        let candidates = {
            let root = root.to_path_buf();
            let config = self.config;
            tokio::task::spawn_blocking(move || collect_candidates(&root, config))
                .await
                .map_err(|e| IndexError::Io(std::io::Error::other(e)))?
        };

        tracing::info!(root = %root.display(), candidates = candidates.len(), "scan started");

        let records: Vec<FileRecord> = futures::stream::iter(candidates)
            .map(|path| {
                let chunker = &self.chunker;
                async move {
                    let result = FileRecord::build(&path, chunker).await;
                    (path, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|(path, result)| async move {
                match result {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "skipping file: {e}");
                        None
                    }
                }
            })
            .collect()
            .await;

        tracing::info!(files = records.len(), "scan complete");
        Ok(records)
    }
}

fn collect_candidates(root: &Path, config: ScanConfig) -> Vec<PathBuf> {
    ignore::WalkBuilder::new(root)
        .hidden(!config.include_hidden)
        .git_ignore(config.respect_gitignore)
        .git_global(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .ignore(config.respect_gitignore)
        .parents(config.respect_gitignore)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|e| detect_language(e.path()).is_some())
        .map(ignore::DirEntry::into_path)
        .collect()
}
