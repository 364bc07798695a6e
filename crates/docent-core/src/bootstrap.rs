//! Application bootstrap: config resolution, embedder and index construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use docent_index::chunker::{self, Chunker};
use docent_index::client::IndexClient;
use docent_index::in_memory::InMemoryIndex;
use docent_index::qdrant::QdrantIndex;
use docent_index::retriever::{self, RetrievalGateway};
use docent_index::scanner::{self, Scanner};
use docent_index::sync::{self, PathLocks, ReconciliationSummary, Synchronizer};
use docent_index::watcher::IndexWatcher;
use docent_llm::any::AnyEmbedder;
use docent_llm::gemini::GeminiEmbedder;
use docent_llm::ollama::OllamaEmbedder;
use docent_llm::openai::OpenAiEmbedder;
use docent_llm::provider::EmbeddingProvider;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, EmbeddingProviderKind, IndexBackend};

/// Priority: CLI `--config` > `DOCENT_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("DOCENT_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

/// # Errors
///
/// Returns an error if a hosted provider is selected without an API key.
pub fn create_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let embedding = &config.embedding;
    let timeout = Duration::from_secs(embedding.timeout_secs);
    let base_url = embedding.effective_base_url();
    let model = embedding.effective_model();

    let embedder = match embedding.provider {
        EmbeddingProviderKind::Ollama => {
            AnyEmbedder::Ollama(OllamaEmbedder::new(base_url, model.to_owned(), timeout))
        }
        EmbeddingProviderKind::OpenAi => {
            let Some(key) = embedding.api_key.clone() else {
                bail!("embedding.api_key (or DOCENT_EMBEDDING_API_KEY) is required for openai");
            };
            AnyEmbedder::OpenAi(OpenAiEmbedder::new(
                key,
                base_url.to_owned(),
                model.to_owned(),
                timeout,
            ))
        }
        EmbeddingProviderKind::Gemini => {
            let Some(key) = embedding.api_key.clone() else {
                bail!("embedding.api_key (or GEMINI_API_KEY) is required for gemini");
            };
            AnyEmbedder::Gemini(GeminiEmbedder::new(
                key,
                base_url.to_owned(),
                model,
                timeout,
            ))
        }
        #[cfg(feature = "mock")]
        EmbeddingProviderKind::Mock => {
            let mut mock = docent_llm::mock::MockEmbedder::default();
            mock.dimensions = usize::try_from(config.index.vector_size)?;
            AnyEmbedder::Mock(mock)
        }
    };
    Ok(embedder)
}

/// Index client, embedder and config wired together.
///
/// Every synchronizer handed out shares one set of per-path locks, so
/// concurrent passes and the watcher never write the same file at once.
pub struct IndexContext {
    config: Config,
    client: Arc<dyn IndexClient>,
    embedder: Arc<AnyEmbedder>,
    locks: Arc<PathLocks>,
}

impl IndexContext {
    /// Build the embedder and index client, then make sure the collection
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder cannot be created, the index is
    /// unreachable, or collection setup fails or times out.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config)?;
        let client: Arc<dyn IndexClient> = match config.index.backend {
            IndexBackend::Qdrant => Arc::new(
                QdrantIndex::new(&config.index.qdrant_url, config.index.collection.clone())
                    .with_context(|| {
                        format!("failed to connect to qdrant at {}", config.index.qdrant_url)
                    })?,
            ),
            IndexBackend::Memory => Arc::new(InMemoryIndex::new(config.index.collection.clone())),
        };
        Self::from_parts(config, client, embedder).await
    }

    /// # Errors
    ///
    /// Returns an error if collection setup fails or times out.
    pub async fn from_parts(
        config: Config,
        client: Arc<dyn IndexClient>,
        embedder: AnyEmbedder,
    ) -> anyhow::Result<Self> {
        let limit = Duration::from_secs(config.index.remote_timeout_secs);
        tokio::time::timeout(limit, client.ensure_collection(config.index.vector_size))
            .await
            .with_context(|| format!("ensure_collection timed out after {}s", limit.as_secs()))?
            .with_context(|| format!("failed to prepare collection {}", client.collection()))?;

        tracing::info!(
            collection = client.collection(),
            backend = ?config.index.backend,
            embedder = embedder.name(),
            "index ready"
        );
        Ok(Self {
            config,
            client,
            embedder: Arc::new(embedder),
            locks: Arc::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> Arc<dyn IndexClient> {
        Arc::clone(&self.client)
    }

    fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.config.index.remote_timeout_secs)
    }

    #[must_use]
    pub fn chunker(&self) -> Chunker {
        Chunker::new(chunker::ChunkerConfig {
            chunk_lines: self.config.chunker.chunk_lines,
            chunk_lines_overlap: self.config.chunker.chunk_lines_overlap,
            max_chars: self.config.chunker.max_chars,
        })
    }

    #[must_use]
    pub fn scanner(&self) -> Scanner {
        Scanner::new(
            self.chunker(),
            scanner::ScanConfig {
                respect_gitignore: self.config.scan.respect_gitignore,
                include_hidden: self.config.scan.include_hidden,
                concurrency: self.config.scan.concurrency,
            },
        )
    }

    #[must_use]
    pub fn synchronizer(&self) -> Synchronizer<AnyEmbedder> {
        Synchronizer::with_locks(
            Arc::clone(&self.client),
            Arc::clone(&self.embedder),
            sync::SyncConfig {
                change_detection: self.config.sync.change_detection,
                concurrency: self.config.sync.concurrency,
                remote_timeout: self.remote_timeout(),
            },
            Arc::clone(&self.locks),
        )
    }

    #[must_use]
    pub fn gateway(&self) -> RetrievalGateway<AnyEmbedder> {
        RetrievalGateway::new(
            Arc::clone(&self.client),
            Arc::clone(&self.embedder),
            retriever::RetrievalConfig {
                top_k: self.config.retrieval.top_k,
                file_query_limit: self.config.retrieval.file_query_limit,
                remote_timeout: self.remote_timeout(),
            },
        )
    }

    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be started.
    pub fn watcher(&self, root: &Path) -> anyhow::Result<IndexWatcher> {
        IndexWatcher::start(root, Duration::from_millis(self.config.watch.debounce_ms))
            .with_context(|| format!("failed to watch {}", root.display()))
    }

    /// Scan `root` and reconcile the index with what was found.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be read or the reconciliation
    /// pass fails or is cancelled.
    pub async fn index_root(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> anyhow::Result<ReconciliationSummary> {
        let records = self
            .scanner()
            .scan(root)
            .await
            .with_context(|| format!("failed to scan {}", root.display()))?;
        tracing::info!(root = %root.display(), files = records.len(), "scan complete");

        let summary = self
            .synchronizer()
            .reconcile_with_cancel(records, cancel)
            .await
            .context("reconciliation failed")?;
        tracing::info!(
            inserted = summary.inserted_count,
            deleted = summary.deleted_count,
            unchanged = summary.unchanged(),
            rejected = summary.rejected(),
            "index updated"
        );
        Ok(summary)
    }

    /// Release the index client and embedder.
    pub fn close(self) {
        tracing::info!(collection = self.client.collection(), "index context closed");
    }
}
