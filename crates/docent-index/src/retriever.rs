//! Retrieval gateway: file lookup, similarity search, or both combined.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use docent_llm::EmbeddingProvider;

use crate::client::{FieldFilter, IndexClient, Payload};
use crate::error::{IndexError, Result, with_timeout};
use crate::record::{Chunk, index_key};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Results returned by a similarity search.
    pub top_k: u64,
    /// Row cap for a whole-file lookup.
    pub file_query_limit: u64,
    /// Limit applied to the embedding call and every index call.
    pub remote_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            file_query_limit: 1000,
            remote_timeout: Duration::from_secs(30),
        }
    }
}

/// Query mode, picked from which arguments are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Every entry of one file, in index order.
    File { file_path: String },
    /// Top-k over the whole index.
    Semantic { query: String },
    /// Top-k restricted to one file.
    FilteredSemantic { query: String, file_path: String },
}

impl RetrievalMode {
    /// Empty strings count as absent. A relative `file_path` is resolved
    /// against the working directory, matching how entries are keyed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidQuery`] if both arguments are absent, or
    /// [`IndexError::Io`] if a relative path cannot be resolved.
    pub fn select(query: Option<&str>, file_path: Option<&str>) -> Result<Self> {
        let query = query.filter(|q| !q.trim().is_empty()).map(str::to_string);
        let file_path = file_path
            .filter(|p| !p.trim().is_empty())
            .map(|p| index_key(std::path::Path::new(p)))
            .transpose()?;

        match (query, file_path) {
            (None, None) => Err(IndexError::InvalidQuery(
                "at least one of query or file_path is required",
            )),
            (None, Some(file_path)) => Ok(Self::File { file_path }),
            (Some(query), None) => Ok(Self::Semantic { query }),
            (Some(query), Some(file_path)) => Ok(Self::FilteredSemantic { query, file_path }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Similarity score; `None` for whole-file lookups.
    pub score: Option<f32>,
}

pub struct RetrievalGateway<E: EmbeddingProvider> {
    client: Arc<dyn IndexClient>,
    embedder: Arc<E>,
    config: RetrievalConfig,
}

impl<E: EmbeddingProvider> std::fmt::Debug for RetrievalGateway<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalGateway")
            .field("collection", &self.client.collection())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: EmbeddingProvider> RetrievalGateway<E> {
    #[must_use]
    pub fn new(client: Arc<dyn IndexClient>, embedder: Arc<E>, config: RetrievalConfig) -> Self {
        Self {
            client,
            embedder,
            config,
        }
    }

    /// Run one retrieval. Read-only; dropping the future mid-call has no
    /// side effects.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidQuery`] when both arguments are absent,
    /// or an embedding, remote index, or timeout error.
    pub async fn retrieve(
        &self,
        query: Option<&str>,
        file_path: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        let mode = RetrievalMode::select(query, file_path)?;
        tracing::debug!(?mode, "retrieve");

        match mode {
            RetrievalMode::File { file_path } => {
                let rows = with_timeout(
                    "query_by_filter",
                    self.config.remote_timeout,
                    self.client.query_by_filter(
                        FieldFilter::file_path(file_path),
                        self.config.file_query_limit,
                    ),
                )
                .await?;
                Ok(rows
                    .into_iter()
                    .filter_map(|row| decode(row.id, row.payload, None))
                    .collect())
            }
            RetrievalMode::Semantic { query } => self.search(&query, None).await,
            RetrievalMode::FilteredSemantic { query, file_path } => {
                self.search(&query, Some(FieldFilter::file_path(file_path)))
                    .await
            }
        }
    }

    async fn search(&self, query: &str, filter: Option<FieldFilter>) -> Result<Vec<RetrievedChunk>> {
        let vector = with_timeout(
            "embed",
            self.config.remote_timeout,
            self.embedder.embed(query),
        )
        .await?;

        let hits = with_timeout(
            "similarity_search",
            self.config.remote_timeout,
            self.client
                .similarity_search(vector, self.config.top_k, filter),
        )
        .await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| decode(hit.id, hit.payload, Some(hit.score)))
            .collect())
    }
}

fn decode(id: String, payload: Payload, score: Option<f32>) -> Option<RetrievedChunk> {
    match Chunk::from_payload(id.clone(), payload) {
        Ok(chunk) => Some(RetrievedChunk { chunk, score }),
        Err(e) => {
            tracing::warn!(id = %id, "skipping undecodable index entry: {e}");
            None
        }
    }
}

/// Render retrieved chunks as one text block for the agent tool layer.
#[must_use]
pub fn format_for_tool(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let mut out = String::from("<code_context>\n");

    for (i, item) in chunks.iter().enumerate() {
        let c = &item.chunk;
        let _ = write!(
            out,
            "  <chunk n=\"{}\" file=\"{}\" index=\"{}\" last=\"{}\" lines=\"{}\" chars=\"{}\"",
            i + 1,
            c.file_path,
            c.chunk_index,
            c.is_last_chunk,
            c.line_length,
            c.char_length,
        );
        if let Some(score) = item.score {
            let _ = write!(out, " score=\"{score:.2}\"");
        }
        out.push_str(">\n");
        out.push_str(&c.text);
        out.push_str("\n  </chunk>\n");
    }

    out.push_str("</code_context>");
    out
}

#[cfg(test)]
mod tests {
    use docent_llm::mock::MockEmbedder;

    use super::*;
    use crate::client::NewEntry;
    use crate::in_memory::InMemoryIndex;
    use crate::languages::Lang;
    use crate::record::normalize_path;

    fn chunk(path: &str, index: usize, text: &str) -> Chunk {
        Chunk {
            id: None,
            text: text.into(),
            file_path: path.into(),
            chunk_index: index,
            char_length: text.chars().count(),
            line_length: text.lines().count(),
            is_last_chunk: false,
            file_last_updated_at: 1.0,
            file_type: Lang::Python,
            file_content_hash: String::new(),
        }
    }

    async fn seeded() -> RetrievalGateway<MockEmbedder> {
        let index = Arc::new(InMemoryIndex::default());
        let embedder = MockEmbedder::default();
        let chunks = [
            chunk("/src/a.py", 1, "def parse_tokens(stream): return stream.split()"),
            chunk("/src/a.py", 2, "def render(tree): return str(tree)"),
            chunk("/src/b.py", 1, "def parse_tokens(text): return list(text)"),
            chunk("/src/c.js", 1, "function connect(db) { return db.open(); }"),
        ];
        let entries = chunks
            .iter()
            .map(|c| NewEntry {
                vector: embedder.vector_for(&c.text),
                payload: c.to_payload().unwrap(),
            })
            .collect();
        index.insert(entries).await.unwrap();
        RetrievalGateway::new(
            index as Arc<dyn IndexClient>,
            Arc::new(embedder),
            RetrievalConfig {
                top_k: 2,
                ..RetrievalConfig::default()
            },
        )
    }

    #[test]
    fn select_modes() {
        assert!(matches!(
            RetrievalMode::select(None, None),
            Err(IndexError::InvalidQuery(_))
        ));
        assert!(matches!(
            RetrievalMode::select(Some(""), Some("  ")),
            Err(IndexError::InvalidQuery(_))
        ));
        assert_eq!(
            RetrievalMode::select(None, Some("/a.py")).unwrap(),
            RetrievalMode::File {
                file_path: "/a.py".into()
            }
        );
        assert_eq!(
            RetrievalMode::select(Some("q"), Some("")).unwrap(),
            RetrievalMode::Semantic { query: "q".into() }
        );
        assert_eq!(
            RetrievalMode::select(Some("q"), Some("/src/a.py")).unwrap(),
            RetrievalMode::FilteredSemantic {
                query: "q".into(),
                file_path: "/src/a.py".into()
            }
        );
    }

    #[test]
    fn select_resolves_relative_file_path() {
        let cwd = normalize_path(&std::env::current_dir().unwrap());
        assert_eq!(
            RetrievalMode::select(None, Some("src/a.py")).unwrap(),
            RetrievalMode::File {
                file_path: format!("{cwd}/src/a.py")
            }
        );
        assert_eq!(
            RetrievalMode::select(None, Some(r"src\b.py")).unwrap(),
            RetrievalMode::File {
                file_path: format!("{cwd}/src/b.py")
            }
        );
    }

    #[tokio::test]
    async fn file_mode_returns_all_entries_of_file() {
        let gw = seeded().await;
        let results = gw.retrieve(None, Some("/src/a.py")).await.unwrap();
        // file mode is not capped by top_k
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.chunk.file_path == "/src/a.py"));
        assert!(results.iter().all(|r| r.score.is_none()));
        assert!(results.iter().all(|r| r.chunk.id.is_some()));
    }

    #[tokio::test]
    async fn semantic_mode_ranks_and_caps() {
        let gw = seeded().await;
        let results = gw.retrieve(Some("parse tokens"), None).await.unwrap();
        assert_eq!(results.len(), 2);
        let scores: Vec<f32> = results.iter().map(|r| r.score.unwrap()).collect();
        assert!(scores[0] >= scores[1]);
        assert!(results.iter().all(|r| r.chunk.text.contains("parse_tokens")));
    }

    #[tokio::test]
    async fn filtered_mode_respects_file() {
        let gw = seeded().await;
        let results = gw
            .retrieve(Some("parse tokens"), Some("/src/b.py"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.file_path, "/src/b.py");
    }

    #[tokio::test]
    async fn unknown_file_is_empty() {
        let gw = seeded().await;
        assert!(gw.retrieve(None, Some("/nope.py")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let gw = RetrievalGateway::new(
            Arc::new(InMemoryIndex::default()) as Arc<dyn IndexClient>,
            Arc::new(MockEmbedder::failing()),
            RetrievalConfig::default(),
        );
        let err = gw.retrieve(Some("anything"), None).await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }

    #[tokio::test]
    async fn undecodable_rows_are_skipped() {
        let index = Arc::new(InMemoryIndex::default());
        index
            .insert(vec![NewEntry {
                vector: vec![1.0],
                payload: Payload::from([("file_path".into(), serde_json::json!("/x.py"))]),
            }])
            .await
            .unwrap();
        let gw = RetrievalGateway::new(
            index as Arc<dyn IndexClient>,
            Arc::new(MockEmbedder::default()),
            RetrievalConfig::default(),
        );
        assert!(gw.retrieve(None, Some("/x.py")).await.unwrap().is_empty());
    }

    #[test]
    fn format_for_tool_empty() {
        assert_eq!(format_for_tool(&[]), "");
    }

    #[test]
    fn format_for_tool_includes_metadata_and_text() {
        let out = format_for_tool(&[
            RetrievedChunk {
                chunk: chunk("/src/a.py", 3, "x = 1"),
                score: Some(0.856),
            },
            RetrievedChunk {
                chunk: chunk("/src/b.py", 1, "y = 2"),
                score: None,
            },
        ]);
        assert!(out.starts_with("<code_context>\n"));
        assert!(out.ends_with("</code_context>"));
        assert!(out.contains("n=\"1\" file=\"/src/a.py\" index=\"3\""));
        assert!(out.contains("score=\"0.86\""));
        assert!(out.contains("n=\"2\" file=\"/src/b.py\""));
        assert!(out.contains("x = 1\n  </chunk>"));
        assert_eq!(out.matches("score=").count(), 1);
    }
}
