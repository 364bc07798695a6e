//! Error types for docent-index.

use std::path::PathBuf;

/// Errors that can occur during indexing, reconciliation, and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The file extension has no entry in the language map.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// The file could not be opened, stat'ed, or decoded as UTF-8.
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither a query nor a file path was supplied.
    #[error("invalid query: {0}")]
    InvalidQuery(&'static str),

    /// Transport or service failure talking to the vector index.
    #[error("remote index error: {0}")]
    RemoteIndex(#[from] crate::client::IndexClientError),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(#[from] docent_llm::LlmError),

    /// Tree-sitter parsing error.
    #[error("parse failed: {0}")]
    Parse(String),

    /// A remote call did not finish within the configured timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    /// The reconciliation pass was cancelled before its write phase.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// IO error outside of reading a specific source file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Run `fut` under `limit`, mapping expiry to [`IndexError::Timeout`].
pub(crate) async fn with_timeout<T, E>(
    operation: &'static str,
    limit: std::time::Duration,
    fut: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    IndexError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(IndexError::from),
        Err(_) => Err(IndexError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}
