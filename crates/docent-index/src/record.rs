//! Per-file records: chunks plus the version fingerprint taken at read time.

use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::chunker::{ChunkWindow, Chunker};
use crate::client::Payload;
use crate::error::{IndexError, Result};
use crate::languages::{Lang, detect_language};

/// Unit stored in the index. `id` is assigned by the index on insert and is
/// not part of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(skip)]
    pub id: Option<String>,
    pub text: String,
    pub file_path: String,
    pub chunk_index: usize,
    #[serde(rename = "chunk_char_length")]
    pub char_length: usize,
    #[serde(rename = "chunk_line_length")]
    pub line_length: usize,
    pub is_last_chunk: bool,
    pub file_last_updated_at: f64,
    pub file_type: Lang,
    #[serde(default)]
    pub file_content_hash: String,
}

impl Chunk {
    fn from_window(window: ChunkWindow, record: &RecordMeta<'_>) -> Self {
        Self {
            id: None,
            text: window.text,
            file_path: record.file_path.to_string(),
            chunk_index: window.chunk_index,
            char_length: window.char_length,
            line_length: window.line_length,
            is_last_chunk: window.is_last_chunk,
            file_last_updated_at: record.last_modified,
            file_type: record.file_type,
            file_content_hash: record.content_hash.to_string(),
        }
    }

    /// Serialize into an index payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(IndexError::Parse("chunk did not serialize to an object".into())),
        }
    }

    /// Rebuild a chunk from an index entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a required payload field is missing or mistyped.
    pub fn from_payload(id: String, payload: Payload) -> Result<Self> {
        let mut chunk: Self =
            serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))?;
        chunk.id = Some(id);
        Ok(chunk)
    }
}

struct RecordMeta<'a> {
    file_path: &'a str,
    file_type: Lang,
    last_modified: f64,
    content_hash: &'a str,
}

/// In-memory view of one source file at scan time.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub file_path: String,
    pub file_type: Lang,
    /// Count of `\n`-separated segments, so a trailing newline adds one and
    /// an empty file counts as one line.
    pub total_lines: usize,
    pub total_chars: usize,
    /// Modification time in seconds since the Unix epoch.
    pub last_modified: f64,
    /// blake3 hex digest of the source text.
    pub content_hash: String,
    pub chunks: Vec<Chunk>,
}

impl FileRecord {
    /// Read `path`, fingerprint it, and chunk it.
    ///
    /// The modification time is read before the content; a write landing in
    /// between is picked up by the next pass.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnsupportedFileType`] for an extension outside
    /// the language map and [`IndexError::FileRead`] if the file cannot be
    /// stat'ed, read, or decoded as UTF-8.
    pub async fn build(path: &Path, chunker: &Chunker) -> Result<Self> {
        let file_type = detect_language(path)
            .ok_or_else(|| IndexError::UnsupportedFileType(path.display().to_string()))?;

        let read_err = |source: std::io::Error| IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        };

        let file_path = index_key(path).map_err(read_err)?;

        let metadata = tokio::fs::metadata(path).await.map_err(read_err)?;
        let last_modified = metadata
            .modified()
            .map_err(read_err)?
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());

        let bytes = tokio::fs::read(path).await.map_err(read_err)?;
        let source = String::from_utf8(bytes).map_err(|e| {
            read_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let content_hash = blake3::hash(source.as_bytes()).to_hex().to_string();
        let total_lines = source.split('\n').count();
        let total_chars = source.chars().count();

        let chunker = chunker.clone();
        let windows = tokio::task::spawn_blocking(move || chunker.chunk(&source, file_type))
            .await
            .map_err(|e| IndexError::Parse(format!("chunking task failed: {e}")))??;

        let meta = RecordMeta {
            file_path: &file_path,
            file_type,
            last_modified,
            content_hash: &content_hash,
        };
        let chunks = windows
            .into_iter()
            .map(|w| Chunk::from_window(w, &meta))
            .collect();

        tracing::debug!(
            file = %file_path,
            total_lines,
            last_modified,
            "built file record"
        );

        Ok(Self {
            file_path,
            file_type,
            total_lines,
            total_chars,
            last_modified,
            content_hash,
            chunks,
        })
    }
}

/// Forward-slash form of `path`.
#[must_use]
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// The `file_path` entries of `path` are stored under: absolute, then
/// forward-slashed. Relative paths resolve against the working directory.
///
/// # Errors
///
/// Fails if the working directory cannot be determined.
pub fn index_key(path: &Path) -> std::io::Result<String> {
    std::path::absolute(path).map(|abs| normalize_path(&abs))
}
