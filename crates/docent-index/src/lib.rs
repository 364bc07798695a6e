//! Source-tree indexing, vector index reconciliation, and code retrieval.
//!
//! Source files are split into syntax-aware, overlapping line windows,
//! embedded, and kept in sync with a remote vector index keyed by file path.
//! A file's modification time is its fingerprint: files whose fingerprint
//! already appears in the index are left alone, everything else is replaced
//! wholesale (delete first, then insert). Retrieval composes similarity
//! search with exact `file_path` filtering.

pub mod chunker;
pub mod client;
pub(crate) mod context;
pub mod error;
pub mod in_memory;
pub mod languages;
pub mod qdrant;
pub mod record;
pub mod retriever;
pub mod scanner;
pub mod sync;
pub mod watcher;

pub use error::{IndexError, Result};
