//! Embedding provider abstraction and backend implementations.
//!
//! The indexing engine only needs one capability from a model backend:
//! turning a string into a fixed-length vector. Each backend implements
//! [`EmbeddingProvider`]; [`any::AnyEmbedder`] dispatches over them so the
//! backend can be picked from configuration at runtime.

pub mod any;
pub mod error;
pub mod gemini;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use error::LlmError;
pub use provider::EmbeddingProvider;
