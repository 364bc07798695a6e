//! Text sent to the embedding provider.
//!
//! The stored `text` stays the raw window; only the embedding input gets a
//! header with the file path, language and position, so that queries naming
//! a file or module land on its chunks.

use crate::record::Chunk;

#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk, total_chunks: usize) -> String {
    let mut text = String::with_capacity(chunk.text.len() + 128);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    text.push_str("# Language: ");
    text.push_str(chunk.file_type.id());
    text.push('\n');

    text.push_str(&format!("# Chunk {} of {total_chunks}\n", chunk.chunk_index));

    text.push_str(&chunk.text);
    text
}
