mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunker.chunk_lines == 0 {
            bail!("chunker.chunk_lines must be greater than 0");
        }
        if self.chunker.chunk_lines_overlap >= self.chunker.chunk_lines {
            bail!(
                "chunker.chunk_lines_overlap ({}) must be smaller than chunker.chunk_lines ({})",
                self.chunker.chunk_lines_overlap,
                self.chunker.chunk_lines
            );
        }
        if self.chunker.max_chars == 0 {
            bail!("chunker.max_chars must be greater than 0");
        }
        if self.index.collection.trim().is_empty() {
            bail!("index.collection must not be empty");
        }
        if self.index.vector_size == 0 {
            bail!("index.vector_size must be greater than 0");
        }
        if self.index.remote_timeout_secs == 0 || self.embedding.timeout_secs == 0 {
            bail!("timeouts must be greater than 0 seconds");
        }
        if self.scan.concurrency == 0 || self.sync.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }
        if self.retrieval.file_query_limit == 0 {
            bail!("retrieval.file_query_limit must be greater than 0");
        }
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be greater than 0");
        }
        Ok(())
    }
}
