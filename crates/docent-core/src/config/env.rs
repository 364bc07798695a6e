use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_index();
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("DOCENT_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid DOCENT_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCENT_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("DOCENT_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Ok(v) = std::env::var("DOCENT_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        } else if self.embedding.api_key.is_none()
            && let Ok(v) = std::env::var("GEMINI_API_KEY")
        {
            self.embedding.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("DOCENT_EMBEDDING_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.embedding.timeout_secs = secs;
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("DOCENT_INDEX_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.index.backend = backend;
            } else {
                tracing::warn!("ignoring invalid DOCENT_INDEX_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCENT_QDRANT_URL") {
            self.index.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("DOCENT_COLLECTION") {
            self.index.collection = v;
        }
        if let Ok(v) = std::env::var("DOCENT_VECTOR_SIZE")
            && let Ok(size) = v.parse::<u64>()
        {
            self.index.vector_size = size;
        }
        if let Ok(v) = std::env::var("DOCENT_REMOTE_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.index.remote_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("DOCENT_CHANGE_DETECTION") {
            if let Ok(mode) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.sync.change_detection = mode;
            } else {
                tracing::warn!("ignoring invalid DOCENT_CHANGE_DETECTION value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DOCENT_TOP_K")
            && let Ok(k) = v.parse::<u64>()
        {
            self.retrieval.top_k = k;
        }
        if let Ok(v) = std::env::var("DOCENT_WATCH_DEBOUNCE_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.watch.debounce_ms = ms;
        }
    }
}
