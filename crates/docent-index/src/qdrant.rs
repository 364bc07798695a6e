//! Qdrant-backed [`IndexClient`].

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointId, PointStruct, PointsIdsList, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, point_id::PointIdOptions,
    value::Kind,
};

use crate::client::{
    BoxFuture, FieldFilter, IndexClient, IndexClientError, IndexEntry, NewEntry,
    Payload, ScoredEntry,
};

/// Largest scroll page requested from Qdrant.
const SCROLL_PAGE: u64 = 256;

#[derive(Clone)]
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl QdrantIndex {
    /// Create a client for `collection` on the Qdrant instance at `url`.
    ///
    /// No request is sent until the first operation.
    ///
    /// # Errors
    ///
    /// Returns [`IndexClientError::Connection`] if the URL is invalid.
    pub fn new(url: &str, collection: impl Into<String>) -> Result<Self, IndexClientError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| IndexClientError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            collection: collection.into(),
        })
    }
}

impl IndexClient for QdrantIndex {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn ensure_collection(&self, vector_size: u64) -> BoxFuture<'_, Result<(), IndexClientError>> {
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&self.collection)
                .await
                .map_err(|e| IndexClientError::Connection(e.to_string()))?;
            if exists {
                return Ok(());
            }

            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| IndexClientError::Collection(e.to_string()))?;

            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    "file_path",
                    FieldType::Keyword,
                ))
                .await
                .map_err(|e| IndexClientError::Collection(e.to_string()))?;

            tracing::info!(collection = %self.collection, vector_size, "created collection");
            Ok(())
        })
    }

    fn query_by_filter(
        &self,
        filter: FieldFilter,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<IndexEntry>, IndexClientError>> {
        Box::pin(async move {
            let qdrant_filter = field_filter_to_qdrant(filter);
            let mut rows = Vec::new();
            let mut offset: Option<PointId> = None;

            while (rows.len() as u64) < limit {
                let page = (limit - rows.len() as u64).min(SCROLL_PAGE);
                let mut builder = ScrollPointsBuilder::new(&self.collection)
                    .filter(qdrant_filter.clone())
                    .with_payload(true)
                    .with_vectors(false)
                    .limit(u32::try_from(page).unwrap_or(u32::MAX));
                if let Some(off) = offset.take() {
                    builder = builder.offset(off);
                }

                let response = self
                    .client
                    .scroll(builder)
                    .await
                    .map_err(|e| IndexClientError::Query(e.to_string()))?;

                for point in response.result {
                    rows.push(IndexEntry {
                        id: point_id_to_string(point.id),
                        payload: payload_to_json(point.payload),
                    });
                }

                match response.next_page_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }

            Ok(rows)
        })
    }

    fn similarity_search(
        &self,
        vector: Vec<f32>,
        top_k: u64,
        filter: Option<FieldFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, IndexClientError>> {
        Box::pin(async move {
            let mut builder =
                SearchPointsBuilder::new(&self.collection, vector, top_k).with_payload(true);
            if let Some(f) = filter {
                builder = builder.filter(field_filter_to_qdrant(f));
            }
            let response = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| IndexClientError::Search(e.to_string()))?;

            Ok(response
                .result
                .into_iter()
                .map(|point| ScoredEntry {
                    id: point_id_to_string(point.id),
                    score: point.score,
                    payload: payload_to_json(point.payload),
                })
                .collect())
        })
    }

    fn insert(
        &self,
        entries: Vec<NewEntry>,
    ) -> BoxFuture<'_, Result<Vec<String>, IndexClientError>> {
        Box::pin(async move {
            if entries.is_empty() {
                return Ok(Vec::new());
            }

            let mut ids = Vec::with_capacity(entries.len());
            let mut points = Vec::with_capacity(entries.len());
            for entry in entries {
                let id = uuid::Uuid::new_v4().to_string();
                points.push(PointStruct::new(
                    id.clone(),
                    entry.vector,
                    json_to_payload(entry.payload)?,
                ));
                ids.push(id);
            }

            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
                .await
                .map_err(|e| IndexClientError::Insert(e.to_string()))?;
            Ok(ids)
        })
    }

    fn delete_by_ids(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), IndexClientError>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(PointsIdsList { ids })
                        .wait(true),
                )
                .await
                .map_err(|e| IndexClientError::Delete(e.to_string()))?;
            Ok(())
        })
    }
}

fn field_filter_to_qdrant(filter: FieldFilter) -> Filter {
    let conditions: Vec<Condition> = filter
        .must
        .into_iter()
        .map(|cond| Condition::matches(cond.field, cond.value))
        .collect();
    Filter::must(conditions)
}

fn json_to_payload(
    payload: Payload,
) -> Result<HashMap<String, qdrant_client::qdrant::Value>, IndexClientError> {
    serde_json::from_value(serde_json::Value::Object(payload.into_iter().collect()))
        .map_err(|e| IndexClientError::Serialization(e.to_string()))
}

fn payload_to_json(payload: HashMap<String, qdrant_client::qdrant::Value>) -> Payload {
    payload
        .into_iter()
        .filter_map(|(k, v)| {
            let json_val = match v.kind? {
                Kind::StringValue(s) => serde_json::Value::String(s),
                Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
                Kind::DoubleValue(d) => {
                    serde_json::Number::from_f64(d).map(serde_json::Value::Number)?
                }
                Kind::BoolValue(b) => serde_json::Value::Bool(b),
                _ => return None,
            };
            Some((k, json_val))
        })
        .collect()
}

fn point_id_to_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}
