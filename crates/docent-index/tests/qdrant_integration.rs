//! Live Qdrant tests. Run with `cargo test -- --ignored` and a Docker daemon.

use std::sync::Arc;

use docent_index::client::{FieldFilter, IndexClient, NewEntry, Payload};
use docent_index::qdrant::QdrantIndex;
use docent_index::retriever::{RetrievalConfig, RetrievalGateway};
use docent_index::scanner::{ScanConfig, Scanner};
use docent_index::chunker::Chunker;
use docent_index::sync::{SyncConfig, Synchronizer};
use docent_llm::mock::MockEmbedder;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup(collection: &str) -> (QdrantIndex, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let index = QdrantIndex::new(&format!("http://127.0.0.1:{grpc_port}"), collection).unwrap();
    index.ensure_collection(32).await.unwrap();
    (index, container)
}

fn entry(path: &str, vector: Vec<f32>) -> NewEntry {
    NewEntry {
        vector,
        payload: Payload::from([
            ("file_path".into(), serde_json::json!(path)),
            ("file_last_updated_at".into(), serde_json::json!(1_700_000_000.5)),
        ]),
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn ensure_collection_is_idempotent() {
    let (index, _container) = setup("idempotent").await;
    index.ensure_collection(32).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn insert_query_delete() {
    let (index, _container) = setup("crud").await;
    let mut v = vec![0.0; 32];
    v[0] = 1.0;
    let ids = index
        .insert(vec![entry("/a.py", v.clone()), entry("/b.py", v.clone())])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let rows = index
        .query_by_filter(FieldFilter::file_path("/a.py"), 1000)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].f64_field("file_last_updated_at"), Some(1_700_000_000.5));

    let hits = index
        .similarity_search(v, 10, Some(FieldFilter::file_path("/b.py")))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    index.delete_by_ids(vec![ids[0].clone()]).await.unwrap();
    assert!(
        index
            .query_by_filter(FieldFilter::file_path("/a.py"), 1000)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn full_pipeline_against_qdrant() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("m.py"),
        "def parse_tokens(s):\n    return s.split()\n",
    )
    .unwrap();

    let (index, _container) = setup("pipeline").await;
    let client: Arc<dyn IndexClient> = Arc::new(index);
    let embedder = Arc::new(MockEmbedder::default());
    let sync = Synchronizer::new(Arc::clone(&client), Arc::clone(&embedder), SyncConfig::default());
    let scanner = Scanner::new(Chunker::default(), ScanConfig::default());

    let first = sync
        .reconcile(scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    assert!(first.inserted_count > 0);
    let second = sync
        .reconcile(scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(second.inserted_count + second.deleted_count, 0);

    let gateway = RetrievalGateway::new(client, embedder, RetrievalConfig::default());
    let hits = gateway.retrieve(Some("parse tokens"), None).await.unwrap();
    assert!(!hits.is_empty());
}
