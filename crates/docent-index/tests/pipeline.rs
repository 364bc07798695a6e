use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use docent_index::chunker::Chunker;
use docent_index::client::IndexClient;
use docent_index::in_memory::InMemoryIndex;
use docent_index::record::{FileRecord, normalize_path};
use docent_index::retriever::{RetrievalConfig, RetrievalGateway, format_for_tool};
use docent_index::scanner::{ScanConfig, Scanner};
use docent_index::sync::{FileOutcome, SyncConfig, Synchronizer};
use docent_index::IndexError;
use docent_llm::mock::MockEmbedder;

struct Harness {
    index: Arc<InMemoryIndex>,
    scanner: Scanner,
    sync: Synchronizer<MockEmbedder>,
    gateway: RetrievalGateway<MockEmbedder>,
}

fn harness() -> Harness {
    let index = Arc::new(InMemoryIndex::default());
    let embedder = Arc::new(MockEmbedder::default());
    let client = Arc::clone(&index) as Arc<dyn IndexClient>;
    Harness {
        scanner: Scanner::new(Chunker::default(), ScanConfig::default()),
        sync: Synchronizer::new(Arc::clone(&client), Arc::clone(&embedder), SyncConfig::default()),
        gateway: RetrievalGateway::new(client, embedder, RetrievalConfig::default()),
        index,
    }
}

fn python_source(functions: usize, body_lines: usize, tag: &str) -> String {
    let mut src = String::new();
    for f in 0..functions {
        src.push_str(&format!("def {tag}_{f}(value):\n"));
        for l in 0..body_lines {
            src.push_str(&format!("    step_{l} = value * {l}\n"));
        }
        src.push_str("    return value\n\n");
    }
    src
}

fn bump_mtime(path: &Path, secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

fn abs(path: &Path) -> String {
    normalize_path(&std::path::absolute(path).unwrap())
}

#[tokio::test]
async fn second_pass_over_unchanged_corpus_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.py"), python_source(3, 10, "alpha")).unwrap();
    fs::create_dir_all(dir.path().join("web")).unwrap();
    fs::write(
        dir.path().join("web/app.js"),
        "function start() {\n  return 1;\n}\n",
    )
    .unwrap();
    let h = harness();

    let first = h
        .sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    assert!(first.inserted_count > 0);
    assert_eq!(first.deleted_count, 0);
    let stored = h.index.len();
    assert_eq!(stored, first.inserted_count);

    let second = h
        .sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(second.inserted_count, 0);
    assert_eq!(second.deleted_count, 0);
    assert_eq!(second.unchanged(), 2);
    assert_eq!(h.index.len(), stored);
}

#[tokio::test]
async fn modified_file_is_replaced_wholesale() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.py");
    let b = dir.path().join("b.py");
    fs::write(&a, python_source(4, 20, "first")).unwrap();
    fs::write(&b, python_source(1, 3, "other")).unwrap();
    let h = harness();

    h.sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    let old_a = h.index.ids_for(&abs(&a));
    let old_b = h.index.ids_for(&abs(&b));
    assert!(!old_a.is_empty());

    fs::write(&a, python_source(2, 5, "second")).unwrap();
    bump_mtime(&a, 10);
    let new_record = FileRecord::build(&a, &Chunker::default()).await.unwrap();
    let new_chunks = new_record.chunks.len();

    let summary = h
        .sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(summary.deleted_count, old_a.len());
    assert_eq!(summary.inserted_count, new_chunks);
    assert_eq!(summary.outcomes[&abs(&b)], FileOutcome::Unchanged);

    let now_a = h.index.ids_for(&abs(&a));
    assert_eq!(now_a.len(), new_chunks);
    assert!(now_a.iter().all(|id| !old_a.contains(id)));
    assert_eq!(h.index.ids_for(&abs(&b)), old_b);

    let texts: Vec<String> = h
        .gateway
        .retrieve(None, Some(&abs(&a)))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.chunk.text)
        .collect();
    assert!(texts.iter().any(|t| t.contains("def second_0")));
    assert!(texts.iter().all(|t| !t.contains("def first_")));
}

#[tokio::test]
async fn identical_content_at_two_paths_is_independent() {
    let dir = tempfile::tempdir().unwrap();
    let one = dir.path().join("one.py");
    let two = dir.path().join("two.py");
    let source = python_source(2, 4, "same");
    fs::write(&one, &source).unwrap();
    fs::write(&two, &source).unwrap();
    let h = harness();

    h.sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    let two_ids = h.index.ids_for(&abs(&two));
    assert!(!two_ids.is_empty());
    assert_eq!(h.index.ids_for(&abs(&one)).len(), two_ids.len());

    fs::write(&one, python_source(1, 2, "changed")).unwrap();
    bump_mtime(&one, 10);
    h.sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(h.index.ids_for(&abs(&two)), two_ids);

    h.sync.remove_file(&abs(&one)).await.unwrap();
    assert!(h.index.ids_for(&abs(&one)).is_empty());
    assert_eq!(h.index.ids_for(&abs(&two)), two_ids);
}

#[tokio::test]
async fn retrieval_modes() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.py");
    fs::write(
        &a,
        "def parse_tokens(stream):\n    return stream.split()\n\n\ndef render(tree):\n    return str(tree)\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b.js"),
        "function parseTokens(text) {\n  return text.split(' ');\n}\n",
    )
    .unwrap();
    let h = harness();
    h.sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();

    let err = h.gateway.retrieve(None, None).await.unwrap_err();
    assert!(matches!(err, IndexError::InvalidQuery(_)));

    let a_path = abs(&a);
    let by_file = h.gateway.retrieve(None, Some(&a_path)).await.unwrap();
    assert!(!by_file.is_empty());
    assert!(by_file.iter().all(|r| r.chunk.file_path == a_path));

    let ranked = h.gateway.retrieve(Some("parse tokens"), None).await.unwrap();
    assert!(!ranked.is_empty() && ranked.len() <= 10);
    for pair in ranked.windows(2) {
        assert!(pair[0].score.unwrap() >= pair[1].score.unwrap());
    }

    let filtered = h
        .gateway
        .retrieve(Some("parse tokens"), Some(&a_path))
        .await
        .unwrap();
    assert!(!filtered.is_empty() && filtered.len() <= 10);
    assert!(filtered.iter().all(|r| r.chunk.file_path == a_path));

    let rendered = format_for_tool(&filtered);
    assert!(rendered.contains(&a_path));
}

#[tokio::test]
async fn file_lookup_accepts_relative_paths() {
    let cwd = std::env::current_dir().unwrap();
    let dir = tempfile::tempdir_in(&cwd).unwrap();
    let a = dir.path().join("rel.py");
    fs::write(&a, python_source(2, 4, "rel")).unwrap();
    let h = harness();
    h.sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();

    let relative = a.strip_prefix(&cwd).unwrap();
    assert!(relative.is_relative());
    let hits = h.gateway.retrieve(None, relative.to_str()).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits.len(), h.index.ids_for(&abs(&a)).len());
    assert!(hits.iter().all(|r| r.chunk.file_path == abs(&a)));

    let filtered = h
        .gateway
        .retrieve(Some("rel step value"), relative.to_str())
        .await
        .unwrap();
    assert!(!filtered.is_empty());
}

#[tokio::test]
async fn hundred_line_python_file_windows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.py");
    // 4 * (1 + 23 + 1 + 1) = 104 lines
    fs::write(&path, python_source(4, 23, "block")).unwrap();

    let record = FileRecord::build(&path, &Chunker::default()).await.unwrap();
    assert!(record.total_lines >= 100);
    assert!(record.chunks.len() >= record.total_lines.div_ceil(24));
    for (i, chunk) in record.chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i + 1);
        assert!(chunk.line_length <= 24);
        assert!(chunk.char_length <= 1024);
    }
    assert!(record.chunks.last().unwrap().is_last_chunk);
    assert_eq!(record.chunks.iter().filter(|c| c.is_last_chunk).count(), 1);
}

#[tokio::test]
async fn failed_query_leaves_file_for_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.py");
    fs::write(&a, "x = 1\n").unwrap();
    let h = harness();
    h.index.fail_queries_for(abs(&a));

    let summary = h
        .sync
        .reconcile(h.scanner.scan(dir.path()).await.unwrap())
        .await
        .unwrap();
    assert!(matches!(summary.outcomes[&abs(&a)], FileOutcome::Rejected(_)));
    assert!(h.index.is_empty());
}
