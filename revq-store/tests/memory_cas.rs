use std::sync::Arc;

use serde_json::{json, Value};

use revq_store::{Body, Document, DocumentStore, MemoryDocStore};

fn body(value: Value) -> Body {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

/// Concurrent writers against the same revision: exactly one wins
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_winner_per_revision() {
    let store = Arc::new(MemoryDocStore::new());
    store.create_container("c").await.unwrap();
    let id = store.next_id().await.unwrap();
    let rev = store.create("c", &id, body(json!({"owner": null}))).await.unwrap();

    let mut handles = Vec::new();
    for writer in 0..16 {
        let store = store.clone();
        let doc = Document::new(id.clone(), body(json!({ "owner": writer }))).with_rev(rev.clone());
        handles.push(tokio::spawn(async move { store.update("c", &doc).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error: {}", e),
        }
    }
    assert_eq!(winners, 1);
}

/// Overlapping bulk writes never both claim the same document
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_bulk_writes_partition_documents() {
    let store = Arc::new(MemoryDocStore::new());
    store.create_container("c").await.unwrap();

    let mut docs = Vec::new();
    for _ in 0..20 {
        let id = store.next_id().await.unwrap();
        let rev = store.create("c", &id, Body::new()).await.unwrap();
        docs.push(Document::new(id, Body::new()).with_rev(rev));
    }
    let docs = Arc::new(docs);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let docs = docs.clone();
        handles.push(tokio::spawn(async move { store.bulk_update("c", &docs).await.unwrap() }));
    }

    let mut saved = 0;
    for handle in handles {
        let outcomes = handle.await.unwrap();
        assert_eq!(outcomes.len(), 20);
        saved += outcomes.iter().filter(|o| o.is_saved()).count();
    }
    assert_eq!(saved, 20);
}
