use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::Rng;
use tracing::trace;
use uuid::Uuid;

use crate::{
    collate, Body, BulkOutcome, DesignDoc, DocId, Document, DocumentStore, IndexQuery, Revision,
    SortDirection, StoreError, StoreResult,
};

struct StoredDoc {
    generation: u64,
    rev: Revision,
    body: Body,
    attachments: HashMap<String, Bytes>,
}

impl StoredDoc {
    fn new(body: Body) -> Self {
        Self {
            generation: 1,
            rev: revision(1),
            body,
            attachments: HashMap::new(),
        }
    }

    /// Advance to the next revision
    fn bump(&mut self) -> Revision {
        self.generation += 1;
        self.rev = revision(self.generation);
        self.rev.clone()
    }

    fn snapshot(&self, id: &DocId) -> Document {
        Document::new(id.clone(), self.body.clone()).with_rev(self.rev.clone())
    }
}

#[derive(Default)]
struct Container {
    docs: HashMap<DocId, StoredDoc>,
    designs: HashMap<String, DesignDoc>,
}

impl Container {
    /// Compare-and-swap write of one document, the core of `update` and `bulk_update`
    fn write(&mut self, doc: &Document) -> StoreResult<Revision> {
        match (self.docs.get_mut(&doc.id), &doc.rev) {
            (Some(stored), Some(expected)) if stored.rev == *expected => {
                stored.body = doc.body.clone();
                Ok(stored.bump())
            }
            (Some(_), _) => Err(StoreError::conflict(doc.id.to_string())),
            (None, Some(_)) => Err(StoreError::not_found(doc.id.to_string())),
            (None, None) => {
                let stored = StoredDoc::new(doc.body.clone());
                let rev = stored.rev.clone();
                self.docs.insert(doc.id.clone(), stored);
                Ok(rev)
            }
        }
    }
}

type Containers = HashMap<String, Container>;

fn revision(generation: u64) -> Revision {
    Revision(format!("{}-{}", generation, Uuid::new_v4().simple()))
}

fn random_prefix() -> String {
    let mut rng = rand::thread_rng();
    (0..26)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// In-memory document store for testing and development
///
/// All state sits behind one lock, so each document write and each bulk
/// write is atomic with respect to every other caller sharing the store.
/// Clones share the same underlying data.
#[derive(Clone)]
pub struct MemoryDocStore {
    containers: Arc<RwLock<Containers>>,
    id_prefix: Arc<str>,
    id_counter: Arc<AtomicU64>,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self {
            containers: Arc::new(RwLock::new(HashMap::new())),
            id_prefix: random_prefix().into(),
            id_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn with_container<T>(
        &self,
        container: &str,
        f: impl FnOnce(&Container) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let containers = self.containers.read();
        let found = containers
            .get(container)
            .ok_or_else(|| StoreError::not_found(format!("container {}", container)))?;
        f(found)
    }

    fn with_container_mut<T>(
        &self,
        container: &str,
        f: impl FnOnce(&mut Container) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut containers = self.containers.write();
        let found = containers
            .get_mut(container)
            .ok_or_else(|| StoreError::not_found(format!("container {}", container)))?;
        f(found)
    }
}

impl Default for MemoryDocStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocStore {
    async fn container_exists(&self, container: &str) -> StoreResult<bool> {
        Ok(self.containers.read().contains_key(container))
    }

    async fn create_container(&self, container: &str) -> StoreResult<()> {
        let mut containers = self.containers.write();
        if containers.contains_key(container) {
            return Err(StoreError::conflict(format!("container {}", container)));
        }
        containers.insert(container.to_string(), Container::default());
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> StoreResult<()> {
        self.containers
            .write()
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("container {}", container)))
    }

    async fn list_containers(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.containers.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn put_design(&self, container: &str, design: &DesignDoc) -> StoreResult<()> {
        self.with_container_mut(container, |c| {
            c.designs.insert(design.name.clone(), design.clone());
            Ok(())
        })
    }

    async fn get_design(&self, container: &str, name: &str) -> StoreResult<Option<DesignDoc>> {
        self.with_container(container, |c| Ok(c.designs.get(name).cloned()))
    }

    async fn next_id(&self) -> StoreResult<DocId> {
        // Sequential ids: fixed random prefix, increasing suffix
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst);
        Ok(DocId(format!("{}{:06x}", self.id_prefix, n)))
    }

    async fn get(&self, container: &str, id: &DocId) -> StoreResult<Option<Document>> {
        self.with_container(container, |c| Ok(c.docs.get(id).map(|d| d.snapshot(id))))
    }

    async fn get_many(&self, container: &str, ids: &[DocId]) -> StoreResult<Vec<Document>> {
        self.with_container(container, |c| {
            Ok(ids
                .iter()
                .filter_map(|id| c.docs.get(id).map(|d| d.snapshot(id)))
                .collect())
        })
    }

    async fn create(&self, container: &str, id: &DocId, body: Body) -> StoreResult<Revision> {
        self.with_container_mut(container, |c| {
            if c.docs.contains_key(id) {
                return Err(StoreError::conflict(id.to_string()));
            }
            let stored = StoredDoc::new(body);
            let rev = stored.rev.clone();
            c.docs.insert(id.clone(), stored);
            Ok(rev)
        })
    }

    async fn update(&self, container: &str, doc: &Document) -> StoreResult<Revision> {
        if doc.rev.is_none() {
            return Err(StoreError::invalid(format!("update of {} without revision", doc.id)));
        }
        self.with_container_mut(container, |c| c.write(doc))
    }

    async fn delete(&self, container: &str, id: &DocId, rev: &Revision) -> StoreResult<()> {
        self.with_container_mut(container, |c| {
            let stored = c
                .docs
                .get(id)
                .ok_or_else(|| StoreError::not_found(id.to_string()))?;
            if stored.rev != *rev {
                return Err(StoreError::conflict(id.to_string()));
            }
            c.docs.remove(id);
            Ok(())
        })
    }

    async fn bulk_update(&self, container: &str, docs: &[Document]) -> StoreResult<Vec<BulkOutcome>> {
        self.with_container_mut(container, |c| {
            Ok(docs
                .iter()
                .map(|doc| match c.write(doc) {
                    Ok(rev) => BulkOutcome::Saved {
                        id: doc.id.clone(),
                        rev,
                    },
                    Err(e) => {
                        trace!(id = %doc.id, error = %e, "bulk write rejected");
                        let error = if e.is_conflict() { "conflict" } else { "not_found" };
                        BulkOutcome::Rejected {
                            id: doc.id.clone(),
                            error: error.to_string(),
                            reason: e.to_string(),
                        }
                    }
                })
                .collect())
        })
    }

    async fn put_attachment(
        &self,
        container: &str,
        id: &DocId,
        rev: &Revision,
        name: &str,
        _content_type: &str,
        data: Bytes,
    ) -> StoreResult<Revision> {
        self.with_container_mut(container, |c| {
            let stored = c
                .docs
                .get_mut(id)
                .ok_or_else(|| StoreError::not_found(id.to_string()))?;
            if stored.rev != *rev {
                return Err(StoreError::conflict(id.to_string()));
            }
            stored.attachments.insert(name.to_string(), data);
            Ok(stored.bump())
        })
    }

    async fn get_attachment(&self, container: &str, id: &DocId, name: &str) -> StoreResult<Bytes> {
        self.with_container(container, |c| {
            c.docs
                .get(id)
                .and_then(|d| d.attachments.get(name))
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("{}/{}", id, name)))
        })
    }

    async fn query_index(
        &self,
        container: &str,
        design: &str,
        index: &str,
        query: IndexQuery,
    ) -> StoreResult<Vec<Document>> {
        self.with_container(container, |c| {
            let spec = c
                .designs
                .get(design)
                .and_then(|d| d.index(index))
                .ok_or_else(|| StoreError::not_found(format!("index {}/{}", design, index)))?;

            let mut rows: Vec<(&serde_json::Value, &DocId, &StoredDoc)> = c
                .docs
                .iter()
                .filter_map(|(id, doc)| spec.key_of(&doc.body).map(|key| (key, id, doc)))
                .collect();

            rows.sort_by(|a, b| collate(a.0, b.0).then_with(|| a.1.cmp(b.1)));
            if query.direction == SortDirection::Descending {
                rows.reverse();
            }

            let limit = query.limit.unwrap_or(usize::MAX);
            Ok(rows
                .into_iter()
                .take(limit)
                .map(|(_, id, doc)| doc.snapshot(id))
                .collect())
        })
    }

    async fn count_index(&self, container: &str, design: &str, index: &str) -> StoreResult<u64> {
        self.with_container(container, |c| {
            let spec = c
                .designs
                .get(design)
                .and_then(|d| d.index(index))
                .ok_or_else(|| StoreError::not_found(format!("index {}/{}", design, index)))?;
            Ok(c.docs.values().filter(|doc| spec.filter.matches(&doc.body)).count() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldFilter, IndexSpec};
    use serde_json::{json, Value};

    fn body(value: Value) -> Body {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn store_with_container() -> MemoryDocStore {
        let store = MemoryDocStore::new();
        store.create_container("c").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_update_requires_current_revision() {
        let store = store_with_container().await;
        let id = store.next_id().await.unwrap();
        let rev1 = store.create("c", &id, body(json!({"n": 1}))).await.unwrap();

        let doc = Document::new(id.clone(), body(json!({"n": 2}))).with_rev(rev1.clone());
        let rev2 = store.update("c", &doc).await.unwrap();
        assert_ne!(rev1, rev2);

        // Writing against the old revision again must conflict
        let stale = store.update("c", &doc).await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_delete_distinguishes_not_found_and_conflict() {
        let store = store_with_container().await;
        let id = store.next_id().await.unwrap();
        let rev = store.create("c", &id, Body::new()).await.unwrap();

        let missing = store.delete("c", &DocId::from("nope"), &rev).await;
        assert!(missing.unwrap_err().is_not_found());

        let wrong = store.delete("c", &id, &Revision::from("1-bogus")).await;
        assert!(wrong.unwrap_err().is_conflict());

        store.delete("c", &id, &rev).await.unwrap();
        assert!(store.get("c", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_update_reports_each_document() {
        let store = store_with_container().await;
        let a = store.next_id().await.unwrap();
        let b = store.next_id().await.unwrap();
        let rev_a = store.create("c", &a, Body::new()).await.unwrap();
        store.create("c", &b, Body::new()).await.unwrap();

        let docs = vec![
            Document::new(a.clone(), body(json!({"x": 1}))).with_rev(rev_a),
            Document::new(b.clone(), body(json!({"x": 1}))).with_rev(Revision::from("1-stale")),
        ];
        let outcomes = store.bulk_update("c", &docs).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_saved());
        assert_eq!(outcomes[0].id(), &a);
        assert!(!outcomes[1].is_saved());
        assert_eq!(outcomes[1].id(), &b);
    }

    #[tokio::test]
    async fn test_attachment_survives_body_update() {
        let store = store_with_container().await;
        let id = store.next_id().await.unwrap();
        let rev = store.create("c", &id, Body::new()).await.unwrap();
        let rev = store
            .put_attachment("c", &id, &rev, "message", "application/octet-stream", Bytes::from_static(b"hi"))
            .await
            .unwrap();

        let doc = Document::new(id.clone(), body(json!({"lock": {}}))).with_rev(rev);
        store.update("c", &doc).await.unwrap();

        let data = store.get_attachment("c", &id, "message").await.unwrap();
        assert_eq!(&data[..], b"hi");
    }

    #[tokio::test]
    async fn test_attachment_writes_are_checked() {
        let store = store_with_container().await;
        let id = store.next_id().await.unwrap();
        let rev = store.create("c", &id, Body::new()).await.unwrap();

        let missing = store.get_attachment("c", &id, "message").await;
        assert!(missing.unwrap_err().is_not_found());

        let stale = store
            .put_attachment("c", &id, &Revision::from("1-stale"), "message", "text/plain", Bytes::from_static(b"x"))
            .await;
        assert!(stale.unwrap_err().is_conflict());

        let rev2 = store
            .put_attachment("c", &id, &rev, "message", "text/plain", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_ne!(rev, rev2);
        assert_eq!(store.get("c", &id).await.unwrap().unwrap().rev, Some(rev2));
        assert_eq!(&store.get_attachment("c", &id, "message").await.unwrap()[..], b"x");
    }

    #[tokio::test]
    async fn test_index_order_limit_and_count() {
        let store = store_with_container().await;
        let design = DesignDoc::new("d").with_index(IndexSpec::new(
            "pending",
            FieldFilter::Absent("/lock".into()),
            "/sent_at",
        ));
        store.put_design("c", &design).await.unwrap();

        let mut ids = Vec::new();
        for sent_at in [30, 10, 20] {
            let id = store.next_id().await.unwrap();
            store.create("c", &id, body(json!({"sent_at": sent_at}))).await.unwrap();
            ids.push(id);
        }
        let locked = store.next_id().await.unwrap();
        store
            .create("c", &locked, body(json!({"sent_at": 1, "lock": {"locked_by": "p"}})))
            .await
            .unwrap();

        let asc = store
            .query_index("c", "d", "pending", IndexQuery::ascending().with_limit(2))
            .await
            .unwrap();
        assert_eq!(asc.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec![ids[1].clone(), ids[2].clone()]);

        let desc = store
            .query_index("c", "d", "pending", IndexQuery::descending())
            .await
            .unwrap();
        assert_eq!(desc.first().map(|d| &d.id), Some(&ids[0]));

        assert_eq!(store.count_index("c", "d", "pending").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sequential_ids_sort_in_issue_order() {
        let store = MemoryDocStore::new();
        let first = store.next_id().await.unwrap();
        let second = store.next_id().await.unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let store = MemoryDocStore::new();
        store.create_container("a").await.unwrap();
        assert!(store.create_container("a").await.unwrap_err().is_conflict());
        assert!(store.container_exists("a").await.unwrap());
        assert_eq!(store.list_containers().await.unwrap(), vec!["a".to_string()]);
        store.delete_container("a").await.unwrap();
        assert!(store.delete_container("a").await.unwrap_err().is_not_found());
    }
}
