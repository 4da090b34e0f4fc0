use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    Body, BulkOutcome, DesignDoc, DocId, Document, IndexQuery, Revision, StoreResult,
};

/// Revisioned document store primitives
///
/// Every write that names a revision is a compare-and-swap: it succeeds only
/// if that revision is still current, and reports `StoreError::Conflict`
/// otherwise. Every successful write yields a fresh revision.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check whether a container exists
    async fn container_exists(&self, container: &str) -> StoreResult<bool>;

    /// Create an empty container, `Conflict` if the name is taken
    async fn create_container(&self, container: &str) -> StoreResult<()>;

    /// Drop a container and everything in it, `NotFound` if missing
    async fn delete_container(&self, container: &str) -> StoreResult<()>;

    /// Names of all containers
    async fn list_containers(&self) -> StoreResult<Vec<String>>;

    /// Install (or replace) a design document with index definitions
    async fn put_design(&self, container: &str, design: &DesignDoc) -> StoreResult<()>;

    /// Fetch a design document, `None` if not installed
    async fn get_design(&self, container: &str, name: &str) -> StoreResult<Option<DesignDoc>>;

    /// Issue a fresh document identifier
    async fn next_id(&self) -> StoreResult<DocId>;

    /// Fetch a document, `None` if absent
    async fn get(&self, container: &str, id: &DocId) -> StoreResult<Option<Document>>;

    /// Fetch several documents in request order, skipping absent ones
    async fn get_many(&self, container: &str, ids: &[DocId]) -> StoreResult<Vec<Document>>;

    /// Create a document under a caller-chosen id, `Conflict` if it exists
    async fn create(&self, container: &str, id: &DocId, body: Body) -> StoreResult<Revision>;

    /// Replace a document's body, expecting `doc.rev` to be current
    async fn update(&self, container: &str, doc: &Document) -> StoreResult<Revision>;

    /// Delete a document, expecting `rev` to be current
    async fn delete(&self, container: &str, id: &DocId, rev: &Revision) -> StoreResult<()>;

    /// Write many documents at once, each against its own expected revision
    ///
    /// Returns one outcome per input document, in input order. A rejected
    /// document does not abort the rest of the batch.
    async fn bulk_update(&self, container: &str, docs: &[Document]) -> StoreResult<Vec<BulkOutcome>>;

    /// Attach opaque bytes to a document, expecting `rev` to be current
    async fn put_attachment(
        &self,
        container: &str,
        id: &DocId,
        rev: &Revision,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> StoreResult<Revision>;

    /// Fetch an attachment's bytes
    async fn get_attachment(&self, container: &str, id: &DocId, name: &str) -> StoreResult<Bytes>;

    /// Documents in an index, ordered by `(key, id)` in the query's direction
    async fn query_index(
        &self,
        container: &str,
        design: &str,
        index: &str,
        query: IndexQuery,
    ) -> StoreResult<Vec<Document>>;

    /// Number of documents in an index, without reading them
    async fn count_index(&self, container: &str, design: &str, index: &str) -> StoreResult<u64>;
}
