//! # revq-store: revisioned document store contract
//!
//! The storage primitives a revq queue is built on. A store holds named
//! containers of JSON documents; every document carries an opaque revision
//! that the store replaces on each successful write. Writes name the
//! revision they expect, which turns every update and delete into a
//! compare-and-swap.
//!
//! ```text
//! ┌──────────────────┐
//! │   revq::Queue    │  ← lock protocol, message lifecycle
//! ├──────────────────┤
//! │  DocumentStore   │  ← CAS writes, bulk writes, attachments, indexes
//! ├──────────────────┤
//! │ Memory / CouchDB │  ← concrete backends
//! └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use revq_store::prelude::*;
//! use serde_json::Map;
//!
//! # #[tokio::main]
//! # async fn main() -> StoreResult<()> {
//! let store = MemoryDocStore::new();
//! store.create_container("jobs").await?;
//!
//! let id = store.next_id().await?;
//! let rev = store.create("jobs", &id, Map::new()).await?;
//!
//! // A write against a stale revision is refused
//! let doc = Document::new(id.clone(), Map::new()).with_rev(rev);
//! store.update("jobs", &doc).await?;
//! assert!(store.update("jobs", &doc).await.unwrap_err().is_conflict());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

#[cfg(feature = "couchdb")]
pub mod couchdb;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryDocStore;
pub use store::DocumentStore;
pub use types::{
    collate, lookup, Body, BulkOutcome, DesignDoc, DocId, Document, FieldFilter, IndexQuery,
    IndexSpec, Revision, SortDirection,
};

#[cfg(feature = "couchdb")]
pub use couchdb::{CouchDbConfig, CouchDbStore};

pub mod prelude {
    pub use crate::{
        BulkOutcome, DesignDoc, DocId, Document, DocumentStore, FieldFilter, IndexQuery,
        IndexSpec, MemoryDocStore, Revision, StoreError, StoreResult,
    };

    #[cfg(feature = "couchdb")]
    pub use crate::{CouchDbConfig, CouchDbStore};
}
