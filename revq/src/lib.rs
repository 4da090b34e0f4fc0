//! # revq: SQS-style queues over a revisioned document store
//!
//! Each queue is a store container holding one document per message.
//! Receiving a message writes a lock record into its document; the
//! revision produced by that write is the receipt token the consumer must
//! present to delete the message or extend its visibility timeout.
//!
//! There is no lock manager and no shared memory between consumers. The
//! store's compare-and-swap writes decide every race:
//!
//! ```text
//!   send ──► PENDING ──receive──► LOCKED ──delete──► (gone)
//!                                  │  ▲
//!                                  └──┘ change_message_visibility
//!                                       (new receipt token)
//! ```
//!
//! A lock whose visibility timeout has elapsed is not reclaimed
//! automatically. It stays locked until deleted or taken over with
//! [`Queue::receive_by_id`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use revq::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> QueueResult<()> {
//! let store = Arc::new(MemoryDocStore::new());
//! let service = QueueService::new(store, QueueConfig::new("worker-1"));
//!
//! let queue = service.get_or_create_queue("invoices").await?;
//! queue.send(&b"invoice #1"[..]).await?;
//!
//! if let Some(message) = queue.receive_message().await? {
//!     assert_eq!(message.payload().as_ref(), b"invoice #1");
//!     queue.delete_message(message.message_id(), message.receipt_token()).await?;
//! }
//! assert_eq!(queue.number_of_messages_pending().await?, 0);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod lock;
pub mod queue;
pub mod schema;
pub mod types;

#[cfg(feature = "tracing-basic")]
pub mod observability;

pub use catalog::{is_valid_queue_name, QueueService};
pub use config::{default_process_id, QueueConfig, DEFAULT_ENV_PREFIX, DEFAULT_VISIBILITY_TIMEOUT};
pub use error::{QueueError, QueueResult};
pub use lock::{LockProtocol, VisibilityChange};
pub use queue::{BoxStream, DeliveryOrder, Queue, ReceiveRequest};
pub use types::{LockRecord, Message, MessageFields, MessageId, MessageStatus, QueueEvent, ReceiptToken};

pub use revq_store;

pub mod prelude {
    pub use crate::{
        DeliveryOrder, Message, MessageId, MessageStatus, Queue, QueueConfig, QueueError,
        QueueEvent, QueueResult, QueueService, ReceiptToken, ReceiveRequest,
    };

    pub use revq_store::{DocumentStore, MemoryDocStore};

    #[cfg(feature = "couchdb")]
    pub use revq_store::{CouchDbConfig, CouchDbStore};
}
