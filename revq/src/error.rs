use revq_store::StoreError;
use thiserror::Error;

use crate::MessageId;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by queues and the queue catalog
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    NoSuchQueue(String),

    #[error("Queue name already taken: {0}")]
    QueueNameAlreadyTaken(String),

    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("The queue has no message with ID {0}")]
    NoSuchMessage(MessageId),

    /// The caller's receipt token no longer matches the message's revision
    #[error("Receipt token for message {0} is out of date")]
    ReceiptTokenOutOfDate(MessageId),

    #[error("Message {0} is not locked")]
    MessageNotLocked(MessageId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Reclassify a store failure on a specific message
    ///
    /// Not-found becomes `NoSuchMessage`, a revision conflict becomes
    /// `ReceiptTokenOutOfDate`, anything else stays a store error.
    pub(crate) fn for_message(err: StoreError, id: &MessageId) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NoSuchMessage(id.clone()),
            StoreError::Conflict { .. } => Self::ReceiptTokenOutOfDate(id.clone()),
            other => Self::Store(other),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
