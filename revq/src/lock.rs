use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use revq_store::{Body, BulkOutcome, DocId, Document, DocumentStore, Revision, StoreError};
use tracing::{debug, instrument, warn};

use crate::{
    schema::PAYLOAD_ATTACHMENT, LockRecord, Message, MessageFields, MessageId, QueueError,
    QueueResult, ReceiptToken,
};

/// Result of a successful visibility extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityChange {
    /// Replaces the token that was presented
    pub receipt_token: ReceiptToken,
    /// Visibility timeout now stored on the lock
    pub visibility_timeout: Duration,
}

/// Lock acquisition and release over compare-and-swap writes
///
/// There is no lock manager: ownership of a message is whoever last
/// managed to write a lock record against its current revision. Conflicts
/// reported by the store are what tell racing processes apart.
pub struct LockProtocol<S: DocumentStore + ?Sized> {
    store: Arc<S>,
    container: String,
    owner: String,
}

impl<S: DocumentStore + ?Sized> Clone for LockProtocol<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            container: self.container.clone(),
            owner: self.owner.clone(),
        }
    }
}

fn attach_lock(body: &mut Body, lock: &LockRecord) -> QueueResult<()> {
    body.insert("lock".to_string(), serde_json::to_value(lock)?);
    Ok(())
}

impl<S: DocumentStore + ?Sized> LockProtocol<S> {
    pub fn new(store: Arc<S>, container: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Build a lock record owned by this process, taken now
    pub fn create_lock(&self, visibility_timeout: Duration) -> LockRecord {
        LockRecord::new(self.owner.clone(), visibility_timeout)
    }

    /// Lock one message by id
    ///
    /// Returns `Ok(None)` if another write to the message landed between
    /// our read and our lock write. If the payload cannot be read the lock
    /// is undone before the error is returned.
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn lock_single(&self, id: &MessageId, visibility_timeout: Duration) -> QueueResult<Option<Message>> {
        let doc_id = id.to_doc_id();
        let mut doc = self
            .store
            .get(&self.container, &doc_id)
            .await?
            .ok_or_else(|| QueueError::NoSuchMessage(id.clone()))?;

        let original = doc.body.clone();
        let lock = self.create_lock(visibility_timeout);
        attach_lock(&mut doc.body, &lock)?;
        let fields = MessageFields::from_body(&doc.body)?;

        let rev = match self.store.update(&self.container, &doc).await {
            Ok(rev) => rev,
            Err(StoreError::Conflict { .. }) => {
                debug!(message_id = %id, "lock lost to a concurrent write");
                return Ok(None);
            }
            Err(StoreError::NotFound { .. }) => return Err(QueueError::NoSuchMessage(id.clone())),
            Err(e) => return Err(e.into()),
        };

        let payload = match self.fetch_payload(id).await {
            Ok(payload) => payload,
            Err(e) => {
                self.undo_lock(doc_id, rev, original).await;
                return Err(e);
            }
        };
        debug!(message_id = %id, "message locked");
        Ok(Some(Message::new(id.clone(), rev.into(), fields, payload)))
    }

    /// Try to lock every candidate in a single bulk write
    ///
    /// Only the candidates whose write succeeded come back, in candidate
    /// order. Losers are dropped without retry; callers that want more
    /// messages query again. Candidates that are not message documents are
    /// skipped, and so are messages whose payload cannot be read once
    /// locked: their lock is undone so the rest of the batch is unaffected.
    #[instrument(skip(self, candidates), fields(container = %self.container, candidates = candidates.len()))]
    pub async fn lock_batch(&self, candidates: Vec<Document>, visibility_timeout: Duration) -> QueueResult<Vec<Message>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let lock = self.create_lock(visibility_timeout);
        let lock_value = serde_json::to_value(&lock)?;

        let mut pending: HashMap<DocId, (MessageFields, Body)> = HashMap::with_capacity(candidates.len());
        let mut docs = Vec::with_capacity(candidates.len());
        for mut doc in candidates {
            let original = doc.body.clone();
            doc.body.insert("lock".to_string(), lock_value.clone());
            match MessageFields::from_body(&doc.body) {
                Ok(fields) => {
                    pending.insert(doc.id.clone(), (fields, original));
                    docs.push(doc);
                }
                Err(e) => {
                    debug!(doc_id = %doc.id, error = %e, "skipping document that is not a message");
                }
            }
        }

        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = self.store.bulk_update(&self.container, &docs).await?;

        let mut messages = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                BulkOutcome::Saved { id, rev } => {
                    let Some((fields, original)) = pending.remove(&id) else {
                        continue;
                    };
                    let message_id = MessageId::from(id.clone());
                    // Payloads are only fetched for messages we actually own
                    match self.fetch_payload(&message_id).await {
                        Ok(payload) => messages.push(Message::new(message_id, rev.into(), fields, payload)),
                        Err(e) => {
                            warn!(message_id = %message_id, error = %e, "payload unreadable, message skipped");
                            self.undo_lock(id, rev, original).await;
                        }
                    }
                }
                BulkOutcome::Rejected { id, error, .. } => {
                    debug!(message_id = %id, error = %error, "lock lost to a concurrent write");
                }
            }
        }

        debug!(locked = messages.len(), "batch lock finished");
        Ok(messages)
    }

    /// Put back the body a message had before our lock write
    ///
    /// Written against the revision our lock produced, so it only lands if
    /// nobody has touched the message since.
    async fn undo_lock(&self, id: DocId, rev: Revision, original: Body) {
        let doc = Document::new(id, original).with_rev(rev);
        match self.store.update(&self.container, &doc).await {
            Ok(_) => debug!(doc_id = %doc.id, "lock undone"),
            Err(e) => warn!(doc_id = %doc.id, error = %e, "failed to undo lock"),
        }
    }

    /// Read a message's payload
    pub async fn fetch_payload(&self, id: &MessageId) -> QueueResult<Bytes> {
        Ok(self
            .store
            .get_attachment(&self.container, &id.to_doc_id(), PAYLOAD_ATTACHMENT)
            .await?)
    }

    /// Delete a message, provided `receipt_token` is still its current revision
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn delete_message(&self, id: &MessageId, receipt_token: &ReceiptToken) -> QueueResult<()> {
        self.store
            .delete(&self.container, &id.to_doc_id(), &receipt_token.to_revision())
            .await
            .map_err(|e| QueueError::for_message(e, id))?;
        debug!(message_id = %id, "message deleted");
        Ok(())
    }

    /// Add `extension` to the visibility timeout of a message we hold
    ///
    /// The write produces a new revision, so the presented token stops
    /// being valid and the returned one must be used from now on.
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn change_visibility(
        &self,
        id: &MessageId,
        receipt_token: &ReceiptToken,
        extension: Duration,
    ) -> QueueResult<VisibilityChange> {
        let mut doc = self
            .store
            .get(&self.container, &id.to_doc_id())
            .await?
            .ok_or_else(|| QueueError::NoSuchMessage(id.clone()))?;

        if doc.rev.as_ref() != Some(&receipt_token.to_revision()) {
            return Err(QueueError::ReceiptTokenOutOfDate(id.clone()));
        }

        let fields = MessageFields::from_body(&doc.body)?;
        let mut lock = fields.lock.ok_or_else(|| QueueError::MessageNotLocked(id.clone()))?;
        lock.visibility_timeout = lock.visibility_timeout.saturating_add(extension);
        attach_lock(&mut doc.body, &lock)?;

        let rev = self
            .store
            .update(&self.container, &doc)
            .await
            .map_err(|e| QueueError::for_message(e, id))?;

        debug!(message_id = %id, visibility_timeout_ms = lock.visibility_timeout.as_millis() as u64, "visibility extended");
        Ok(VisibilityChange {
            receipt_token: rev.into(),
            visibility_timeout: lock.visibility_timeout,
        })
    }

    /// Read a message's fields, `None` if it does not exist
    pub async fn read_fields(&self, id: &MessageId) -> QueueResult<Option<MessageFields>> {
        match self.store.get(&self.container, &id.to_doc_id()).await? {
            Some(doc) => Ok(Some(MessageFields::from_body(&doc.body)?)),
            None => Ok(None),
        }
    }
}
