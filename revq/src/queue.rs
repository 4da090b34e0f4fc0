use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use revq_store::{DocId, DocumentStore, IndexQuery};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::{
    lock::LockProtocol,
    schema::{DESIGN_NAME, LOCKED_INDEX, PAYLOAD_ATTACHMENT, PAYLOAD_CONTENT_TYPE, PENDING_INDEX},
    types::message::now_millis,
    Message, MessageFields, MessageId, MessageStatus, QueueConfig, QueueEvent, QueueResult,
    ReceiptToken,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

const EVENT_CAPACITY: usize = 1000;

/// Which end of the pending index a receive takes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryOrder {
    /// Oldest `sent_at` first
    #[default]
    Fifo,
    /// Newest `sent_at` first
    Lifo,
}

/// Parameters of an index-driven receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: usize,
    /// `None` uses the queue's configured default
    pub visibility_timeout: Option<Duration>,
    pub order: DeliveryOrder,
}

impl ReceiveRequest {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            visibility_timeout: None,
            order: DeliveryOrder::Fifo,
        }
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = Some(visibility_timeout);
        self
    }

    pub fn with_order(mut self, order: DeliveryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn from_tail(self) -> Self {
        self.with_order(DeliveryOrder::Lifo)
    }
}

/// A single queue: one store container holding one document per message
///
/// Cloning is cheap; clones share the store handle and the event channel.
pub struct Queue<S: DocumentStore + ?Sized> {
    name: Arc<str>,
    store: Arc<S>,
    locks: LockProtocol<S>,
    config: QueueConfig,
    event_broadcaster: broadcast::Sender<QueueEvent>,
}

impl<S: DocumentStore + ?Sized> Clone for Queue<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            store: self.store.clone(),
            locks: self.locks.clone(),
            config: self.config.clone(),
            event_broadcaster: self.event_broadcaster.clone(),
        }
    }
}

impl<S: DocumentStore + ?Sized> std::fmt::Debug for Queue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: DocumentStore + ?Sized> Queue<S> {
    /// Bind to the container `name`
    ///
    /// The container is assumed to already be a queue; use
    /// [`QueueService`](crate::QueueService) to provision or look one up.
    pub fn new(store: Arc<S>, name: impl Into<String>, config: QueueConfig) -> Self {
        let name: String = name.into();
        let locks = LockProtocol::new(store.clone(), name.clone(), config.process_id.clone());
        let (event_broadcaster, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            store,
            locks,
            config,
            event_broadcaster,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Identity written into the locks this queue takes
    pub fn process_id(&self) -> &str {
        self.locks.owner()
    }

    pub fn lock_protocol(&self) -> &LockProtocol<S> {
        &self.locks
    }

    fn publish(&self, event: QueueEvent) {
        // No subscribers is not an error
        let _ = self.event_broadcaster.send(event);
    }

    fn publish_locked(&self, messages: &[Message]) {
        for message in messages {
            if let Some(lock) = message.lock() {
                self.publish(QueueEvent::Locked {
                    queue: self.name.to_string(),
                    message_id: message.message_id().clone(),
                    locked_by: lock.locked_by.clone(),
                    visibility_timeout: lock.visibility_timeout,
                    at: lock.locked_at,
                });
            }
        }
    }

    /// Enqueue `payload` and return the new message's id
    #[instrument(skip(self, payload), fields(queue = %self.name, bytes = tracing::field::Empty))]
    pub async fn send(&self, payload: impl Into<Bytes>) -> QueueResult<MessageId> {
        let payload: Bytes = payload.into();
        tracing::Span::current().record("bytes", payload.len() as u64);
        let doc_id = self.store.next_id().await?;
        let fields = MessageFields::new(now_millis());

        let rev = self.store.create(&self.name, &doc_id, fields.to_body()?).await?;
        self.store
            .put_attachment(&self.name, &doc_id, &rev, PAYLOAD_ATTACHMENT, PAYLOAD_CONTENT_TYPE, payload)
            .await?;

        let message_id = MessageId::from(doc_id);
        debug!(message_id = %message_id, "message sent");
        self.publish(QueueEvent::Sent {
            queue: self.name.to_string(),
            message_id: message_id.clone(),
            at: fields.sent_at,
        });
        Ok(message_id)
    }

    /// Lock up to `request.max_messages` pending messages
    ///
    /// May return fewer than asked for, either because fewer are pending or
    /// because other consumers won some of the candidates.
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn receive(&self, request: ReceiveRequest) -> QueueResult<Vec<Message>> {
        if request.max_messages == 0 {
            return Ok(Vec::new());
        }

        let query = match request.order {
            DeliveryOrder::Fifo => IndexQuery::ascending(),
            DeliveryOrder::Lifo => IndexQuery::descending(),
        }
        .with_limit(request.max_messages);

        let candidates = self
            .store
            .query_index(&self.name, DESIGN_NAME, PENDING_INDEX, query)
            .await?;
        debug!(candidates = candidates.len(), "pending candidates read");

        let visibility_timeout = request.visibility_timeout.unwrap_or(self.config.visibility_timeout);
        let messages = self.locks.lock_batch(candidates, visibility_timeout).await?;
        self.publish_locked(&messages);
        Ok(messages)
    }

    /// FIFO receive with the default visibility timeout
    pub async fn receive_messages(&self, max_messages: usize) -> QueueResult<Vec<Message>> {
        self.receive(ReceiveRequest::new(max_messages)).await
    }

    /// LIFO receive with the default visibility timeout
    pub async fn receive_messages_from_tail(&self, max_messages: usize) -> QueueResult<Vec<Message>> {
        self.receive(ReceiveRequest::new(max_messages).from_tail()).await
    }

    /// Receive the oldest pending message, if any
    pub async fn receive_message(&self) -> QueueResult<Option<Message>> {
        Ok(self.receive(ReceiveRequest::new(1)).await?.into_iter().next())
    }

    /// Receive the newest pending message, if any
    pub async fn receive_message_from_tail(&self) -> QueueResult<Option<Message>> {
        Ok(self
            .receive(ReceiveRequest::new(1).from_tail())
            .await?
            .into_iter()
            .next())
    }

    /// Lock specific messages, whatever their current state
    ///
    /// Ids that do not exist are skipped. Locked messages are taken over,
    /// which is how a message abandoned by a dead consumer is reclaimed.
    #[instrument(skip(self, ids), fields(queue = %self.name, requested = ids.len()))]
    pub async fn receive_by_ids(
        &self,
        ids: &[MessageId],
        visibility_timeout: Option<Duration>,
    ) -> QueueResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let doc_ids: Vec<DocId> = ids.iter().map(MessageId::to_doc_id).collect();
        let candidates = self.store.get_many(&self.name, &doc_ids).await?;

        let visibility_timeout = visibility_timeout.unwrap_or(self.config.visibility_timeout);
        let messages = self.locks.lock_batch(candidates, visibility_timeout).await?;
        self.publish_locked(&messages);
        Ok(messages)
    }

    /// Lock one message by id
    ///
    /// `Ok(None)` means another write to the message got there first.
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn receive_by_id(
        &self,
        id: &MessageId,
        visibility_timeout: Option<Duration>,
    ) -> QueueResult<Option<Message>> {
        let visibility_timeout = visibility_timeout.unwrap_or(self.config.visibility_timeout);
        let message = self.locks.lock_single(id, visibility_timeout).await?;
        if let Some(message) = &message {
            self.publish_locked(std::slice::from_ref(message));
        }
        Ok(message)
    }

    /// Delete a message the caller holds
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn delete_message(&self, id: &MessageId, receipt_token: &ReceiptToken) -> QueueResult<()> {
        self.locks.delete_message(id, receipt_token).await?;
        self.publish(QueueEvent::Deleted {
            queue: self.name.to_string(),
            message_id: id.clone(),
            at: now_millis(),
        });
        Ok(())
    }

    /// Extend the visibility timeout of a message the caller holds
    ///
    /// Returns the new receipt token; the one passed in is no longer valid.
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn change_message_visibility(
        &self,
        id: &MessageId,
        receipt_token: &ReceiptToken,
        extension: Duration,
    ) -> QueueResult<ReceiptToken> {
        let change = self.locks.change_visibility(id, receipt_token, extension).await?;
        self.publish(QueueEvent::VisibilityChanged {
            queue: self.name.to_string(),
            message_id: id.clone(),
            visibility_timeout: change.visibility_timeout,
            at: now_millis(),
        });
        Ok(change.receipt_token)
    }

    /// Number of messages available for delivery
    pub async fn number_of_messages_pending(&self) -> QueueResult<u64> {
        Ok(self.store.count_index(&self.name, DESIGN_NAME, PENDING_INDEX).await?)
    }

    /// Number of messages currently locked
    ///
    /// Includes locks whose visibility timeout has elapsed; nothing returns
    /// those to the pending set.
    pub async fn number_of_messages_not_visible(&self) -> QueueResult<u64> {
        Ok(self.store.count_index(&self.name, DESIGN_NAME, LOCKED_INDEX).await?)
    }

    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn message_status(&self, id: &MessageId) -> QueueResult<MessageStatus> {
        Ok(match self.locks.read_fields(id).await? {
            Some(fields) => MessageStatus::from_fields(fields),
            None => MessageStatus::Missing,
        })
    }

    /// Subscribe to this queue's lifecycle events
    ///
    /// Events published before the call are not replayed, and a subscriber
    /// that falls too far behind skips what it missed.
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};

        let receiver = self.event_broadcaster.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::queue_design;
    use revq_store::MemoryDocStore;

    async fn queue() -> Queue<MemoryDocStore> {
        let store = Arc::new(MemoryDocStore::new());
        store.create_container("unit").await.unwrap();
        store.put_design("unit", &queue_design()).await.unwrap();
        Queue::new(store, "unit", QueueConfig::new("unit-test"))
    }

    #[test]
    fn test_receive_request_builder() {
        let request = ReceiveRequest::new(4)
            .with_visibility_timeout(Duration::from_secs(9))
            .from_tail();
        assert_eq!(request.max_messages, 4);
        assert_eq!(request.visibility_timeout, Some(Duration::from_secs(9)));
        assert_eq!(request.order, DeliveryOrder::Lifo);
        assert_eq!(ReceiveRequest::new(1).order, DeliveryOrder::Fifo);
    }

    #[tokio::test]
    async fn test_zero_receive_is_empty() {
        let queue = queue().await;
        queue.send(&b"x"[..]).await.unwrap();
        assert!(queue.receive_messages(0).await.unwrap().is_empty());
        assert_eq!(queue.number_of_messages_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_send_accepts_any_byte_source() {
        let queue = queue().await;
        queue.send(vec![1u8, 2, 3]).await.unwrap();
        queue.send(String::from("text")).await.unwrap();
        queue.send(Bytes::from_static(b"static")).await.unwrap();

        let payloads: Vec<Bytes> = queue
            .receive_messages(3)
            .await
            .unwrap()
            .into_iter()
            .map(Message::into_payload)
            .collect();
        assert_eq!(payloads, vec![Bytes::from(vec![1u8, 2, 3]), Bytes::from("text"), Bytes::from("static")]);
    }

    #[tokio::test]
    async fn test_default_visibility_timeout_applies() {
        let queue = queue().await;
        queue.send(&b"x"[..]).await.unwrap();
        let message = queue.receive_message().await.unwrap().unwrap();
        assert_eq!(message.visibility_timeout(), Duration::from_secs(30));
        assert_eq!(message.lock().unwrap().locked_by, "unit-test");
    }

    #[tokio::test]
    async fn test_clones_share_events() {
        use tokio_stream::StreamExt;

        let queue = queue().await;
        let mut events = queue.event_stream();
        let id = queue.clone().send(&b"x"[..]).await.unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.event_name(), "sent");
        assert_eq!(event.message_id(), &id);
        assert_eq!(event.queue(), "unit");
    }
}
