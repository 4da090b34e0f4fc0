use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use revq_store::Body;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MessageId, ReceiptToken};
use crate::QueueResult;

/// Current time truncated to the millisecond precision messages are stored at
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Lock attached to a message by the process that received it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub locked_at: DateTime<Utc>,

    /// Identity of the owning process
    pub locked_by: String,

    /// How long after `locked_at` the message is meant to stay hidden
    #[serde(with = "duration_ms")]
    pub visibility_timeout: Duration,
}

impl LockRecord {
    /// Create a lock owned by `owner`, taken now
    pub fn new(owner: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            locked_at: now_millis(),
            locked_by: owner.into(),
            visibility_timeout,
        }
    }

    /// The instant the lock is intended to lapse
    ///
    /// Nothing enforces it: a lock stays in place until the message is
    /// deleted or re-locked.
    pub fn visible_again_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.visibility_timeout)
            .ok()
            .and_then(|timeout| self.locked_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Typed view of a message document's fields
///
/// Only the queue's own fields are read; anything else in the document
/// body is left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFields {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockRecord>,
}

impl MessageFields {
    /// Fields of a freshly sent message: no lock
    pub fn new(sent_at: DateTime<Utc>) -> Self {
        Self { sent_at, lock: None }
    }

    pub fn from_body(body: &Body) -> QueueResult<Self> {
        Ok(serde_json::from_value(Value::Object(body.clone()))?)
    }

    pub fn to_body(&self) -> QueueResult<Body> {
        match serde_json::to_value(self)? {
            Value::Object(body) => Ok(body),
            _ => Err(crate::QueueError::Serialization("message fields are not an object".into())),
        }
    }
}

/// A message handed to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: MessageId,
    receipt_token: ReceiptToken,
    fields: MessageFields,
    payload: Bytes,
}

impl Message {
    pub fn new(id: MessageId, receipt_token: ReceiptToken, fields: MessageFields, payload: Bytes) -> Self {
        Self {
            id,
            receipt_token,
            fields,
            payload,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.id
    }

    /// Token to present when deleting the message or extending its lock
    pub fn receipt_token(&self) -> &ReceiptToken {
        &self.receipt_token
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.fields.sent_at
    }

    pub fn lock(&self) -> Option<&LockRecord> {
        self.fields.lock.as_ref()
    }

    /// Visibility timeout of the lock, zero if the message is not locked
    pub fn visibility_timeout(&self) -> Duration {
        self.lock().map(|lock| lock.visibility_timeout).unwrap_or_default()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
