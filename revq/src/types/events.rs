use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::MessageId;

/// Message lifecycle events published by a queue
///
/// Only successful transitions are published. A receive that loses a lock
/// race publishes nothing for the messages it lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEvent {
    Sent {
        queue: String,
        message_id: MessageId,
        at: DateTime<Utc>,
    },

    Locked {
        queue: String,
        message_id: MessageId,
        locked_by: String,
        visibility_timeout: Duration,
        at: DateTime<Utc>,
    },

    VisibilityChanged {
        queue: String,
        message_id: MessageId,
        visibility_timeout: Duration,
        at: DateTime<Utc>,
    },

    Deleted {
        queue: String,
        message_id: MessageId,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Locked { .. } => "locked",
            Self::VisibilityChanged { .. } => "visibility_changed",
            Self::Deleted { .. } => "deleted",
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Sent { message_id, .. }
            | Self::Locked { message_id, .. }
            | Self::VisibilityChanged { message_id, .. }
            | Self::Deleted { message_id, .. } => message_id,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            Self::Sent { queue, .. }
            | Self::Locked { queue, .. }
            | Self::VisibilityChanged { queue, .. }
            | Self::Deleted { queue, .. } => queue,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Sent { at, .. }
            | Self::Locked { at, .. }
            | Self::VisibilityChanged { at, .. }
            | Self::Deleted { at, .. } => at,
        }
    }
}
