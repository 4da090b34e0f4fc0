use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::MessageFields;

/// Where a message is in its lifecycle
///
/// ```text
/// Pending --receive--> Locked --delete--> Missing
///                        └──extend──┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Available for delivery
    Pending { sent_at: DateTime<Utc> },

    /// Received by some process and not yet deleted
    Locked {
        locked_by: String,
        locked_at: DateTime<Utc>,
        visibility_timeout: Duration,
    },

    /// Not in the queue, possibly already deleted
    Missing,
}

impl MessageStatus {
    pub(crate) fn from_fields(fields: MessageFields) -> Self {
        match fields.lock {
            Some(lock) => Self::Locked {
                locked_by: lock.locked_by,
                locked_at: lock.locked_at,
                visibility_timeout: lock.visibility_timeout,
            },
            None => Self::Pending {
                sent_at: fields.sent_at,
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Owner of the lock, if locked
    pub fn process_id(&self) -> Option<&str> {
        match self {
            Self::Locked { locked_by, .. } => Some(locked_by),
            _ => None,
        }
    }

    /// Send time when pending, lock time when locked
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Pending { sent_at } => Some(*sent_at),
            Self::Locked { locked_at, .. } => Some(*locked_at),
            Self::Missing => None,
        }
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Locked { .. } => "locked",
            Self::Missing => "missing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LockRecord;

    #[test]
    fn test_status_from_fields() {
        let sent_at = DateTime::from_timestamp_millis(100).unwrap();
        let pending = MessageStatus::from_fields(MessageFields::new(sent_at));
        assert_eq!(pending, MessageStatus::Pending { sent_at });
        assert_eq!(pending.timestamp(), Some(sent_at));
        assert_eq!(pending.process_id(), None);

        let mut fields = MessageFields::new(sent_at);
        let lock = LockRecord::new("worker-1", Duration::from_secs(5));
        let locked_at = lock.locked_at;
        fields.lock = Some(lock);
        let locked = MessageStatus::from_fields(fields);
        assert!(locked.is_locked());
        assert_eq!(locked.process_id(), Some("worker-1"));
        assert_eq!(locked.timestamp(), Some(locked_at));
        assert_eq!(locked.name(), "locked");
    }
}
