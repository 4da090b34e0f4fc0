//! Names and index definitions that make a container a queue

use revq_store::{DesignDoc, FieldFilter, IndexSpec};

/// Design document holding the queue indexes
pub const DESIGN_NAME: &str = "revq";

/// Messages without a lock, ordered by send time
pub const PENDING_INDEX: &str = "pending";

/// Messages with a lock, ordered by lock time
pub const LOCKED_INDEX: &str = "locked";

/// Attachment holding a message's payload
pub const PAYLOAD_ATTACHMENT: &str = "message";

pub const PAYLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// The design document every queue container carries
pub fn queue_design() -> DesignDoc {
    DesignDoc::new(DESIGN_NAME)
        .with_index(IndexSpec::new(
            PENDING_INDEX,
            FieldFilter::Absent("/lock".to_string()),
            "/sent_at",
        ))
        .with_index(IndexSpec::new(
            LOCKED_INDEX,
            FieldFilter::Present("/lock".to_string()),
            "/lock/locked_at",
        ))
}
