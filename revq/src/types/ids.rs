use revq_store::{DocId, Revision};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a message, stable for the message's whole life
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn to_doc_id(&self) -> DocId {
        DocId(self.0.clone())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<DocId> for MessageId {
    fn from(id: DocId) -> Self {
        Self(id.0)
    }
}

/// Receipt token handed out with a locked message
///
/// It is the message's revision as of the lock write, and proves ownership
/// of the lock until any other write to the message succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptToken(pub String);

impl ReceiptToken {
    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn to_revision(&self) -> Revision {
        Revision(self.0.clone())
    }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ReceiptToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for ReceiptToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<Revision> for ReceiptToken {
    fn from(rev: Revision) -> Self {
        Self(rev.0)
    }
}
