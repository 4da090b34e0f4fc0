use thiserror::Error;

/// Result type for document store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a document store
///
/// `NotFound` and `Conflict` are the two outcomes callers are expected to
/// branch on; everything else is a failure of the store itself.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Revision conflict on {what}")]
    Conflict { what: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Create a not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a revision conflict error
    pub fn conflict<S: Into<String>>(what: S) -> Self {
        Self::Conflict { what: what.into() }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(feature = "couchdb")]
impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::backend(err)
    }
}
