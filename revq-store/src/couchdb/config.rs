use std::env;
use std::time::Duration;

use crate::{StoreError, StoreResult};

/// Connection settings for a CouchDB server
#[derive(Debug, Clone)]
pub struct CouchDbConfig {
    /// Server root, e.g. `http://127.0.0.1:5984`
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Maximum documents per `_bulk_docs` request
    pub bulk_limit: usize,
    pub request_timeout: Duration,
}

impl Default for CouchDbConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5984".to_string(),
            username: None,
            password: None,
            bulk_limit: 500,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CouchDbConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_bulk_limit(mut self, bulk_limit: usize) -> Self {
        self.bulk_limit = bulk_limit.max(1);
        self
    }

    /// Load settings from `COUCHDB_*` environment variables, falling back to defaults
    pub fn from_env() -> StoreResult<Self> {
        let defaults = Self::default();

        let base_url = env::var("COUCHDB_URL").unwrap_or(defaults.base_url);
        let username = env::var("COUCHDB_USER").ok();
        let password = env::var("COUCHDB_PASSWORD").ok();

        let bulk_limit = match env::var("COUCHDB_BULK_LIMIT") {
            Ok(raw) => raw
                .parse::<usize>()
                .map_err(|_| StoreError::invalid(format!("COUCHDB_BULK_LIMIT is not a number: {}", raw)))?
                .max(1),
            Err(_) => defaults.bulk_limit,
        };

        let request_timeout = match env::var("COUCHDB_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|_| StoreError::invalid(format!("COUCHDB_TIMEOUT_SECS is not a number: {}", raw)))?,
            ),
            Err(_) => defaults.request_timeout,
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            bulk_limit,
            request_timeout,
        })
    }
}
