use std::env;
use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Default visibility timeout applied when a receive does not name one
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of the environment variables read by [`QueueConfig::from_env`]
pub const DEFAULT_ENV_PREFIX: &str = "REVQ_";

/// Per-process queue settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Visibility timeout for receives that do not specify one
    pub visibility_timeout: Duration,
    /// Identity written into the locks this process takes
    pub process_id: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            process_id: default_process_id(),
        }
    }
}

impl QueueConfig {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            process_id: process_id.into(),
        }
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub fn with_process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = process_id.into();
        self
    }

    /// Overlay `<prefix>VISIBILITY_TIMEOUT_MS` and `<prefix>PROCESS_ID` on the defaults
    ///
    /// ```bash
    /// export REVQ_VISIBILITY_TIMEOUT_MS=60000
    /// export REVQ_PROCESS_ID=billing-worker-3
    /// ```
    pub fn from_env(prefix: &str) -> QueueResult<Self> {
        Self::from_lookup(prefix, |key| env::var(key).ok())
    }

    fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let mut config = Self::default();

        let timeout_key = format!("{}VISIBILITY_TIMEOUT_MS", prefix);
        if let Some(raw) = lookup(&timeout_key) {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| QueueError::Config(format!("{} is not a number of milliseconds: {}", timeout_key, raw)))?;
            config.visibility_timeout = Duration::from_millis(millis);
        }

        let process_key = format!("{}PROCESS_ID", prefix);
        if let Some(raw) = lookup(&process_key) {
            let process_id = raw.trim();
            if process_id.is_empty() {
                return Err(QueueError::Config(format!("{} is empty", process_key)));
            }
            config.process_id = process_id.to_string();
        }

        Ok(config)
    }
}

/// `<pid>@<hostname>`, unique per running process
pub fn default_process_id() -> String {
    let host = env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{}", std::process::id(), host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
        assert!(config.process_id.starts_with(&format!("{}@", std::process::id())));
    }

    #[test]
    fn test_env_overrides() {
        let config = QueueConfig::from_lookup(
            "REVQ_",
            lookup_from(&[("REVQ_VISIBILITY_TIMEOUT_MS", "1500"), ("REVQ_PROCESS_ID", "worker-7")]),
        )
        .unwrap();
        assert_eq!(config.visibility_timeout, Duration::from_millis(1500));
        assert_eq!(config.process_id, "worker-7");
    }

    #[test]
    fn test_malformed_timeout_is_rejected() {
        let result = QueueConfig::from_lookup("X_", lookup_from(&[("X_VISIBILITY_TIMEOUT_MS", "soon")]));
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_empty_process_id_is_rejected() {
        let result = QueueConfig::from_lookup("X_", lookup_from(&[("X_PROCESS_ID", "  ")]));
        assert!(matches!(result, Err(QueueError::Config(_))));
    }
}
