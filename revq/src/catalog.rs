use std::sync::Arc;

use revq_store::{DesignDoc, DocumentStore, StoreError};
use tracing::{debug, info, instrument};

use crate::{schema::queue_design, Queue, QueueConfig, QueueError, QueueResult};

/// Container names the store accepts: `^[a-z][a-z0-9_$()+/-]*$`
pub fn is_valid_queue_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_$()+-/".contains(c))
}

fn validate(name: &str) -> QueueResult<()> {
    if is_valid_queue_name(name) {
        Ok(())
    } else {
        Err(QueueError::InvalidQueueName(name.to_string()))
    }
}

/// Catalog of the queues held in a store
///
/// A queue is a container carrying the queue design document. Containers
/// without it are left alone by every operation here.
pub struct QueueService<S: DocumentStore + ?Sized> {
    store: Arc<S>,
    config: QueueConfig,
    design: DesignDoc,
}

impl<S: DocumentStore + ?Sized> Clone for QueueService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            design: self.design.clone(),
        }
    }
}

impl<S: DocumentStore + ?Sized> QueueService<S> {
    /// Queues handed out share `config`
    pub fn new(store: Arc<S>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            design: queue_design(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn bind(&self, name: &str) -> Queue<S> {
        Queue::new(self.store.clone(), name, self.config.clone())
    }

    /// True if `name` exists and carries the queue indexes
    pub async fn is_queue(&self, name: &str) -> QueueResult<bool> {
        if !self.store.container_exists(name).await? {
            return Ok(false);
        }
        match self.store.get_design(name, &self.design.name).await {
            Ok(Some(design)) => Ok(design.covers(&self.design)),
            Ok(None) => Ok(false),
            // Deleted between the two calls
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Provision a new queue, failing if anything already holds the name
    #[instrument(skip(self))]
    pub async fn create_queue(&self, name: &str) -> QueueResult<Queue<S>> {
        validate(name)?;
        if self.store.container_exists(name).await? {
            return Err(QueueError::QueueNameAlreadyTaken(name.to_string()));
        }

        self.store.create_container(name).await.map_err(|e| match e {
            StoreError::Conflict { .. } => QueueError::QueueNameAlreadyTaken(name.to_string()),
            other => QueueError::Store(other),
        })?;
        self.store.put_design(name, &self.design).await?;

        info!(queue = name, "queue created");
        Ok(self.bind(name))
    }

    /// Look up an existing queue
    #[instrument(skip(self))]
    pub async fn get_queue(&self, name: &str) -> QueueResult<Queue<S>> {
        validate(name)?;
        if !self.is_queue(name).await? {
            return Err(QueueError::NoSuchQueue(name.to_string()));
        }
        Ok(self.bind(name))
    }

    /// Look up a queue, creating it if the name is free
    ///
    /// Fails only when the name belongs to a container that is not a queue.
    #[instrument(skip(self))]
    pub async fn get_or_create_queue(&self, name: &str) -> QueueResult<Queue<S>> {
        validate(name)?;
        if self.is_queue(name).await? {
            return Ok(self.bind(name));
        }
        if self.store.container_exists(name).await? {
            return Err(QueueError::QueueNameAlreadyTaken(name.to_string()));
        }

        match self.create_queue(name).await {
            Err(QueueError::QueueNameAlreadyTaken(taken)) => {
                if self.is_queue(name).await? {
                    debug!(queue = name, "queue created concurrently");
                    Ok(self.bind(name))
                } else {
                    Err(QueueError::QueueNameAlreadyTaken(taken))
                }
            }
            other => other,
        }
    }

    /// Delete a queue and every message in it
    ///
    /// Returns false, deleting nothing, if `name` is not a queue.
    #[instrument(skip(self))]
    pub async fn delete_queue(&self, name: &str) -> QueueResult<bool> {
        if !self.is_queue(name).await? {
            return Ok(false);
        }
        match self.store.delete_container(name).await {
            Ok(()) => {
                info!(queue = name, "queue deleted");
                Ok(true)
            }
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all queues, sorted
    pub async fn list_queues(&self) -> QueueResult<Vec<String>> {
        let mut queues = Vec::new();
        for name in self.store.list_containers().await? {
            if self.is_queue(&name).await? {
                queues.push(name);
            }
        }
        queues.sort();
        Ok(queues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_rules() {
        for name in ["jobs", "a", "orders/eu-west", "x_1$(y)+z"] {
            assert!(is_valid_queue_name(name), "{} should be valid", name);
        }
        for name in ["", "Jobs", "1jobs", "_users", "jobs.eu", "jobs queue"] {
            assert!(!is_valid_queue_name(name), "{} should be invalid", name);
        }
    }
}
