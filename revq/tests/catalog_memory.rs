use std::sync::Arc;

use revq::{schema::DESIGN_NAME, QueueConfig, QueueError, QueueService};
use revq_store::{DesignDoc, DocumentStore, FieldFilter, IndexSpec, MemoryDocStore};

fn create_test_service() -> (Arc<MemoryDocStore>, QueueService<MemoryDocStore>) {
    let store = Arc::new(MemoryDocStore::new());
    let service = QueueService::new(store.clone(), QueueConfig::new("catalog-test"));
    (store, service)
}

#[tokio::test]
async fn test_create_and_get_queue() {
    let (store, service) = create_test_service();

    let queue = service.create_queue("orders").await.unwrap();
    assert_eq!(queue.name(), "orders");
    assert_eq!(queue.process_id(), "catalog-test");
    assert!(service.is_queue("orders").await.unwrap());
    assert!(store.get_design("orders", DESIGN_NAME).await.unwrap().is_some());

    let fetched = service.get_queue("orders").await.unwrap();
    let id = queue.send(&b"hello"[..]).await.unwrap();
    let message = fetched.receive_message().await.unwrap().unwrap();
    assert_eq!(message.message_id(), &id);
}

#[tokio::test]
async fn test_create_refuses_taken_names() {
    let (store, service) = create_test_service();
    service.create_queue("orders").await.unwrap();
    store.create_container("plain").await.unwrap();

    assert!(matches!(
        service.create_queue("orders").await,
        Err(QueueError::QueueNameAlreadyTaken(name)) if name == "orders"
    ));
    assert!(matches!(
        service.create_queue("plain").await,
        Err(QueueError::QueueNameAlreadyTaken(_))
    ));
}

#[tokio::test]
async fn test_get_missing_or_foreign_container() {
    let (store, service) = create_test_service();
    store.create_container("plain").await.unwrap();

    assert!(matches!(
        service.get_queue("absent").await,
        Err(QueueError::NoSuchQueue(name)) if name == "absent"
    ));
    assert!(matches!(
        service.get_queue("plain").await,
        Err(QueueError::NoSuchQueue(_))
    ));
}

#[tokio::test]
async fn test_container_with_different_indexes_is_not_a_queue() {
    let (store, service) = create_test_service();
    store.create_container("lookalike").await.unwrap();
    let design = DesignDoc::new(DESIGN_NAME).with_index(IndexSpec::new(
        "pending",
        FieldFilter::Absent("/lock".to_string()),
        "/created",
    ));
    store.put_design("lookalike", &design).await.unwrap();

    assert!(!service.is_queue("lookalike").await.unwrap());
    assert!(!service.delete_queue("lookalike").await.unwrap());
    assert!(store.container_exists("lookalike").await.unwrap());
}

#[tokio::test]
async fn test_get_or_create_queue() {
    let (store, service) = create_test_service();

    let created = service.get_or_create_queue("events").await.unwrap();
    created.send(&b"kept"[..]).await.unwrap();

    let existing = service.get_or_create_queue("events").await.unwrap();
    assert_eq!(existing.number_of_messages_pending().await.unwrap(), 1);

    store.create_container("plain").await.unwrap();
    assert!(matches!(
        service.get_or_create_queue("plain").await,
        Err(QueueError::QueueNameAlreadyTaken(_))
    ));
}

#[tokio::test]
async fn test_delete_queue() {
    let (store, service) = create_test_service();
    service.create_queue("orders").await.unwrap();
    store.create_container("plain").await.unwrap();

    assert!(service.delete_queue("orders").await.unwrap());
    assert!(!service.is_queue("orders").await.unwrap());
    assert!(!service.delete_queue("orders").await.unwrap());

    // Only queues are deleted
    assert!(!service.delete_queue("plain").await.unwrap());
    assert!(store.container_exists("plain").await.unwrap());
}

#[tokio::test]
async fn test_list_queues_is_sorted_and_filtered() {
    let (store, service) = create_test_service();
    for name in ["zeta", "alpha", "mid"] {
        service.create_queue(name).await.unwrap();
    }
    store.create_container("plain").await.unwrap();

    assert_eq!(service.list_queues().await.unwrap(), vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn test_invalid_names_are_rejected() {
    let (store, service) = create_test_service();
    for name in ["", "Orders", "9lives", "_replicator", "a b"] {
        assert!(matches!(
            service.create_queue(name).await,
            Err(QueueError::InvalidQueueName(_))
        ));
        assert!(matches!(
            service.get_or_create_queue(name).await,
            Err(QueueError::InvalidQueueName(_))
        ));
    }
    assert!(store.list_containers().await.unwrap().is_empty());
}
