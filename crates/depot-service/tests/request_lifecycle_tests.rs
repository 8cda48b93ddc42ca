//! Lifecycle tests for request aggregation, dispatch and sweeps.

mod common;

use common::{checksum, engine, engine_with, storage_item, EngineOptions};
use depot_core::config::RequestLimits;
use depot_core::StorageType;
use depot_service::requests::DeletionItem;
use depot_service::{ServiceError, UNKNOWN_STORAGE_LOCATION};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_concurrent_owners_merge_into_one_request() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    let c1 = checksum("c1");

    // Two separate submissions for the same (checksum, storage) before
    // dispatch runs.
    engine
        .requests
        .submit_storage("g1", vec![storage_item(&c1, "s1", "u1")])
        .await
        .unwrap();
    engine
        .requests
        .submit_storage("g2", vec![storage_item(&c1, "s1", "u2")])
        .await
        .unwrap();

    let pending = engine
        .store
        .find_requests_by_storage_and_status("s1", "to_handle", 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1, "dedup must keep a single request");

    assert!(engine.dispatcher.dispatch_all().await.unwrap());

    // Exactly one backend call, one reference, both owners on it.
    assert_eq!(backend.store_calls.load(Ordering::SeqCst), 1);
    let owners = engine
        .store
        .get_reference_owners(c1.as_str(), "s1")
        .await
        .unwrap();
    assert_eq!(
        owners.into_iter().collect::<Vec<_>>(),
        vec!["u1".to_string(), "u2".to_string()]
    );

    // Both owners got their own success response.
    let events = engine.events.file_events();
    let successes: Vec<_> = events.iter().filter(|e| e.success).collect();
    assert_eq!(successes.len(), 2);
    assert!(successes.iter().any(|e| e.owner == "u1" && e.group_id == "g1"));
    assert!(successes.iter().any(|e| e.owner == "u2" && e.group_id == "g2"));
}

#[tokio::test]
async fn test_oversized_batch_rejected_without_persistence() {
    let engine = engine_with(EngineOptions {
        limits: RequestLimits {
            storage: 3,
            ..RequestLimits::default()
        },
        ..EngineOptions::default()
    })
    .await;
    engine.add_backend("s1", StorageType::Online, 0).await;

    let items: Vec<_> = (0..4)
        .map(|i| storage_item(&checksum(&format!("c{i}")), "s1", "u1"))
        .collect();
    let result = engine.requests.submit_storage("g1", items).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));

    // One item over the ceiling: nothing persisted, not a truncation.
    let pending = engine
        .store
        .find_requests_by_storage_and_status("s1", "to_handle", 10)
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_unknown_storage_fails_item_without_blocking_batch() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;

    let mut items = vec![
        storage_item(&checksum("a"), "s1", "u1"),
        storage_item(&checksum("b"), "s1", "u1"),
        storage_item(&checksum("c"), "s1", "u1"),
    ];
    items.push(storage_item(&checksum("d"), "s_missing", "u1"));
    engine.requests.submit_storage("g1", items).await.unwrap();

    engine.dispatcher.dispatch_all().await.unwrap();

    assert_eq!(backend.store_calls.load(Ordering::SeqCst), 3);
    let events = engine.events.file_events();
    assert_eq!(events.iter().filter(|e| e.success).count(), 3);
    let failure = events.iter().find(|e| !e.success).expect("one failure");
    assert_eq!(failure.storage_name, "s_missing");
    assert!(
        failure
            .error_cause
            .as_deref()
            .unwrap()
            .starts_with(UNKNOWN_STORAGE_LOCATION)
    );

    let errored = engine
        .store
        .find_requests_by_storage_and_status("s_missing", "error", 10)
        .await
        .unwrap();
    assert_eq!(errored.len(), 1);
}

#[tokio::test]
async fn test_request_granted_when_reference_exists_and_checked() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    let c1 = checksum("c1");
    engine.insert_reference(&c1, "s1", &["u1"]).await;

    engine
        .requests
        .submit_storage("g2", vec![storage_item(&c1, "s1", "u2")])
        .await
        .unwrap();

    let granted = engine
        .store
        .find_requests_by_storage_and_status("s1", "granted", 10)
        .await
        .unwrap();
    assert_eq!(granted.len(), 1, "existing reference admits the request granted");

    // The check sweep finalizes it without a backend call.
    assert_eq!(engine.sweeper.check_sweep().await.unwrap(), 1);
    assert_eq!(backend.store_calls.load(Ordering::SeqCst), 0);

    let owners = engine
        .store
        .get_reference_owners(c1.as_str(), "s1")
        .await
        .unwrap();
    assert!(owners.contains("u2"));
    let events = engine.events.file_events();
    assert!(events.iter().any(|e| e.success && e.owner == "u2"));
}

#[tokio::test]
async fn test_granted_request_demoted_when_reference_vanished() {
    let engine = engine().await;
    engine.add_backend("s1", StorageType::Online, 0).await;
    let c1 = checksum("c1");
    engine.insert_reference(&c1, "s1", &["u1"]).await;

    engine
        .requests
        .submit_storage("g1", vec![storage_item(&c1, "s1", "u2")])
        .await
        .unwrap();
    engine.store.delete_reference(c1.as_str(), "s1").await.unwrap();

    assert_eq!(engine.sweeper.check_sweep().await.unwrap(), 0);
    let pending = engine
        .store
        .find_requests_by_storage_and_status("s1", "to_handle", 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1, "granted request falls back to dispatch");
}

#[tokio::test]
async fn test_deletion_detaches_owner_then_deletes_file() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    let c1 = checksum("c1");
    engine.insert_reference(&c1, "s1", &["u1", "u2"]).await;

    engine
        .requests
        .submit_deletion(
            "g1",
            vec![DeletionItem {
                checksum: c1.clone(),
                storage: "s1".to_string(),
                owner: "u1".to_string(),
                reference_only: false,
            }],
        )
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    // Still owned: the file stays.
    assert_eq!(backend.delete_calls.load(Ordering::SeqCst), 0);
    assert!(
        engine
            .store
            .get_reference(c1.as_str(), "s1")
            .await
            .unwrap()
            .is_some()
    );

    engine
        .requests
        .submit_deletion(
            "g2",
            vec![DeletionItem {
                checksum: c1.clone(),
                storage: "s1".to_string(),
                owner: "u2".to_string(),
                reference_only: false,
            }],
        )
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    // Last owner gone: physical deletion, then the reference.
    assert_eq!(backend.delete_calls.load(Ordering::SeqCst), 1);
    assert!(
        engine
            .store
            .get_reference(c1.as_str(), "s1")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_reference_only_deletion_skips_backend() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    let c1 = checksum("c1");
    engine.insert_reference(&c1, "s1", &["u1"]).await;

    engine
        .requests
        .submit_deletion(
            "g1",
            vec![DeletionItem {
                checksum: c1.clone(),
                storage: "s1".to_string(),
                owner: "u1".to_string(),
                reference_only: true,
            }],
        )
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    assert_eq!(backend.delete_calls.load(Ordering::SeqCst), 0);
    assert!(
        engine
            .store
            .get_reference(c1.as_str(), "s1")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_retry_resets_error_requests() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    backend.fail_store.store(true, Ordering::SeqCst);
    let c1 = checksum("c1");

    engine
        .requests
        .submit_storage("g1", vec![storage_item(&c1, "s1", "u1")])
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    let errored = engine
        .store
        .find_requests_by_storage_and_status("s1", "error", 10)
        .await
        .unwrap();
    assert_eq!(errored.len(), 1);
    assert!(errored[0].error_cause.is_some());

    // Fix the backend and retry by group: the request becomes
    // dispatchable again and completes.
    backend.fail_store.store(false, Ordering::SeqCst);
    assert_eq!(engine.requests.retry_by_group("g1").await.unwrap(), 1);
    engine.dispatcher.dispatch_all().await.unwrap();

    let handled = engine
        .store
        .find_requests_by_storage_and_status("s1", "handled", 10)
        .await
        .unwrap();
    assert_eq!(handled.len(), 1);
    assert!(handled[0].error_cause.is_none());
}

#[tokio::test]
async fn test_group_completion_summary() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    backend.fail_store.store(true, Ordering::SeqCst);

    engine
        .requests
        .submit_storage(
            "g1",
            vec![
                storage_item(&checksum("a"), "s1", "u1"),
                storage_item(&checksum("b"), "s1", "u1"),
            ],
        )
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    let groups = engine.events.group_events();
    let summary = groups.iter().find(|g| g.group_id == "g1").expect("summary");
    assert_eq!(summary.handled + summary.errors, 2);
    assert_eq!(summary.errors, 2);
}

#[tokio::test]
async fn test_terminal_requests_deleted_after_retention() {
    let engine = engine_with(EngineOptions {
        retention_secs: 0,
        ..EngineOptions::default()
    })
    .await;
    engine.add_backend("s1", StorageType::Online, 0).await;

    engine
        .requests
        .submit_storage("g1", vec![storage_item(&checksum("a"), "s1", "u1")])
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    assert_eq!(engine.sweeper.delete_terminal_sweep().await.unwrap(), 1);
    let handled = engine
        .store
        .find_requests_by_storage_and_status("s1", "handled", 10)
        .await
        .unwrap();
    assert!(handled.is_empty());
}

#[tokio::test]
async fn test_complete_sweep_drops_confirmed_storage_requests() {
    let engine = engine().await;
    engine.add_backend("s1", StorageType::Online, 0).await;

    engine
        .requests
        .submit_storage("g1", vec![storage_item(&checksum("a"), "s1", "u1")])
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    // The reference exists, so the handled row can go early.
    assert_eq!(engine.sweeper.complete_sweep().await.unwrap(), 1);
    let handled = engine
        .store
        .find_requests_by_storage_and_status("s1", "handled", 10)
        .await
        .unwrap();
    assert!(handled.is_empty());
}

#[tokio::test]
async fn test_availability_request_restores_nearline_file_into_cache() {
    let engine = engine().await;
    let tape = engine.add_backend("tape", StorageType::Nearline, 0).await;
    let c1 = checksum("c1");
    engine.insert_reference(&c1, "tape", &["u1"]).await;

    engine
        .requests
        .submit_availability(
            "g1",
            vec![depot_service::requests::AvailabilityItem {
                checksum: c1.clone(),
                owner: "u2".to_string(),
            }],
        )
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    assert_eq!(tape.restore_calls.load(Ordering::SeqCst), 1);
    let cache_file = engine
        .store
        .get_cache_file(c1.as_str())
        .await
        .unwrap()
        .expect("restored copy indexed");
    assert!(cache_file.expiration_date > time::OffsetDateTime::now_utc());
    assert!(std::path::Path::new(&cache_file.local_path).exists());

    let events = engine.events.file_events();
    assert!(events.iter().any(|e| e.success && e.owner == "u2"));
}

#[tokio::test]
async fn test_availability_request_for_online_file_succeeds_immediately() {
    let engine = engine().await;
    let disk = engine.add_backend("disk", StorageType::Online, 0).await;
    let c1 = checksum("c1");
    engine.insert_reference(&c1, "disk", &["u1"]).await;

    engine
        .requests
        .submit_availability(
            "g1",
            vec![depot_service::requests::AvailabilityItem {
                checksum: c1.clone(),
                owner: "u2".to_string(),
            }],
        )
        .await
        .unwrap();

    // No aggregated request, no backend call; the response is immediate.
    let pending = engine
        .store
        .find_requests_by_storage_and_status("disk", "to_handle", 10)
        .await
        .unwrap();
    assert!(pending.is_empty());
    assert_eq!(disk.restore_calls.load(Ordering::SeqCst), 0);
    let events = engine.events.file_events();
    assert!(events.iter().any(|e| e.success && e.owner == "u2"));
}

#[tokio::test]
async fn test_reference_ingress_registers_file_without_backend_call() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    let c1 = checksum("c1");

    engine
        .requests
        .reference_files(
            "g1",
            vec![depot_service::requests::ReferenceItem {
                checksum: c1.clone(),
                storage: "s1".to_string(),
                storage_path: "already/there".to_string(),
                owner: "u1".to_string(),
                file_name: "data.bin".to_string(),
                mime_type: "application/octet-stream".to_string(),
                size_bytes: 1,
            }],
        )
        .await
        .unwrap();

    assert_eq!(backend.store_calls.load(Ordering::SeqCst), 0);
    let reference = engine
        .store
        .get_reference(c1.as_str(), "s1")
        .await
        .unwrap()
        .expect("reference registered");
    assert_eq!(reference.storage_path, "already/there");
    let owners = engine
        .store
        .get_reference_owners(c1.as_str(), "s1")
        .await
        .unwrap();
    assert!(owners.contains("u1"));
    assert!(engine.events.file_events().iter().any(|e| e.success));
}

#[tokio::test]
async fn test_copy_request_replicates_reference() {
    let engine = engine().await;
    let source = engine.add_backend("s1", StorageType::Online, 0).await;
    let destination = engine.add_backend("s2", StorageType::Online, 0).await;
    let c1 = checksum("c1");
    engine.insert_reference(&c1, "s1", &["u1"]).await;

    engine
        .requests
        .submit_copy(
            "g1",
            vec![depot_service::requests::CopyItem {
                checksum: c1.clone(),
                source_storage: None,
                destination_storage: "s2".to_string(),
                owner: "u1".to_string(),
            }],
        )
        .await
        .unwrap();
    engine.dispatcher.dispatch_all().await.unwrap();

    assert_eq!(source.restore_calls.load(Ordering::SeqCst), 1);
    assert_eq!(destination.store_calls.load(Ordering::SeqCst), 1);
    assert!(
        engine
            .store
            .get_reference(c1.as_str(), "s2")
            .await
            .unwrap()
            .is_some()
    );
}
