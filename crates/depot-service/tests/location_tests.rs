//! Tests for storage location administration and its TTL cache.

mod common;

use common::engine;
use depot_core::{StorageLocation, StorageType};
use depot_metadata::MetadataError;
use depot_service::ServiceError;

fn location(name: &str, storage_type: StorageType, priority: i32) -> StorageLocation {
    StorageLocation {
        name: name.to_string(),
        storage_type,
        priority,
    }
}

#[tokio::test]
async fn test_create_twice_reports_already_exists() {
    let engine = engine().await;
    let disk = location("disk", StorageType::Online, 0);

    engine.locations.create(&disk).await.unwrap();
    let result = engine.locations.create(&disk).await;
    assert!(matches!(
        result,
        Err(ServiceError::Metadata(MetadataError::AlreadyExists(_)))
    ));
}

#[tokio::test]
async fn test_update_and_delete_unknown_report_not_found() {
    let engine = engine().await;
    let ghost = location("ghost", StorageType::Online, 0);

    assert!(matches!(
        engine.locations.update(&ghost).await,
        Err(ServiceError::Metadata(MetadataError::NotFound(_)))
    ));
    assert!(matches!(
        engine.locations.delete("ghost").await,
        Err(ServiceError::Metadata(MetadataError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_update_is_visible_through_the_cache() {
    let engine = engine().await;
    engine
        .locations
        .create(&location("tape", StorageType::Nearline, 5))
        .await
        .unwrap();

    // Warm the cache.
    let cached = engine.locations.get("tape").await.unwrap().unwrap();
    assert_eq!(cached.priority, 5);

    // Updating invalidates the cached entry, so the new value is served
    // immediately, not after the TTL.
    engine
        .locations
        .update(&location("tape", StorageType::Nearline, 1))
        .await
        .unwrap();
    let updated = engine.locations.get("tape").await.unwrap().unwrap();
    assert_eq!(updated.priority, 1);
}

#[tokio::test]
async fn test_delete_then_get_is_none() {
    let engine = engine().await;
    engine
        .locations
        .create(&location("disk", StorageType::Online, 0))
        .await
        .unwrap();
    engine.locations.get("disk").await.unwrap().unwrap();

    engine.locations.delete("disk").await.unwrap();
    assert!(engine.locations.get("disk").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_and_ensure() {
    let engine = engine().await;
    let disk = location("disk", StorageType::Online, 0);
    engine.locations.ensure(&disk).await.unwrap();
    // Ensuring an existing location is a no-op, not a failure.
    engine.locations.ensure(&disk).await.unwrap();

    let all = engine.locations.list().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "disk");
}

#[tokio::test]
async fn test_invalidate_all_clears_cached_entries() {
    let engine = engine().await;
    engine
        .locations
        .create(&location("disk", StorageType::Online, 0))
        .await
        .unwrap();
    engine.locations.get("disk").await.unwrap().unwrap();

    engine.locations.invalidate_all();
    // Still resolvable from the store after the cache is dropped.
    assert!(engine.locations.get("disk").await.unwrap().is_some());
}
