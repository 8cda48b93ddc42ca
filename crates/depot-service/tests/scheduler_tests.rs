//! Tests for the lease-locked scheduling guard.

mod common;

use common::{checksum, engine, storage_item};
use depot_core::StorageType;
use depot_service::{Dispatcher, Scheduler, ServiceError, Sweeper, TenantContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;

async fn scheduler_for(engine: &common::TestEngine) -> Scheduler {
    let dispatcher = Arc::new(Dispatcher::new(
        engine.store.clone(),
        engine.registry.clone(),
        engine.events.clone(),
        engine.cache.clone(),
        100,
        4,
    ));
    let sweeper = Arc::new(Sweeper::new(
        engine.store.clone(),
        engine.events.clone(),
        engine.cache.clone(),
        100,
        time::Duration::seconds(3600),
    ));
    Scheduler::new(
        vec![TenantContext {
            name: "default".to_string(),
            store: engine.store.clone(),
            dispatcher,
            sweeper,
        }],
        300,
    )
}

#[tokio::test]
async fn test_contended_tick_is_skipped() {
    let engine = engine().await;
    let backend = engine.add_backend("s1", StorageType::Online, 0).await;
    engine
        .requests
        .submit_storage("g1", vec![storage_item(&checksum("c1"), "s1", "u1")])
        .await
        .unwrap();

    // Another replica holds the dispatch lock for this tenant.
    let now = OffsetDateTime::now_utc();
    assert!(
        engine
            .store
            .try_acquire_lock("dispatch", "replica-b", now, now + time::Duration::seconds(300))
            .await
            .unwrap()
    );

    let scheduler = scheduler_for(&engine).await;
    scheduler.tick_dispatch().await;

    // Contention is not an error; the tick was a no-op for this tenant.
    assert_eq!(backend.store_calls.load(Ordering::SeqCst), 0);
    let pending = engine
        .store
        .find_requests_by_storage_and_status("s1", "to_handle", 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    // Once the other replica releases, the next tick does the work.
    engine.store.release_lock("dispatch", "replica-b").await.unwrap();
    scheduler.tick_dispatch().await;
    assert_eq!(backend.store_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lock_released_after_failed_action() {
    let engine = engine().await;
    let scheduler = scheduler_for(&engine).await;
    let tenant = &scheduler_tenants(&scheduler)[0];

    let result = scheduler
        .run_locked(tenant, "check", || async {
            Err(ServiceError::Validation("injected sweep failure".to_string()))
        })
        .await;
    assert!(result.is_err());

    // Guaranteed release: the next tick acquires immediately.
    let ran = AtomicBool::new(false);
    let result = scheduler
        .run_locked(tenant, "check", || async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(result, Ok(true)));
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_distinct_actions_are_independent_lock_domains() {
    let engine = engine().await;
    let scheduler = scheduler_for(&engine).await;
    let tenant = &scheduler_tenants(&scheduler)[0];

    // Dispatch held elsewhere; the check sweep still runs.
    let now = OffsetDateTime::now_utc();
    engine
        .store
        .try_acquire_lock("dispatch", "replica-b", now, now + time::Duration::seconds(300))
        .await
        .unwrap();

    let dispatch = scheduler.run_locked(tenant, "dispatch", || async { Ok(()) }).await;
    assert!(matches!(dispatch, Ok(false)));

    let check = scheduler.run_locked(tenant, "check", || async { Ok(()) }).await;
    assert!(matches!(check, Ok(true)));
}

#[tokio::test]
async fn test_expired_lease_is_stolen() {
    let engine = engine().await;
    let scheduler = scheduler_for(&engine).await;
    let tenant = &scheduler_tenants(&scheduler)[0];

    // A crashed replica left a lease that has already expired.
    let past = OffsetDateTime::now_utc() - time::Duration::seconds(600);
    engine
        .store
        .try_acquire_lock("dispatch", "crashed-replica", past, past + time::Duration::seconds(300))
        .await
        .unwrap();

    let result = scheduler.run_locked(tenant, "dispatch", || async { Ok(()) }).await;
    assert!(matches!(result, Ok(true)));
}

/// Accessor kept local to the tests: the scheduler owns its tenants.
fn scheduler_tenants(scheduler: &Scheduler) -> &[TenantContext] {
    scheduler.tenants()
}
