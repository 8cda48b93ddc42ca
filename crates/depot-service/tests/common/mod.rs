//! Shared fixtures for engine tests: a tenant store on a temp directory,
//! a recording backend and a recording event sink.

use async_trait::async_trait;
use depot_backend::{
    BackendError, BackendRegistry, BackendResult, NearlineAvailability, StorageBackend,
    StoreFileRequest, StoredFile,
};
use depot_core::config::{
    AvailabilityConfig, CacheConfig, LocationsConfig, OutputConfig, RequestLimits,
};
use depot_core::{Checksum, StorageLocation, StorageType};
use depot_metadata::models::FileReferenceRow;
use depot_metadata::{MetadataStore, SqliteStore};
use depot_service::events::{EventSink, FileRequestEvent, RequestGroupEvent};
use depot_service::{
    AvailabilityResolver, CacheService, Dispatcher, LocationService, OutputStorageService,
    RequestService, Sweeper,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// Backend double that counts calls and answers from a programmable map.
pub struct RecordingBackend {
    storage_type: StorageType,
    pub store_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub check_calls: AtomicUsize,
    pub restore_calls: AtomicUsize,
    pub fail_store: AtomicBool,
    pub fail_check: AtomicBool,
    /// Availability answers keyed by checksum; absent means not restored.
    pub availability: Mutex<HashMap<String, NearlineAvailability>>,
    /// Artificial latency for availability checks, in milliseconds.
    pub check_delay_ms: AtomicUsize,
}

impl RecordingBackend {
    pub fn new(storage_type: StorageType) -> Arc<Self> {
        Arc::new(Self {
            storage_type,
            store_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            check_calls: AtomicUsize::new(0),
            restore_calls: AtomicUsize::new(0),
            fail_store: AtomicBool::new(false),
            fail_check: AtomicBool::new(false),
            availability: Mutex::new(HashMap::new()),
            check_delay_ms: AtomicUsize::new(0),
        })
    }

    pub fn set_available(&self, checksum: &Checksum, expiration: Option<OffsetDateTime>) {
        self.availability.lock().unwrap().insert(
            checksum.as_str().to_string(),
            NearlineAvailability {
                available: true,
                expiration,
            },
        );
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    async fn store(&self, request: &StoreFileRequest) -> BackendResult<StoredFile> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::other("injected store failure")));
        }
        Ok(StoredFile {
            storage_path: format!("mock/{}", request.checksum),
            size_bytes: 1,
        })
    }

    async fn delete(&self, _storage_path: &str) -> BackendResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_availability(
        &self,
        checksum: &Checksum,
        _storage_path: &str,
    ) -> BackendResult<NearlineAvailability> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.check_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(BackendError::Io(std::io::Error::other("injected check failure")));
        }
        Ok(self
            .availability
            .lock()
            .unwrap()
            .get(checksum.as_str())
            .copied()
            .unwrap_or(NearlineAvailability {
                available: false,
                expiration: None,
            }))
    }

    async fn restore(&self, _storage_path: &str, destination: &std::path::Path) -> BackendResult<u64> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, b"restored").await?;
        Ok(8)
    }
}

/// Sink double recording every published event.
#[derive(Default)]
pub struct RecordingEventSink {
    file_events: Mutex<Vec<FileRequestEvent>>,
    group_events: Mutex<Vec<RequestGroupEvent>>,
}

impl RecordingEventSink {
    pub fn file_events(&self) -> Vec<FileRequestEvent> {
        self.file_events.lock().unwrap().clone()
    }

    pub fn group_events(&self) -> Vec<RequestGroupEvent> {
        self.group_events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish_file_event(&self, event: FileRequestEvent) {
        self.file_events.lock().unwrap().push(event);
    }

    async fn publish_group_event(&self, event: RequestGroupEvent) {
        self.group_events.lock().unwrap().push(event);
    }
}

/// Knobs the scenario tests tune away from the defaults.
pub struct EngineOptions {
    pub limits: RequestLimits,
    pub availability: AvailabilityConfig,
    pub retention_secs: i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            limits: RequestLimits::default(),
            availability: AvailabilityConfig::default(),
            retention_secs: 3600,
        }
    }
}

/// One fully wired tenant engine over a temp directory.
pub struct TestEngine {
    pub dir: tempfile::TempDir,
    pub store: Arc<dyn MetadataStore>,
    pub registry: Arc<BackendRegistry>,
    pub events: Arc<RecordingEventSink>,
    pub locations: Arc<LocationService>,
    pub cache: Arc<CacheService>,
    pub requests: RequestService,
    pub dispatcher: Dispatcher,
    pub sweeper: Sweeper,
    pub resolver: AvailabilityResolver,
    pub outputs: OutputStorageService,
}

pub async fn engine() -> TestEngine {
    engine_with(EngineOptions::default()).await
}

pub async fn engine_with(options: EngineOptions) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MetadataStore> = Arc::new(
        SqliteStore::new(dir.path().join("meta.db")).await.unwrap(),
    );
    let registry = Arc::new(BackendRegistry::new());
    let events = Arc::new(RecordingEventSink::default());
    let sink: Arc<dyn EventSink> = events.clone();
    let locations = Arc::new(LocationService::new(store.clone(), &LocationsConfig::default()));
    let cache = Arc::new(CacheService::new(
        store.clone(),
        &CacheConfig {
            path: dir.path().join("cache"),
            ttl_secs: 3600,
        },
    ));

    let requests = RequestService::new(
        store.clone(),
        locations.clone(),
        sink.clone(),
        options.limits,
    );
    let dispatcher = Dispatcher::new(
        store.clone(),
        registry.clone(),
        sink.clone(),
        cache.clone(),
        100,
        4,
    );
    let sweeper = Sweeper::new(
        store.clone(),
        sink.clone(),
        cache.clone(),
        100,
        time::Duration::seconds(options.retention_secs),
    );
    let resolver = AvailabilityResolver::new(
        store.clone(),
        registry.clone(),
        locations.clone(),
        cache.clone(),
        options.availability,
    );
    let outputs = OutputStorageService::new(
        store.clone(),
        &OutputConfig {
            base_path: dir.path().join("outputs"),
            parallelism: 4,
        },
    );

    TestEngine {
        dir,
        store,
        registry,
        events,
        locations,
        cache,
        requests,
        dispatcher,
        sweeper,
        resolver,
        outputs,
    }
}

impl TestEngine {
    /// Register a recording backend and its location configuration.
    pub async fn add_backend(
        &self,
        name: &str,
        storage_type: StorageType,
        priority: i32,
    ) -> Arc<RecordingBackend> {
        let backend = RecordingBackend::new(storage_type);
        self.registry.register(name, backend.clone());
        self.locations
            .create(&StorageLocation {
                name: name.to_string(),
                storage_type,
                priority,
            })
            .await
            .unwrap();
        backend
    }

    /// Insert a file reference with owners, bypassing the request flow.
    pub async fn insert_reference(&self, checksum: &Checksum, storage: &str, owners: &[&str]) {
        let now = OffsetDateTime::now_utc();
        self.store
            .upsert_reference(&FileReferenceRow {
                checksum: checksum.as_str().to_string(),
                storage_name: storage.to_string(),
                storage_path: format!("mock/{checksum}"),
                file_name: "data.bin".to_string(),
                mime_type: "application/octet-stream".to_string(),
                size_bytes: 1,
                nearline_confirmed: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let owners: Vec<String> = owners.iter().map(|owner| owner.to_string()).collect();
        self.store
            .add_reference_owners(checksum.as_str(), storage, &owners)
            .await
            .unwrap();
    }
}

/// Deterministic checksum for a test label.
pub fn checksum(label: &str) -> Checksum {
    Checksum::compute(label.as_bytes())
}

/// Storage ingress item with boilerplate filled in.
pub fn storage_item(
    checksum: &Checksum,
    storage: &str,
    owner: &str,
) -> depot_service::requests::StorageItem {
    depot_service::requests::StorageItem {
        checksum: checksum.clone(),
        storage: storage.to_string(),
        origin_url: "file:///tmp/origin.bin".to_string(),
        owner: owner.to_string(),
        file_name: "origin.bin".to_string(),
        mime_type: "application/octet-stream".to_string(),
        size_bytes: 1,
    }
}
