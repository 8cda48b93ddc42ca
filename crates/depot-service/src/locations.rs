//! Storage location configuration service.
//!
//! Administrative create/update/delete plus a TTL-bounded local cache of
//! configurations, so availability resolution does not pay a store
//! lookup per call. The cache is owned by the service instance and
//! offers explicit invalidation; it is never ambient global state.

use depot_core::StorageLocation;
use depot_core::config::LocationsConfig;
use depot_metadata::models::StorageLocationRow;
use depot_metadata::{MetadataError, MetadataStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

struct CachedLocation {
    location: StorageLocation,
    loaded_at: Instant,
}

impl CachedLocation {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() >= ttl
    }
}

pub struct LocationService {
    store: Arc<dyn MetadataStore>,
    cache: Mutex<HashMap<String, CachedLocation>>,
    ttl: Duration,
}

impl LocationService {
    pub fn new(store: Arc<dyn MetadataStore>, config: &LocationsConfig) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            ttl: config.cache_ttl(),
        }
    }

    /// Create a named location. Fails with `AlreadyExists` when taken.
    pub async fn create(&self, location: &StorageLocation) -> crate::ServiceResult<()> {
        let now = OffsetDateTime::now_utc();
        self.store
            .create_location(&StorageLocationRow {
                name: location.name.clone(),
                storage_type: location.storage_type.as_str().to_string(),
                priority: location.priority,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.invalidate(&location.name);
        tracing::info!(
            name = %location.name,
            storage_type = %location.storage_type,
            priority = location.priority,
            "Storage location created"
        );
        Ok(())
    }

    /// Update an existing location. Fails with `NotFound` when unknown.
    pub async fn update(&self, location: &StorageLocation) -> crate::ServiceResult<()> {
        self.store
            .update_location(&StorageLocationRow {
                name: location.name.clone(),
                storage_type: location.storage_type.as_str().to_string(),
                priority: location.priority,
                created_at: OffsetDateTime::now_utc(),
                updated_at: OffsetDateTime::now_utc(),
            })
            .await?;
        self.invalidate(&location.name);
        Ok(())
    }

    /// Delete a location. Fails with `NotFound` when unknown.
    pub async fn delete(&self, name: &str) -> crate::ServiceResult<()> {
        self.store.delete_location(name).await?;
        self.invalidate(name);
        Ok(())
    }

    /// Get one location, served from cache within the TTL.
    pub async fn get(&self, name: &str) -> crate::ServiceResult<Option<StorageLocation>> {
        {
            let cache = self.cache.lock().expect("location cache lock poisoned");
            if let Some(entry) = cache.get(name) {
                if !entry.is_stale(self.ttl) {
                    return Ok(Some(entry.location.clone()));
                }
            }
        }

        match self.store.get_location(name).await? {
            Some(row) => {
                let location = row.into_domain()?;
                self.cache
                    .lock()
                    .expect("location cache lock poisoned")
                    .insert(
                        name.to_string(),
                        CachedLocation {
                            location: location.clone(),
                            loaded_at: Instant::now(),
                        },
                    );
                Ok(Some(location))
            }
            None => Ok(None),
        }
    }

    /// Locations for the given names, keyed by name. Missing names are
    /// simply absent from the result; callers decide whether that is
    /// worth a warning.
    pub async fn find_by_names(
        &self,
        names: &[String],
    ) -> crate::ServiceResult<HashMap<String, StorageLocation>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.cache.lock().expect("location cache lock poisoned");
            for name in names {
                match cache.get(name) {
                    Some(entry) if !entry.is_stale(self.ttl) => {
                        found.insert(name.clone(), entry.location.clone());
                    }
                    _ => missing.push(name.clone()),
                }
            }
        }

        if !missing.is_empty() {
            let rows = self.store.find_locations_by_names(&missing).await?;
            let mut cache = self.cache.lock().expect("location cache lock poisoned");
            for row in rows {
                let location = row.into_domain()?;
                cache.insert(
                    location.name.clone(),
                    CachedLocation {
                        location: location.clone(),
                        loaded_at: Instant::now(),
                    },
                );
                found.insert(location.name.clone(), location);
            }
        }
        Ok(found)
    }

    /// All configured locations, bypassing the cache.
    pub async fn list(&self) -> crate::ServiceResult<Vec<StorageLocation>> {
        let rows = self.store.list_locations().await?;
        let mut locations = Vec::with_capacity(rows.len());
        for row in rows {
            locations.push(row.into_domain()?);
        }
        Ok(locations)
    }

    /// Drop one cached entry.
    pub fn invalidate(&self, name: &str) {
        self.cache
            .lock()
            .expect("location cache lock poisoned")
            .remove(name);
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.cache
            .lock()
            .expect("location cache lock poisoned")
            .clear();
    }

    /// Ensure a location row exists, creating it when missing. Used at
    /// startup to sync configured backends into the store.
    pub async fn ensure(&self, location: &StorageLocation) -> crate::ServiceResult<()> {
        match self.create(location).await {
            Ok(()) => Ok(()),
            Err(crate::ServiceError::Metadata(MetadataError::AlreadyExists(_))) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
