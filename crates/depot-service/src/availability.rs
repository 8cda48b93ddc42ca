//! Tiered availability resolution.
//!
//! Given a set of checksums, classify each as available now, available
//! with an expiration, or not available, by combining the cache store,
//! the file reference store and the nearline backends:
//!
//! 1. bulk-limit validation (reject the whole call, no partial work)
//! 2. cache pass: unexpired entries short-circuit to available, expired
//!    entries are evicted
//! 3. reference load and priority dedup: a checksum referenced on
//!    several storages resolves on the highest-priority one
//!    (online > nearline > offline, then configured priority)
//! 4. per-tier resolution; nearline answers are memoized through the
//!    reference's `nearline_confirmed` flag so a file known to sit in
//!    the deep archive never pays the backend round-trip again
//!
//! Unknown checksums produce no entry; that is not an error.

use crate::cache::CacheService;
use crate::locations::LocationService;
use crate::ServiceResult;
use depot_backend::BackendRegistry;
use depot_core::config::AvailabilityConfig;
use depot_core::{AvailabilityStatus, Checksum, StorageLocation, StorageType, WEB_STORAGE};
use depot_metadata::MetadataStore;
use depot_metadata::models::FileReferenceRow;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;

pub struct AvailabilityResolver {
    store: Arc<dyn MetadataStore>,
    registry: Arc<BackendRegistry>,
    locations: Arc<LocationService>,
    cache: Arc<CacheService>,
    config: AvailabilityConfig,
}

impl AvailabilityResolver {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<BackendRegistry>,
        locations: Arc<LocationService>,
        cache: Arc<CacheService>,
        config: AvailabilityConfig,
    ) -> Self {
        Self {
            store,
            registry,
            locations,
            cache,
            config,
        }
    }

    /// Resolve availability for a set of checksums.
    pub async fn check_availability(
        &self,
        checksums: &BTreeSet<Checksum>,
    ) -> ServiceResult<Vec<AvailabilityStatus>> {
        if checksums.len() > self.config.max_bulk_size {
            return Err(crate::ServiceError::Validation(format!(
                "a maximum of {} checksums per availability call is allowed, got {}",
                self.config.max_bulk_size,
                checksums.len()
            )));
        }
        tracing::info!(count = checksums.len(), "Checking availability");

        let mut statuses = Vec::new();
        let mut remaining: BTreeSet<String> = checksums
            .iter()
            .map(|checksum| checksum.as_str().to_string())
            .collect();

        // Cache pass: an unexpired local copy wins outright; an expired
        // one is evicted and answers not-available.
        let now = OffsetDateTime::now_utc();
        let cache_keys: Vec<String> = remaining.iter().cloned().collect();
        for row in self.cache.find(&cache_keys).await? {
            let checksum = Checksum::parse(&row.checksum)?;
            if row.is_expired(now) {
                self.cache.evict(&row).await?;
                statuses.push(AvailabilityStatus::not_available(checksum));
            } else {
                statuses.push(AvailabilityStatus::available(
                    checksum,
                    Some(row.expiration_date),
                ));
            }
            remaining.remove(&row.checksum);
        }

        // Reference pass for everything the cache did not answer.
        let ref_keys: Vec<String> = remaining.into_iter().collect();
        let references = self.store.find_references_by_checksums(&ref_keys).await?;
        statuses.extend(self.resolve_references(references).await?);
        Ok(statuses)
    }

    /// Resolve availability from file references alone.
    async fn resolve_references(
        &self,
        references: Vec<FileReferenceRow>,
    ) -> ServiceResult<Vec<AvailabilityStatus>> {
        let mut statuses = Vec::new();

        // The reserved web storage has no physical backing: web-only
        // checksums answer not-available and are excluded from dedup.
        let (web_refs, references): (Vec<_>, Vec<_>) = references
            .into_iter()
            .partition(|reference| reference.storage_name.eq_ignore_ascii_case(WEB_STORAGE));
        let physical: BTreeSet<String> = references
            .iter()
            .map(|reference| reference.checksum.clone())
            .collect();
        for reference in web_refs {
            if !physical.contains(&reference.checksum) {
                statuses.push(AvailabilityStatus::not_available(Checksum::parse(
                    &reference.checksum,
                )?));
            }
        }

        let locations = self.load_locations(&references).await?;

        // Priority dedup: sort by (tier rank, configured priority) and
        // keep the first reference seen per checksum.
        let mut candidates: Vec<(&FileReferenceRow, &StorageLocation)> = Vec::new();
        let mut unclassified: BTreeSet<String> = BTreeSet::new();
        for reference in &references {
            match locations.get(&reference.storage_name) {
                Some(location) => candidates.push((reference, location)),
                None => {
                    unclassified.insert(reference.checksum.clone());
                }
            }
        }
        candidates.sort_by_key(|(reference, location)| {
            (location.priority_key(), reference.checksum.clone())
        });

        let mut seen: BTreeSet<String> = BTreeSet::new();
        for (reference, location) in candidates {
            if !seen.insert(reference.checksum.clone()) {
                continue;
            }
            unclassified.remove(&reference.checksum);
            statuses.push(self.resolve_one(reference, location).await?);
        }

        // References whose storage has no configuration cannot be
        // classified; answer conservatively instead of failing the batch.
        for checksum in unclassified {
            statuses.push(AvailabilityStatus::not_available(Checksum::parse(&checksum)?));
        }
        Ok(statuses)
    }

    async fn resolve_one(
        &self,
        reference: &FileReferenceRow,
        location: &StorageLocation,
    ) -> ServiceResult<AvailabilityStatus> {
        let checksum = Checksum::parse(&reference.checksum)?;
        match location.storage_type {
            StorageType::Online => Ok(AvailabilityStatus::available(checksum, None)),
            StorageType::Offline => Ok(AvailabilityStatus::not_available(checksum)),
            StorageType::Nearline => self.resolve_nearline(reference, checksum).await,
        }
    }

    /// Nearline resolution with negative memoization.
    ///
    /// A confirmed reference is known to sit in the deep archive: answer
    /// not-available without a backend call. Otherwise ask the backend;
    /// a definitive "not restored" answer sets the flag so the next call
    /// is free. Backend errors and timeouts degrade to not-available
    /// without memoizing, so a transient blip costs one wasted re-check
    /// rather than a sticky negative.
    async fn resolve_nearline(
        &self,
        reference: &FileReferenceRow,
        checksum: Checksum,
    ) -> ServiceResult<AvailabilityStatus> {
        if reference.nearline_confirmed == Some(true) {
            return Ok(AvailabilityStatus::not_available(checksum));
        }

        let backend = match self.registry.resolve(&reference.storage_name) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(
                    storage = %reference.storage_name,
                    error = %err,
                    "Nearline backend not available for availability check"
                );
                return Ok(AvailabilityStatus::not_available(checksum));
            }
        };

        let call = backend.check_availability(&checksum, &reference.storage_path);
        match tokio::time::timeout(self.config.backend_timeout(), call).await {
            Ok(Ok(answer)) => {
                if answer.available {
                    Ok(AvailabilityStatus::available(checksum, answer.expiration))
                } else {
                    // Definitive: the file sits in the deep tier until
                    // someone restores it. Memoize the expensive negative.
                    self.store
                        .set_nearline_confirmed(&reference.checksum, &reference.storage_name, true)
                        .await?;
                    Ok(AvailabilityStatus::not_available(checksum))
                }
            }
            Ok(Err(err)) => {
                tracing::error!(
                    checksum = %checksum,
                    storage = %reference.storage_name,
                    error = %err,
                    "Nearline availability check failed"
                );
                Ok(AvailabilityStatus::not_available(checksum))
            }
            Err(_) => {
                tracing::error!(
                    checksum = %checksum,
                    storage = %reference.storage_name,
                    timeout_secs = self.config.backend_timeout_secs,
                    "Nearline availability check timed out"
                );
                Ok(AvailabilityStatus::not_available(checksum))
            }
        }
    }

    async fn load_locations(
        &self,
        references: &[FileReferenceRow],
    ) -> ServiceResult<HashMap<String, StorageLocation>> {
        let names: Vec<String> = references
            .iter()
            .map(|reference| reference.storage_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let locations = self.locations.find_by_names(&names).await?;
        if locations.len() != names.len() {
            let missing: Vec<&String> = names
                .iter()
                .filter(|name| !locations.contains_key(*name))
                .collect();
            tracing::warn!(
                missing = ?missing,
                "Some referenced storages have no configuration"
            );
        }
        Ok(locations)
    }
}
