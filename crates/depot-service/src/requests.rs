//! Request ingress: aggregation, dedup and retry.
//!
//! Batches of typed items enter here from the external transport layer.
//! Each batch is validated whole against its per-type ceiling before any
//! persistence, then every item is merged into the existing non-terminal
//! aggregated request for its `(checksum, storage, type)` or creates a
//! fresh one. N concurrent requesters for the same physical operation
//! end up as N owners of one request.

use crate::events::{EventSink, FileRequestEvent};
use depot_core::config::RequestLimits;
use depot_core::{Checksum, RequestStatus, RequestType, StorageType};
use depot_metadata::MetadataStore;
use depot_metadata::models::{FileReferenceRow, RequestRow};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// One file to store physically.
#[derive(Clone, Debug)]
pub struct StorageItem {
    pub checksum: Checksum,
    pub storage: String,
    /// Local path the backend reads the file content from.
    pub origin_url: String,
    pub owner: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// One owner to detach from a file, deleting the file once unowned.
#[derive(Clone, Debug)]
pub struct DeletionItem {
    pub checksum: Checksum,
    pub storage: String,
    pub owner: String,
    /// Drop the reference without physical deletion.
    pub reference_only: bool,
}

/// One file to make directly accessible.
#[derive(Clone, Debug)]
pub struct AvailabilityItem {
    pub checksum: Checksum,
    pub owner: String,
}

/// One file to copy onto another storage.
#[derive(Clone, Debug)]
pub struct CopyItem {
    pub checksum: Checksum,
    /// Storage to read from; defaults to the highest-priority reference.
    pub source_storage: Option<String>,
    pub destination_storage: String,
    pub owner: String,
}

/// One file already sitting on a storage, to be referenced without a
/// backend call.
#[derive(Clone, Debug)]
pub struct ReferenceItem {
    pub checksum: Checksum,
    pub storage: String,
    pub storage_path: String,
    pub owner: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

pub struct RequestService {
    store: Arc<dyn MetadataStore>,
    locations: Arc<crate::LocationService>,
    events: Arc<dyn EventSink>,
    limits: RequestLimits,
}

impl RequestService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        locations: Arc<crate::LocationService>,
        events: Arc<dyn EventSink>,
        limits: RequestLimits,
    ) -> Self {
        Self {
            store,
            locations,
            events,
            limits,
        }
    }

    /// Submit storage requests. A request whose file reference already
    /// exists on the destination is created `granted`; the check sweep
    /// finalizes it without a backend call.
    pub async fn submit_storage(
        &self,
        group_id: &str,
        items: Vec<StorageItem>,
    ) -> crate::ServiceResult<()> {
        validate_batch(
            items.len(),
            self.limits.for_type(RequestType::Storage),
            RequestType::Storage,
        )?;
        let now = OffsetDateTime::now_utc();
        for item in items {
            let existing = self
                .store
                .get_reference(item.checksum.as_str(), &item.storage)
                .await?;
            let status = if existing.is_some() {
                RequestStatus::Granted
            } else {
                RequestStatus::ToHandle
            };
            let row = RequestRow {
                request_id: Uuid::new_v4(),
                checksum: item.checksum.as_str().to_string(),
                storage_name: item.storage.clone(),
                request_type: RequestType::Storage.as_str().to_string(),
                status: status.as_str().to_string(),
                origin_url: Some(item.origin_url),
                source_storage: None,
                reference_only: false,
                file_name: item.file_name,
                mime_type: item.mime_type,
                size_bytes: item.size_bytes,
                error_cause: None,
                created_at: now,
                updated_at: now,
            };
            let request_id = self
                .store
                .merge_or_create_request(&row, &item.owner, group_id)
                .await?;
            tracing::trace!(
                checksum = %item.checksum,
                storage = %item.storage,
                owner = %item.owner,
                request_id = %request_id,
                status = %status,
                "Storage request aggregated"
            );
        }
        Ok(())
    }

    /// Submit deletion requests.
    pub async fn submit_deletion(
        &self,
        group_id: &str,
        items: Vec<DeletionItem>,
    ) -> crate::ServiceResult<()> {
        validate_batch(
            items.len(),
            self.limits.for_type(RequestType::Deletion),
            RequestType::Deletion,
        )?;
        let now = OffsetDateTime::now_utc();
        for item in items {
            let row = RequestRow {
                request_id: Uuid::new_v4(),
                checksum: item.checksum.as_str().to_string(),
                storage_name: item.storage.clone(),
                request_type: RequestType::Deletion.as_str().to_string(),
                status: RequestStatus::ToHandle.as_str().to_string(),
                origin_url: None,
                source_storage: None,
                reference_only: item.reference_only,
                file_name: String::new(),
                mime_type: String::new(),
                size_bytes: 0,
                error_cause: None,
                created_at: now,
                updated_at: now,
            };
            self.store
                .merge_or_create_request(&row, &item.owner, group_id)
                .await?;
        }
        Ok(())
    }

    /// Submit availability-restoration requests.
    ///
    /// Files already accessible (cached, or referenced online) succeed
    /// immediately; offline and unreferenced files fail immediately;
    /// nearline files get an aggregated request the dispatcher restores
    /// into the cache.
    pub async fn submit_availability(
        &self,
        group_id: &str,
        items: Vec<AvailabilityItem>,
    ) -> crate::ServiceResult<()> {
        validate_batch(
            items.len(),
            self.limits.for_type(RequestType::Availability),
            RequestType::Availability,
        )?;
        let now = OffsetDateTime::now_utc();

        let checksums: Vec<String> = items
            .iter()
            .map(|item| item.checksum.as_str().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let cached: HashMap<String, _> = self
            .store
            .find_cache_files(&checksums)
            .await?
            .into_iter()
            .filter(|row| !row.is_expired(now))
            .map(|row| (row.checksum.clone(), row))
            .collect();
        let mut references: HashMap<String, Vec<FileReferenceRow>> = HashMap::new();
        for reference in self.store.find_references_by_checksums(&checksums).await? {
            references
                .entry(reference.checksum.clone())
                .or_default()
                .push(reference);
        }

        for item in items {
            if cached.contains_key(item.checksum.as_str()) {
                self.publish_immediate(
                    RequestType::Availability,
                    &item.checksum,
                    "cache",
                    &item.owner,
                    group_id,
                    None,
                )
                .await;
                continue;
            }

            let refs = references.get(item.checksum.as_str());
            let best = match refs {
                Some(refs) => self.pick_best_reference(refs).await?,
                None => None,
            };
            match best {
                None => {
                    self.publish_immediate(
                        RequestType::Availability,
                        &item.checksum,
                        "unknown",
                        &item.owner,
                        group_id,
                        Some("file is not referenced on any storage".to_string()),
                    )
                    .await;
                }
                Some((reference, StorageType::Online)) => {
                    self.publish_immediate(
                        RequestType::Availability,
                        &item.checksum,
                        &reference.storage_name,
                        &item.owner,
                        group_id,
                        None,
                    )
                    .await;
                }
                Some((reference, StorageType::Offline)) => {
                    self.publish_immediate(
                        RequestType::Availability,
                        &item.checksum,
                        &reference.storage_name,
                        &item.owner,
                        group_id,
                        Some("file sits on offline storage".to_string()),
                    )
                    .await;
                }
                Some((reference, StorageType::Nearline)) => {
                    let row = RequestRow {
                        request_id: Uuid::new_v4(),
                        checksum: reference.checksum.clone(),
                        storage_name: reference.storage_name.clone(),
                        request_type: RequestType::Availability.as_str().to_string(),
                        status: RequestStatus::ToHandle.as_str().to_string(),
                        origin_url: None,
                        source_storage: None,
                        reference_only: false,
                        file_name: reference.file_name.clone(),
                        mime_type: reference.mime_type.clone(),
                        size_bytes: reference.size_bytes,
                        error_cause: None,
                        created_at: now,
                        updated_at: now,
                    };
                    self.store
                        .merge_or_create_request(&row, &item.owner, group_id)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Submit copy requests.
    pub async fn submit_copy(
        &self,
        group_id: &str,
        items: Vec<CopyItem>,
    ) -> crate::ServiceResult<()> {
        validate_batch(
            items.len(),
            self.limits.for_type(RequestType::Copy),
            RequestType::Copy,
        )?;
        let now = OffsetDateTime::now_utc();
        for item in items {
            let refs = self
                .store
                .find_references_by_checksums(&[item.checksum.as_str().to_string()])
                .await?;
            let source = match &item.source_storage {
                Some(name) => refs.iter().find(|r| &r.storage_name == name),
                None => self
                    .pick_best_reference(&refs)
                    .await?
                    .map(|(reference, _)| reference),
            };
            let Some(source) = source else {
                self.events
                    .publish_file_event(FileRequestEvent {
                        checksum: item.checksum.clone(),
                        storage_name: item.destination_storage.clone(),
                        request_type: RequestType::Copy,
                        owner: item.owner.clone(),
                        group_id: group_id.to_string(),
                        success: false,
                        error_cause: Some("no source reference for copy".to_string()),
                    })
                    .await;
                continue;
            };

            let row = RequestRow {
                request_id: Uuid::new_v4(),
                checksum: item.checksum.as_str().to_string(),
                storage_name: item.destination_storage.clone(),
                request_type: RequestType::Copy.as_str().to_string(),
                status: RequestStatus::ToHandle.as_str().to_string(),
                origin_url: None,
                source_storage: Some(source.storage_name.clone()),
                reference_only: false,
                file_name: source.file_name.clone(),
                mime_type: source.mime_type.clone(),
                size_bytes: source.size_bytes,
                error_cause: None,
                created_at: now,
                updated_at: now,
            };
            self.store
                .merge_or_create_request(&row, &item.owner, group_id)
                .await?;
        }
        Ok(())
    }

    /// Reference files that already sit on a storage, without any backend
    /// call. The success event is published immediately.
    pub async fn reference_files(
        &self,
        group_id: &str,
        items: Vec<ReferenceItem>,
    ) -> crate::ServiceResult<()> {
        if items.len() > self.limits.reference {
            return Err(crate::ServiceError::Validation(format!(
                "a maximum of {} reference items per call is allowed, got {}",
                self.limits.reference,
                items.len()
            )));
        }
        let now = OffsetDateTime::now_utc();
        for item in items {
            self.store
                .upsert_reference(&FileReferenceRow {
                    checksum: item.checksum.as_str().to_string(),
                    storage_name: item.storage.clone(),
                    storage_path: item.storage_path.clone(),
                    file_name: item.file_name.clone(),
                    mime_type: item.mime_type.clone(),
                    size_bytes: item.size_bytes,
                    nearline_confirmed: None,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            self.store
                .add_reference_owners(item.checksum.as_str(), &item.storage, &[item.owner.clone()])
                .await?;
            self.publish_immediate(
                RequestType::Storage,
                &item.checksum,
                &item.storage,
                &item.owner,
                group_id,
                None,
            )
            .await;
        }
        Ok(())
    }

    /// Reset error requests of a group back to dispatchable state.
    pub async fn retry_by_group(&self, group_id: &str) -> crate::ServiceResult<u64> {
        let count = self
            .store
            .reset_errors_by_group(group_id, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(group_id = %group_id, count = count, "Error requests scheduled for retry");
        Ok(count)
    }

    /// Reset error requests of an owner back to dispatchable state.
    pub async fn retry_by_owner(&self, owner: &str) -> crate::ServiceResult<u64> {
        let count = self
            .store
            .reset_errors_by_owner(owner, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(owner = %owner, count = count, "Error requests scheduled for retry");
        Ok(count)
    }

    /// Reset error requests of a storage back to dispatchable state.
    pub async fn retry_by_storage(&self, storage_name: &str) -> crate::ServiceResult<u64> {
        let count = self
            .store
            .reset_errors_by_storage(storage_name, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(storage = %storage_name, count = count, "Error requests scheduled for retry");
        Ok(count)
    }

    /// Highest-priority reference among `refs`, with its storage type.
    /// References on storages without a known configuration are skipped
    /// with a warning.
    async fn pick_best_reference<'a>(
        &self,
        refs: &'a [FileReferenceRow],
    ) -> crate::ServiceResult<Option<(&'a FileReferenceRow, StorageType)>> {
        if refs.is_empty() {
            return Ok(None);
        }
        let names: Vec<String> = refs
            .iter()
            .map(|r| r.storage_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let locations = self.locations.find_by_names(&names).await?;

        let mut best: Option<(&FileReferenceRow, StorageType, (u8, i32))> = None;
        for reference in refs {
            let Some(location) = locations.get(&reference.storage_name) else {
                tracing::warn!(
                    storage = %reference.storage_name,
                    "No configuration found for referenced storage"
                );
                continue;
            };
            let key = location.priority_key();
            if best.as_ref().is_none_or(|(_, _, current)| key < *current) {
                best = Some((reference, location.storage_type, key));
            }
        }
        Ok(best.map(|(reference, storage_type, _)| (reference, storage_type)))
    }

    async fn publish_immediate(
        &self,
        request_type: RequestType,
        checksum: &Checksum,
        storage_name: &str,
        owner: &str,
        group_id: &str,
        error_cause: Option<String>,
    ) {
        self.events
            .publish_file_event(FileRequestEvent {
                checksum: checksum.clone(),
                storage_name: storage_name.to_string(),
                request_type,
                owner: owner.to_string(),
                group_id: group_id.to_string(),
                success: error_cause.is_none(),
                error_cause,
            })
            .await;
    }
}

fn validate_batch(
    len: usize,
    max: usize,
    request_type: RequestType,
) -> crate::ServiceResult<()> {
    if len > max {
        return Err(crate::ServiceError::Validation(format!(
            "a maximum of {max} {request_type} items per call is allowed, got {len}"
        )));
    }
    Ok(())
}
