//! Request dispatcher: turns pending aggregated requests into backend
//! operations.
//!
//! Requests are paged per storage, ordered by checksum, and exactly one
//! backend operation runs per distinct `(checksum, storage)` pair (the
//! aggregation layer already guarantees one row per pair and type).
//! Operations for different pairs run with bounded parallelism; the
//! outcome write-back is applied per pair, so every owner multiplexed on
//! a request observes the same terminal status.

use crate::cache::CacheService;
use crate::events::{EventSink, FileRequestEvent, notify_group_if_complete};
use crate::{ServiceResult, UNKNOWN_STORAGE_LOCATION};
use depot_backend::{BackendRegistry, StorageBackend, StoreFileRequest};
use depot_core::{RequestStatus, RequestType};
use depot_metadata::MetadataStore;
use depot_metadata::models::{FileReferenceRow, RequestOwnerRow, RequestRow};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

pub struct Dispatcher {
    store: Arc<dyn MetadataStore>,
    registry: Arc<BackendRegistry>,
    events: Arc<dyn EventSink>,
    cache: Arc<CacheService>,
    page_size: u32,
    parallelism: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<BackendRegistry>,
        events: Arc<dyn EventSink>,
        cache: Arc<CacheService>,
        page_size: u32,
        parallelism: usize,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            cache,
            page_size,
            parallelism,
        }
    }

    /// Dispatch every storage with pending requests. A failure local to
    /// one storage never blocks its siblings. Returns whether any
    /// request was processed.
    pub async fn dispatch_all(&self) -> ServiceResult<bool> {
        let storages = self
            .store
            .storages_with_status(RequestStatus::ToHandle.as_str())
            .await?;
        let mut processed = false;
        for storage in storages {
            match self.dispatch(&storage).await {
                Ok(did_work) => processed |= did_work,
                Err(err) => {
                    tracing::error!(storage = %storage, error = %err, "Dispatch pass failed");
                }
            }
        }
        Ok(processed)
    }

    /// Dispatch pending requests of one storage, paging until drained.
    pub async fn dispatch(&self, storage_name: &str) -> ServiceResult<bool> {
        let mut processed = false;
        loop {
            let page = self
                .store
                .find_requests_by_storage_and_status(
                    storage_name,
                    RequestStatus::ToHandle.as_str(),
                    self.page_size,
                )
                .await?;
            if page.is_empty() {
                break;
            }
            let full_page = page.len() == self.page_size as usize;
            processed = true;

            match self.registry.resolve(storage_name) {
                Ok(backend) => {
                    // One backend operation per (checksum, storage) pair;
                    // pairs run concurrently, write-back is per pair.
                    let results: Vec<ServiceResult<()>> = futures::stream::iter(page)
                        .map(|request| self.handle_one(backend.clone(), request))
                        .buffer_unordered(self.parallelism)
                        .collect()
                        .await;
                    for result in results {
                        if let Err(err) = result {
                            tracing::error!(
                                storage = %storage_name,
                                error = %err,
                                "Request write-back failed; request stays dispatchable"
                            );
                        }
                    }
                }
                Err(err) => {
                    // Storage configured elsewhere, or mistyped: fail every
                    // request of this storage without blocking the batch.
                    tracing::warn!(storage = %storage_name, error = %err, "Unknown storage location");
                    let cause = format!("{UNKNOWN_STORAGE_LOCATION}: {err}");
                    for request in page {
                        self.complete_error(&request, &cause).await?;
                    }
                }
            }

            if !full_page {
                break;
            }
        }
        Ok(processed)
    }

    async fn handle_one(
        &self,
        backend: Arc<dyn StorageBackend>,
        request: RequestRow,
    ) -> ServiceResult<()> {
        match request.request_type()? {
            RequestType::Storage => self.handle_storage(backend, &request).await,
            RequestType::Deletion => self.handle_deletion(backend, &request).await,
            RequestType::Availability => self.handle_availability(backend, &request).await,
            RequestType::Copy => self.handle_copy(backend, &request).await,
        }
    }

    async fn handle_storage(
        &self,
        backend: Arc<dyn StorageBackend>,
        request: &RequestRow,
    ) -> ServiceResult<()> {
        let Some(origin_url) = &request.origin_url else {
            return self
                .complete_error(request, "storage request without origin url")
                .await;
        };
        let store_request = StoreFileRequest {
            checksum: request.checksum()?,
            origin_path: origin_path(origin_url),
            file_name: request.file_name.clone(),
            subdirectory: None,
        };
        match backend.store(&store_request).await {
            Ok(stored) => {
                self.record_reference(request, &request.storage_name, &stored.storage_path)
                    .await?;
                self.complete_success(request).await
            }
            Err(err) => self.complete_error(request, &err.to_string()).await,
        }
    }

    async fn handle_deletion(
        &self,
        backend: Arc<dyn StorageBackend>,
        request: &RequestRow,
    ) -> ServiceResult<()> {
        let Some(reference) = self
            .store
            .get_reference(&request.checksum, &request.storage_name)
            .await?
        else {
            // Nothing left to delete.
            return self.complete_success(request).await;
        };

        let owners = self.store.get_request_owners(request.request_id).await?;
        let mut remaining = self
            .store
            .get_reference_owners(&request.checksum, &request.storage_name)
            .await?
            .len() as u64;
        for owner in owner_names(&owners) {
            remaining = self
                .store
                .remove_reference_owner(&request.checksum, &request.storage_name, &owner)
                .await?;
        }
        if remaining > 0 {
            return self.complete_success(request).await;
        }

        // Last owner gone: the file itself goes, unless the caller asked
        // for the reference alone.
        if !request.reference_only {
            if let Err(err) = backend.delete(&reference.storage_path).await {
                return self.complete_error(request, &err.to_string()).await;
            }
        }
        self.store
            .delete_reference(&request.checksum, &request.storage_name)
            .await?;
        self.complete_success(request).await
    }

    async fn handle_availability(
        &self,
        backend: Arc<dyn StorageBackend>,
        request: &RequestRow,
    ) -> ServiceResult<()> {
        let Some(reference) = self
            .store
            .get_reference(&request.checksum, &request.storage_name)
            .await?
        else {
            return self
                .complete_error(request, "file is no longer referenced on this storage")
                .await;
        };

        let checksum = request.checksum()?;
        let destination = self.cache.local_path_for(&checksum);
        match backend.restore(&reference.storage_path, &destination).await {
            Ok(_) => {
                self.cache
                    .record_restored(&checksum, &destination, OffsetDateTime::now_utc())
                    .await?;
                self.complete_success(request).await
            }
            Err(err) => self.complete_error(request, &err.to_string()).await,
        }
    }

    async fn handle_copy(
        &self,
        backend: Arc<dyn StorageBackend>,
        request: &RequestRow,
    ) -> ServiceResult<()> {
        let Some(source_storage) = &request.source_storage else {
            return self
                .complete_error(request, "copy request without source storage")
                .await;
        };
        let Some(source_ref) = self
            .store
            .get_reference(&request.checksum, source_storage)
            .await?
        else {
            return self
                .complete_error(request, "file is no longer referenced on the copy source")
                .await;
        };
        let source_backend = match self.registry.resolve(source_storage) {
            Ok(source_backend) => source_backend,
            Err(err) => {
                let cause = format!("{UNKNOWN_STORAGE_LOCATION}: {err}");
                return self.complete_error(request, &cause).await;
            }
        };

        let staging = self.cache.staging_path();
        if let Err(err) = source_backend
            .restore(&source_ref.storage_path, &staging)
            .await
        {
            return self.complete_error(request, &err.to_string()).await;
        }

        let store_request = StoreFileRequest {
            checksum: request.checksum()?,
            origin_path: staging.clone(),
            file_name: request.file_name.clone(),
            subdirectory: None,
        };
        let stored = backend.store(&store_request).await;
        if let Err(err) = tokio::fs::remove_file(&staging).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    staging = %staging.display(),
                    error = %err,
                    "Failed to clean up copy staging file"
                );
            }
        }

        match stored {
            Ok(stored) => {
                self.record_reference(request, &request.storage_name, &stored.storage_path)
                    .await?;
                self.complete_success(request).await
            }
            Err(err) => self.complete_error(request, &err.to_string()).await,
        }
    }

    /// Create or update the file reference a successful store/copy left
    /// behind, with every requester as owner.
    async fn record_reference(
        &self,
        request: &RequestRow,
        storage_name: &str,
        storage_path: &str,
    ) -> ServiceResult<()> {
        let now = OffsetDateTime::now_utc();
        self.store
            .upsert_reference(&FileReferenceRow {
                checksum: request.checksum.clone(),
                storage_name: storage_name.to_string(),
                storage_path: storage_path.to_string(),
                file_name: request.file_name.clone(),
                mime_type: request.mime_type.clone(),
                size_bytes: request.size_bytes,
                nearline_confirmed: None,
                created_at: now,
                updated_at: now,
            })
            .await?;
        let owners = self.store.get_request_owners(request.request_id).await?;
        let names: Vec<String> = owner_names(&owners).into_iter().collect();
        self.store
            .add_reference_owners(&request.checksum, storage_name, &names)
            .await?;
        Ok(())
    }

    async fn complete_success(&self, request: &RequestRow) -> ServiceResult<()> {
        self.finish(request, RequestStatus::Handled, None).await
    }

    async fn complete_error(&self, request: &RequestRow, cause: &str) -> ServiceResult<()> {
        self.finish(request, RequestStatus::Error, Some(cause)).await
    }

    /// Terminal write-back for one pair: status update, one event per
    /// multiplexed owner, group completion checks.
    async fn finish(
        &self,
        request: &RequestRow,
        status: RequestStatus,
        error_cause: Option<&str>,
    ) -> ServiceResult<()> {
        self.store
            .update_request_status(
                request.request_id,
                status.as_str(),
                error_cause,
                OffsetDateTime::now_utc(),
            )
            .await?;

        let owners = self.store.get_request_owners(request.request_id).await?;
        let checksum = request.checksum()?;
        let request_type = request.request_type()?;
        for owner in &owners {
            self.events
                .publish_file_event(FileRequestEvent {
                    checksum: checksum.clone(),
                    storage_name: request.storage_name.clone(),
                    request_type,
                    owner: owner.owner.clone(),
                    group_id: owner.group_id.clone(),
                    success: status == RequestStatus::Handled,
                    error_cause: error_cause.map(str::to_string),
                })
                .await;
        }
        for group_id in group_ids(&owners) {
            notify_group_if_complete(&self.store, &self.events, &group_id).await?;
        }
        Ok(())
    }
}

fn owner_names(owners: &[RequestOwnerRow]) -> BTreeSet<String> {
    owners.iter().map(|row| row.owner.clone()).collect()
}

fn group_ids(owners: &[RequestOwnerRow]) -> BTreeSet<String> {
    owners.iter().map(|row| row.group_id.clone()).collect()
}

/// Origin URLs are local paths, optionally prefixed with `file://`.
fn origin_path(origin_url: &str) -> PathBuf {
    PathBuf::from(origin_url.strip_prefix("file://").unwrap_or(origin_url))
}
