//! Periodic sweeps reconciling and garbage-collecting requests.
//!
//! Three bounded-page loops, each reading fixed-size pages until a page
//! comes back empty so per-invocation latency stays predictable
//! regardless of backlog size:
//!
//! - check: finalize `granted` requests whose file reference exists,
//!   demote the rest to `to_handle`
//! - complete: early-delete `handled` rows whose side effects are
//!   confirmed, merging any owner that arrived late
//! - terminal delete: drop `handled`/`error` rows past the retention
//!   window, bounding the aggregation table

use crate::cache::CacheService;
use crate::events::{EventSink, FileRequestEvent, notify_group_if_complete};
use crate::ServiceResult;
use depot_core::{RequestStatus, RequestType};
use depot_metadata::MetadataStore;
use depot_metadata::models::RequestRow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

pub struct Sweeper {
    store: Arc<dyn MetadataStore>,
    events: Arc<dyn EventSink>,
    cache: Arc<CacheService>,
    page_size: u32,
    retention: time::Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        events: Arc<dyn EventSink>,
        cache: Arc<CacheService>,
        page_size: u32,
        retention: time::Duration,
    ) -> Self {
        Self {
            store,
            events,
            cache,
            page_size,
            retention,
        }
    }

    /// Finalize `granted` requests.
    ///
    /// A granted request was admitted because its file reference already
    /// existed. If the reference is still there, the requester just
    /// becomes another owner and the request completes without a backend
    /// call; if it vanished meanwhile, the request goes back to
    /// `to_handle` for a real dispatch. Returns how many requests were
    /// finalized.
    pub async fn check_sweep(&self) -> ServiceResult<u64> {
        let mut finalized = 0u64;
        loop {
            let page = self
                .store
                .find_requests_by_status(RequestStatus::Granted.as_str(), self.page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let full_page = page.len() == self.page_size as usize;

            // One reference lookup per storage instead of one per request.
            let mut by_storage: BTreeMap<&str, Vec<&RequestRow>> = BTreeMap::new();
            for request in &page {
                by_storage
                    .entry(request.storage_name.as_str())
                    .or_default()
                    .push(request);
            }
            for (storage_name, requests) in by_storage {
                let checksums: Vec<String> =
                    requests.iter().map(|r| r.checksum.clone()).collect();
                let existing: BTreeSet<String> = self
                    .store
                    .find_references_by_storage_and_checksums(storage_name, &checksums)
                    .await?
                    .into_iter()
                    .map(|reference| reference.checksum)
                    .collect();
                for request in requests {
                    if existing.contains(&request.checksum) {
                        self.finalize_granted(request).await?;
                        finalized += 1;
                    } else {
                        self.store
                            .update_request_status(
                                request.request_id,
                                RequestStatus::ToHandle.as_str(),
                                None,
                                OffsetDateTime::now_utc(),
                            )
                            .await?;
                    }
                }
            }

            if !full_page {
                break;
            }
        }
        Ok(finalized)
    }

    async fn finalize_granted(&self, request: &RequestRow) -> ServiceResult<()> {
        let owners = self.store.get_request_owners(request.request_id).await?;
        let names: Vec<String> = owners
            .iter()
            .map(|row| row.owner.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.store
            .add_reference_owners(&request.checksum, &request.storage_name, &names)
            .await?;
        self.store
            .update_request_status(
                request.request_id,
                RequestStatus::Handled.as_str(),
                None,
                OffsetDateTime::now_utc(),
            )
            .await?;

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
                    success: true,
                    error_cause: None,
                })
                .await;
        }
        let groups: BTreeSet<String> = owners.iter().map(|row| row.group_id.clone()).collect();
        for group_id in groups {
            notify_group_if_complete(&self.store, &self.events, &group_id).await?;
        }
        Ok(())
    }

    /// Early-delete `handled` storage and copy requests whose file
    /// reference exists, merging owners that were multiplexed after the
    /// backend call completed. Returns how many rows were deleted.
    pub async fn complete_sweep(&self) -> ServiceResult<u64> {
        let mut removed = 0u64;
        let mut cursor: Option<Uuid> = None;
        loop {
            let page = self
                .store
                .find_requests_by_status_after(
                    RequestStatus::Handled.as_str(),
                    cursor,
                    self.page_size,
                )
                .await?;
            if page.is_empty() {
                break;
            }
            let full_page = page.len() == self.page_size as usize;
            cursor = page.last().map(|request| request.request_id);

            let mut to_delete = Vec::new();
            for request in &page {
                let request_type = request.request_type()?;
                if !matches!(request_type, RequestType::Storage | RequestType::Copy) {
                    continue;
                }
                if self
                    .store
                    .get_reference(&request.checksum, &request.storage_name)
                    .await?
                    .is_none()
                {
                    // Side effect not observable yet; retention handles it.
                    continue;
                }
                let owners = self.store.get_request_owners(request.request_id).await?;
                let names: Vec<String> = owners
                    .iter()
                    .map(|row| row.owner.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                self.store
                    .add_reference_owners(&request.checksum, &request.storage_name, &names)
                    .await?;
                to_delete.push(request.request_id);
            }
            removed += to_delete.len() as u64;
            self.store.delete_requests(&to_delete).await?;

            if !full_page {
                break;
            }
        }
        Ok(removed)
    }

    /// Delete terminal requests past the retention window. Their owners
    /// were notified when the request reached its terminal status.
    pub async fn delete_terminal_sweep(&self) -> ServiceResult<u64> {
        let cutoff = OffsetDateTime::now_utc() - self.retention;
        let removed = self
            .store
            .delete_terminal_requests_older_than(cutoff)
            .await?;
        if removed > 0 {
            tracing::debug!(removed = removed, "Terminal requests deleted");
        }
        Ok(removed)
    }

    /// Purge expired cache files together with their local copies.
    pub async fn purge_cache_sweep(&self) -> ServiceResult<u64> {
        self.cache.purge_expired(self.page_size).await
    }
}
