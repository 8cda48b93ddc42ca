//! Aggregated request repository.

use crate::MetadataResult;
use crate::models::{RequestOwnerRow, RequestRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for the deduplicated request queue.
#[async_trait]
pub trait RequestRepo: Send + Sync {
    /// Merge an `(owner, group)` pair into the existing non-terminal
    /// request for this row's `(checksum, storage_name, request_type)`,
    /// or create the row if none exists.
    ///
    /// This is the dedup guarantee: concurrent submissions for the same
    /// physical operation never produce two non-terminal rows. Returns
    /// the id of the request the pair was multiplexed onto.
    async fn merge_or_create_request(
        &self,
        row: &RequestRow,
        owner: &str,
        group_id: &str,
    ) -> MetadataResult<Uuid>;

    /// One page of requests in `status` for one storage, ordered by
    /// checksum so requests for the same file group naturally.
    async fn find_requests_by_storage_and_status(
        &self,
        storage_name: &str,
        status: &str,
        limit: u32,
    ) -> MetadataResult<Vec<RequestRow>>;

    /// One page of requests in `status` across all storages.
    async fn find_requests_by_status(
        &self,
        status: &str,
        limit: u32,
    ) -> MetadataResult<Vec<RequestRow>>;

    /// Cursor-paged variant for sweeps whose rows may stay in `status`:
    /// returns requests ordered by id, strictly after `after` when given.
    async fn find_requests_by_status_after(
        &self,
        status: &str,
        after: Option<Uuid>,
        limit: u32,
    ) -> MetadataResult<Vec<RequestRow>>;

    /// Distinct storage names having at least one request in `status`.
    async fn storages_with_status(&self, status: &str) -> MetadataResult<Vec<String>>;

    /// All `(owner, group)` pairs multiplexed onto a request.
    async fn get_request_owners(&self, request_id: Uuid) -> MetadataResult<Vec<RequestOwnerRow>>;

    /// Update the status (and error cause) of one request.
    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: &str,
        error_cause: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete requests and their owner rows.
    async fn delete_requests(&self, request_ids: &[Uuid]) -> MetadataResult<()>;

    /// Delete terminal requests (handled or error) not updated since the
    /// cutoff. Returns how many rows were removed.
    async fn delete_terminal_requests_older_than(
        &self,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Number of non-terminal requests still carrying the group.
    async fn count_open_requests_of_group(&self, group_id: &str) -> MetadataResult<u64>;

    /// Terminal requests carrying the group, for the completion summary.
    async fn find_terminal_requests_of_group(
        &self,
        group_id: &str,
    ) -> MetadataResult<Vec<RequestRow>>;

    /// Reset error requests of a group back to `to_handle`.
    async fn reset_errors_by_group(
        &self,
        group_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Reset error requests of an owner back to `to_handle`.
    async fn reset_errors_by_owner(
        &self,
        owner: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Reset error requests of a storage back to `to_handle`.
    async fn reset_errors_by_storage(
        &self,
        storage_name: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64>;
}
