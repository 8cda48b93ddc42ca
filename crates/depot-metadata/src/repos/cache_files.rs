//! Cache file index repository.

use crate::MetadataResult;
use crate::models::CacheFileRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for the index of locally restored nearline files.
#[async_trait]
pub trait CacheFileRepo: Send + Sync {
    /// Insert or replace a cache entry.
    async fn upsert_cache_file(&self, row: &CacheFileRow) -> MetadataResult<()>;

    /// Get one cache entry.
    async fn get_cache_file(&self, checksum: &str) -> MetadataResult<Option<CacheFileRow>>;

    /// Cache entries matching any of the given checksums, expired or not.
    /// Expiry is the caller's concern so lazy and sweeping eviction share
    /// one predicate.
    async fn find_cache_files(&self, checksums: &[String]) -> MetadataResult<Vec<CacheFileRow>>;

    /// Delete a cache entry.
    async fn delete_cache_file(&self, checksum: &str) -> MetadataResult<()>;

    /// One page of entries expired at `now`.
    async fn find_expired_cache_files(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<CacheFileRow>>;
}
