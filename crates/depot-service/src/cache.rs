//! Cache of restored nearline files.
//!
//! The cache holds time-limited local copies of files recalled from
//! nearline storage. The index lives in the metadata store; the bytes
//! live under the configured cache directory. Lazy eviction (at lookup
//! time) and the periodic purge sweep both go through
//! [`CacheFileRow::is_expired`], so the two paths can never disagree
//! about whether an entry is valid.

use depot_core::Checksum;
use depot_core::config::CacheConfig;
use depot_metadata::MetadataStore;
use depot_metadata::models::CacheFileRow;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

pub struct CacheService {
    store: Arc<dyn MetadataStore>,
    dir: PathBuf,
    ttl: time::Duration,
}

impl CacheService {
    pub fn new(store: Arc<dyn MetadataStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            dir: config.path.clone(),
            ttl: config.ttl(),
        }
    }

    /// Local path a restored copy of `checksum` is placed at.
    pub fn local_path_for(&self, checksum: &Checksum) -> PathBuf {
        self.dir.join(checksum.as_str())
    }

    /// Staging path for transient copies (copy dispatch), cleaned up by
    /// the caller.
    pub fn staging_path(&self) -> PathBuf {
        self.dir.join(".staging").join(uuid::Uuid::new_v4().to_string())
    }

    /// Record a freshly restored copy, valid for the configured TTL.
    pub async fn record_restored(
        &self,
        checksum: &Checksum,
        local_path: &std::path::Path,
        now: OffsetDateTime,
    ) -> crate::ServiceResult<CacheFileRow> {
        let row = CacheFileRow {
            checksum: checksum.as_str().to_string(),
            local_path: local_path.display().to_string(),
            expiration_date: now + self.ttl,
        };
        self.store.upsert_cache_file(&row).await?;
        Ok(row)
    }

    /// Cache entries for the given checksums, expired entries included.
    pub async fn find(&self, checksums: &[String]) -> crate::ServiceResult<Vec<CacheFileRow>> {
        Ok(self.store.find_cache_files(checksums).await?)
    }

    /// Evict one entry: delete the index row and best-effort remove the
    /// local file.
    pub async fn evict(&self, row: &CacheFileRow) -> crate::ServiceResult<()> {
        self.store.delete_cache_file(&row.checksum).await?;
        match tokio::fs::remove_file(&row.local_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    checksum = %row.checksum,
                    local_path = %row.local_path,
                    error = %err,
                    "Failed to remove evicted cache file"
                );
            }
        }
        Ok(())
    }

    /// Delete expired entries in bounded pages until none remain.
    /// Returns how many entries were purged.
    pub async fn purge_expired(&self, page_size: u32) -> crate::ServiceResult<u64> {
        let mut purged = 0u64;
        loop {
            let now = OffsetDateTime::now_utc();
            let page = self.store.find_expired_cache_files(now, page_size).await?;
            if page.is_empty() {
                break;
            }
            for row in &page {
                self.evict(row).await?;
                purged += 1;
            }
            if page.len() < page_size as usize {
                break;
            }
        }
        Ok(purged)
    }
}
