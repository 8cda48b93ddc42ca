//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{
    CacheFileRow, FileReferenceRow, OutputFileRow, RequestOwnerRow, RequestRow, StorageLocationRow,
};
use crate::repos::{
    CacheFileRepo, FileReferenceRepo, LocationRepo, LockRepo, OutputFileRepo, RequestRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Statuses considered non-terminal for dedup purposes.
const ACTIVE_STATUSES: &str = "('to_handle', 'granted')";

/// Statuses eligible for retention-based deletion.
const TERMINAL_STATUSES: &str = "('handled', 'error')";

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    FileReferenceRepo
    + RequestRepo
    + CacheFileRepo
    + LocationRepo
    + OutputFileRepo
    + LockRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store, one database file per tenant.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (and migrate) a tenant store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(MetadataError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors when several
            // replicas share the tenant database.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // per process avoids persistent lock failures under load.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "Tenant metadata store opened");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_references (
                checksum TEXT NOT NULL,
                storage_name TEXT NOT NULL,
                storage_path TEXT NOT NULL,
                file_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                nearline_confirmed INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (checksum, storage_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS file_reference_owners (
                checksum TEXT NOT NULL,
                storage_name TEXT NOT NULL,
                owner TEXT NOT NULL,
                PRIMARY KEY (checksum, storage_name, owner)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregated_requests (
                request_id BLOB PRIMARY KEY,
                checksum TEXT NOT NULL,
                storage_name TEXT NOT NULL,
                request_type TEXT NOT NULL,
                status TEXT NOT NULL,
                origin_url TEXT,
                source_storage TEXT,
                reference_only INTEGER NOT NULL DEFAULT 0,
                file_name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                error_cause TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The dedup invariant: at most one non-terminal request per
        // (checksum, storage, type). Concurrent inserts racing past the
        // pre-insert lookup are rejected here and merged by the caller.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_active
            ON aggregated_requests (checksum, storage_name, request_type)
            WHERE status IN ('to_handle', 'granted')
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_requests_status_storage
            ON aggregated_requests (status, storage_name, checksum)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_owners (
                request_id BLOB NOT NULL,
                owner TEXT NOT NULL,
                group_id TEXT NOT NULL,
                PRIMARY KEY (request_id, owner, group_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_request_owners_group ON request_owners (group_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_files (
                checksum TEXT PRIMARY KEY,
                local_path TEXT NOT NULL,
                expiration_date TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS storage_locations (
                name TEXT PRIMARY KEY,
                storage_type TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS output_files (
                execution_id BLOB NOT NULL,
                checksum TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                downloaded INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (execution_id, checksum)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sweep_locks (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileReferenceRepo for SqliteStore {
    async fn upsert_reference(&self, row: &FileReferenceRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_references (
                checksum, storage_name, storage_path, file_name, mime_type,
                size_bytes, nearline_confirmed, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (checksum, storage_name) DO UPDATE SET
                storage_path = excluded.storage_path,
                file_name = excluded.file_name,
                mime_type = excluded.mime_type,
                size_bytes = excluded.size_bytes,
                nearline_confirmed = excluded.nearline_confirmed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.checksum)
        .bind(&row.storage_name)
        .bind(&row.storage_path)
        .bind(&row.file_name)
        .bind(&row.mime_type)
        .bind(row.size_bytes)
        .bind(row.nearline_confirmed)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_reference(
        &self,
        checksum: &str,
        storage_name: &str,
    ) -> MetadataResult<Option<FileReferenceRow>> {
        let row = sqlx::query_as::<_, FileReferenceRow>(
            "SELECT * FROM file_references WHERE checksum = ? AND storage_name = ?",
        )
        .bind(checksum)
        .bind(storage_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_references_by_checksums(
        &self,
        checksums: &[String],
    ) -> MetadataResult<Vec<FileReferenceRow>> {
        if checksums.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM file_references WHERE checksum IN (");
        let mut separated = builder.separated(", ");
        for checksum in checksums {
            separated.push_bind(checksum);
        }
        separated.push_unseparated(") ORDER BY checksum, storage_name");
        let rows = builder
            .build_query_as::<FileReferenceRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_references_by_storage_and_checksums(
        &self,
        storage_name: &str,
        checksums: &[String],
    ) -> MetadataResult<Vec<FileReferenceRow>> {
        if checksums.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM file_references WHERE storage_name = ");
        builder.push_bind(storage_name);
        builder.push(" AND checksum IN (");
        let mut separated = builder.separated(", ");
        for checksum in checksums {
            separated.push_bind(checksum);
        }
        separated.push_unseparated(")");
        let rows = builder
            .build_query_as::<FileReferenceRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn add_reference_owners(
        &self,
        checksum: &str,
        storage_name: &str,
        owners: &[String],
    ) -> MetadataResult<()> {
        for owner in owners {
            sqlx::query(
                "INSERT OR IGNORE INTO file_reference_owners (checksum, storage_name, owner) \
                 VALUES (?, ?, ?)",
            )
            .bind(checksum)
            .bind(storage_name)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn remove_reference_owner(
        &self,
        checksum: &str,
        storage_name: &str,
        owner: &str,
    ) -> MetadataResult<u64> {
        sqlx::query(
            "DELETE FROM file_reference_owners \
             WHERE checksum = ? AND storage_name = ? AND owner = ?",
        )
        .bind(checksum)
        .bind(storage_name)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM file_reference_owners \
             WHERE checksum = ? AND storage_name = ?",
        )
        .bind(checksum)
        .bind(storage_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(remaining as u64)
    }

    async fn get_reference_owners(
        &self,
        checksum: &str,
        storage_name: &str,
    ) -> MetadataResult<BTreeSet<String>> {
        let owners: Vec<String> = sqlx::query_scalar(
            "SELECT owner FROM file_reference_owners \
             WHERE checksum = ? AND storage_name = ? ORDER BY owner",
        )
        .bind(checksum)
        .bind(storage_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(owners.into_iter().collect())
    }

    async fn set_nearline_confirmed(
        &self,
        checksum: &str,
        storage_name: &str,
        confirmed: bool,
    ) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE file_references SET nearline_confirmed = ?, updated_at = ? \
             WHERE checksum = ? AND storage_name = ?",
        )
        .bind(confirmed)
        .bind(OffsetDateTime::now_utc())
        .bind(checksum)
        .bind(storage_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_reference(&self, checksum: &str, storage_name: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM file_reference_owners WHERE checksum = ? AND storage_name = ?")
            .bind(checksum)
            .bind(storage_name)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM file_references WHERE checksum = ? AND storage_name = ?")
            .bind(checksum)
            .bind(storage_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RequestRepo for SqliteStore {
    async fn merge_or_create_request(
        &self,
        row: &RequestRow,
        owner: &str,
        group_id: &str,
    ) -> MetadataResult<Uuid> {
        // Merge-if-exists with a conditional-insert fallback: the partial
        // unique index on non-terminal rows rejects the loser of a
        // concurrent insert race, which then merges into the winner.
        let request_id = loop {
            let existing: Option<Uuid> = sqlx::query_scalar(&format!(
                "SELECT request_id FROM aggregated_requests \
                 WHERE checksum = ? AND storage_name = ? AND request_type = ? \
                 AND status IN {ACTIVE_STATUSES}",
            ))
            .bind(&row.checksum)
            .bind(&row.storage_name)
            .bind(&row.request_type)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(id) = existing {
                break id;
            }

            let inserted = sqlx::query(
                r#"
                INSERT INTO aggregated_requests (
                    request_id, checksum, storage_name, request_type, status,
                    origin_url, source_storage, reference_only,
                    file_name, mime_type, size_bytes, error_cause,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.request_id)
            .bind(&row.checksum)
            .bind(&row.storage_name)
            .bind(&row.request_type)
            .bind(&row.status)
            .bind(&row.origin_url)
            .bind(&row.source_storage)
            .bind(row.reference_only)
            .bind(&row.file_name)
            .bind(&row.mime_type)
            .bind(row.size_bytes)
            .bind(&row.error_cause)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => break row.request_id,
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    // Lost the race; loop back and merge into the winner.
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        };

        sqlx::query(
            "INSERT OR IGNORE INTO request_owners (request_id, owner, group_id) VALUES (?, ?, ?)",
        )
        .bind(request_id)
        .bind(owner)
        .bind(group_id)
        .execute(&self.pool)
        .await?;

        Ok(request_id)
    }

    async fn find_requests_by_storage_and_status(
        &self,
        storage_name: &str,
        status: &str,
        limit: u32,
    ) -> MetadataResult<Vec<RequestRow>> {
        let rows = sqlx::query_as::<_, RequestRow>(
            "SELECT * FROM aggregated_requests \
             WHERE storage_name = ? AND status = ? \
             ORDER BY checksum LIMIT ?",
        )
        .bind(storage_name)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_requests_by_status(
        &self,
        status: &str,
        limit: u32,
    ) -> MetadataResult<Vec<RequestRow>> {
        let rows = sqlx::query_as::<_, RequestRow>(
            "SELECT * FROM aggregated_requests \
             WHERE status = ? \
             ORDER BY storage_name, checksum LIMIT ?",
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_requests_by_status_after(
        &self,
        status: &str,
        after: Option<Uuid>,
        limit: u32,
    ) -> MetadataResult<Vec<RequestRow>> {
        let rows = match after {
            Some(after) => {
                sqlx::query_as::<_, RequestRow>(
                    "SELECT * FROM aggregated_requests \
                     WHERE status = ? AND request_id > ? \
                     ORDER BY request_id LIMIT ?",
                )
                .bind(status)
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RequestRow>(
                    "SELECT * FROM aggregated_requests \
                     WHERE status = ? \
                     ORDER BY request_id LIMIT ?",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn storages_with_status(&self, status: &str) -> MetadataResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT storage_name FROM aggregated_requests \
             WHERE status = ? ORDER BY storage_name",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn get_request_owners(&self, request_id: Uuid) -> MetadataResult<Vec<RequestOwnerRow>> {
        let rows = sqlx::query_as::<_, RequestOwnerRow>(
            "SELECT * FROM request_owners WHERE request_id = ? ORDER BY owner, group_id",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: &str,
        error_cause: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE aggregated_requests \
             SET status = ?, error_cause = ?, updated_at = ? \
             WHERE request_id = ?",
        )
        .bind(status)
        .bind(error_cause)
        .bind(updated_at)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_requests(&self, request_ids: &[Uuid]) -> MetadataResult<()> {
        if request_ids.is_empty() {
            return Ok(());
        }
        let mut owners: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM request_owners WHERE request_id IN (");
        let mut separated = owners.separated(", ");
        for id in request_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        owners.build().execute(&self.pool).await?;

        let mut requests: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM aggregated_requests WHERE request_id IN (");
        let mut separated = requests.separated(", ");
        for id in request_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        requests.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_terminal_requests_older_than(
        &self,
        cutoff: OffsetDateTime,
    ) -> MetadataResult<u64> {
        sqlx::query(&format!(
            "DELETE FROM request_owners WHERE request_id IN ( \
                 SELECT request_id FROM aggregated_requests \
                 WHERE status IN {TERMINAL_STATUSES} AND updated_at < ?)",
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(&format!(
            "DELETE FROM aggregated_requests \
             WHERE status IN {TERMINAL_STATUSES} AND updated_at < ?",
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_open_requests_of_group(&self, group_id: &str) -> MetadataResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(DISTINCT r.request_id) \
             FROM aggregated_requests r \
             JOIN request_owners o ON o.request_id = r.request_id \
             WHERE o.group_id = ? AND r.status IN {ACTIVE_STATUSES}",
        ))
        .bind(group_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn find_terminal_requests_of_group(
        &self,
        group_id: &str,
    ) -> MetadataResult<Vec<RequestRow>> {
        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "SELECT DISTINCT r.* \
             FROM aggregated_requests r \
             JOIN request_owners o ON o.request_id = r.request_id \
             WHERE o.group_id = ? AND r.status IN {TERMINAL_STATUSES} \
             ORDER BY r.checksum",
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn reset_errors_by_group(
        &self,
        group_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64> {
        let result = sqlx::query(&format!(
            "UPDATE aggregated_requests SET status = 'to_handle', error_cause = NULL, \
             updated_at = ? \
             WHERE status = 'error' \
             AND request_id IN (SELECT request_id FROM request_owners WHERE group_id = ?) \
             AND NOT EXISTS ( \
                 SELECT 1 FROM aggregated_requests a \
                 WHERE a.checksum = aggregated_requests.checksum \
                 AND a.storage_name = aggregated_requests.storage_name \
                 AND a.request_type = aggregated_requests.request_type \
                 AND a.status IN {ACTIVE_STATUSES})",
        ))
        .bind(updated_at)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_errors_by_owner(
        &self,
        owner: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64> {
        let result = sqlx::query(&format!(
            "UPDATE aggregated_requests SET status = 'to_handle', error_cause = NULL, \
             updated_at = ? \
             WHERE status = 'error' \
             AND request_id IN (SELECT request_id FROM request_owners WHERE owner = ?) \
             AND NOT EXISTS ( \
                 SELECT 1 FROM aggregated_requests a \
                 WHERE a.checksum = aggregated_requests.checksum \
                 AND a.storage_name = aggregated_requests.storage_name \
                 AND a.request_type = aggregated_requests.request_type \
                 AND a.status IN {ACTIVE_STATUSES})",
        ))
        .bind(updated_at)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reset_errors_by_storage(
        &self,
        storage_name: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<u64> {
        let result = sqlx::query(&format!(
            "UPDATE aggregated_requests SET status = 'to_handle', error_cause = NULL, \
             updated_at = ? \
             WHERE status = 'error' AND storage_name = ? \
             AND NOT EXISTS ( \
                 SELECT 1 FROM aggregated_requests a \
                 WHERE a.checksum = aggregated_requests.checksum \
                 AND a.storage_name = aggregated_requests.storage_name \
                 AND a.request_type = aggregated_requests.request_type \
                 AND a.status IN {ACTIVE_STATUSES})",
        ))
        .bind(updated_at)
        .bind(storage_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheFileRepo for SqliteStore {
    async fn upsert_cache_file(&self, row: &CacheFileRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_files (checksum, local_path, expiration_date)
            VALUES (?, ?, ?)
            ON CONFLICT (checksum) DO UPDATE SET
                local_path = excluded.local_path,
                expiration_date = excluded.expiration_date
            "#,
        )
        .bind(&row.checksum)
        .bind(&row.local_path)
        .bind(row.expiration_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cache_file(&self, checksum: &str) -> MetadataResult<Option<CacheFileRow>> {
        let row = sqlx::query_as::<_, CacheFileRow>("SELECT * FROM cache_files WHERE checksum = ?")
            .bind(checksum)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_cache_files(&self, checksums: &[String]) -> MetadataResult<Vec<CacheFileRow>> {
        if checksums.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM cache_files WHERE checksum IN (");
        let mut separated = builder.separated(", ");
        for checksum in checksums {
            separated.push_bind(checksum);
        }
        separated.push_unseparated(") ORDER BY checksum");
        let rows = builder
            .build_query_as::<CacheFileRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn delete_cache_file(&self, checksum: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM cache_files WHERE checksum = ?")
            .bind(checksum)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_expired_cache_files(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<CacheFileRow>> {
        let rows = sqlx::query_as::<_, CacheFileRow>(
            "SELECT * FROM cache_files WHERE expiration_date <= ? \
             ORDER BY expiration_date LIMIT ?",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl LocationRepo for SqliteStore {
    async fn create_location(&self, row: &StorageLocationRow) -> MetadataResult<()> {
        let result = sqlx::query(
            "INSERT INTO storage_locations (name, storage_type, priority, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.name)
        .bind(&row.storage_type)
        .bind(row.priority)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                MetadataError::AlreadyExists(format!("storage location {}", row.name)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_location(&self, row: &StorageLocationRow) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE storage_locations SET storage_type = ?, priority = ?, updated_at = ? \
             WHERE name = ?",
        )
        .bind(&row.storage_type)
        .bind(row.priority)
        .bind(row.updated_at)
        .bind(&row.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "storage location {}",
                row.name
            )));
        }
        Ok(())
    }

    async fn get_location(&self, name: &str) -> MetadataResult<Option<StorageLocationRow>> {
        let row =
            sqlx::query_as::<_, StorageLocationRow>("SELECT * FROM storage_locations WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn find_locations_by_names(
        &self,
        names: &[String],
    ) -> MetadataResult<Vec<StorageLocationRow>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM storage_locations WHERE name IN (");
        let mut separated = builder.separated(", ");
        for name in names {
            separated.push_bind(name);
        }
        separated.push_unseparated(") ORDER BY name");
        let rows = builder
            .build_query_as::<StorageLocationRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_locations(&self) -> MetadataResult<Vec<StorageLocationRow>> {
        let rows = sqlx::query_as::<_, StorageLocationRow>(
            "SELECT * FROM storage_locations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_location(&self, name: &str) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM storage_locations WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("storage location {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputFileRepo for SqliteStore {
    async fn record_output_file(&self, row: &OutputFileRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO output_files (
                execution_id, checksum, size_bytes, url, created_at, downloaded, deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.execution_id)
        .bind(&row.checksum)
        .bind(row.size_bytes)
        .bind(&row.url)
        .bind(row.created_at)
        .bind(row.downloaded)
        .bind(row.deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_output_file(
        &self,
        execution_id: Uuid,
        checksum: &str,
    ) -> MetadataResult<Option<OutputFileRow>> {
        let row = sqlx::query_as::<_, OutputFileRow>(
            "SELECT * FROM output_files WHERE execution_id = ? AND checksum = ?",
        )
        .bind(execution_id)
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_output_files(&self, execution_id: Uuid) -> MetadataResult<Vec<OutputFileRow>> {
        let rows = sqlx::query_as::<_, OutputFileRow>(
            "SELECT * FROM output_files WHERE execution_id = ? ORDER BY checksum",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_output_downloaded(
        &self,
        execution_id: Uuid,
        checksum: &str,
    ) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE output_files SET downloaded = 1 WHERE execution_id = ? AND checksum = ?",
        )
        .bind(execution_id)
        .bind(checksum)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_output_deleted(&self, execution_id: Uuid, checksum: &str) -> MetadataResult<()> {
        sqlx::query("UPDATE output_files SET deleted = 1 WHERE execution_id = ? AND checksum = ?")
            .bind(execution_id)
            .bind(checksum)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LockRepo for SqliteStore {
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<bool> {
        // Conditional write: insert a fresh lock, or steal one whose lease
        // has expired. A live lease leaves the row untouched.
        let result = sqlx::query(
            r#"
            INSERT INTO sweep_locks (name, holder, expires_at) VALUES (?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE sweep_locks.expires_at <= ?
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lock(&self, name: &str, holder: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM sweep_locks WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("meta.db")).await.unwrap();
        (dir, store)
    }

    fn request_row(checksum: &str, storage: &str) -> RequestRow {
        let now = OffsetDateTime::now_utc();
        RequestRow {
            request_id: Uuid::new_v4(),
            checksum: checksum.to_string(),
            storage_name: storage.to_string(),
            request_type: "storage".to_string(),
            status: "to_handle".to_string(),
            origin_url: Some("file:///tmp/src".to_string()),
            source_storage: None,
            reference_only: false,
            file_name: "data.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size_bytes: 42,
            error_cause: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_merge_or_create_dedups_by_key() {
        let (_dir, store) = open_store().await;
        let row = request_row("c1", "s1");

        let first = store.merge_or_create_request(&row, "u1", "g1").await.unwrap();
        let second_row = request_row("c1", "s1");
        let second = store
            .merge_or_create_request(&second_row, "u2", "g2")
            .await
            .unwrap();

        assert_eq!(first, second);
        let owners = store.get_request_owners(first).await.unwrap();
        assert_eq!(owners.len(), 2);

        let page = store
            .find_requests_by_storage_and_status("s1", "to_handle", 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_request_does_not_block_new_one() {
        let (_dir, store) = open_store().await;
        let row = request_row("c1", "s1");
        let id = store.merge_or_create_request(&row, "u1", "g1").await.unwrap();
        store
            .update_request_status(id, "handled", None, OffsetDateTime::now_utc())
            .await
            .unwrap();

        let fresh = request_row("c1", "s1");
        let new_id = store.merge_or_create_request(&fresh, "u2", "g2").await.unwrap();
        assert_ne!(id, new_id);
    }

    #[tokio::test]
    async fn test_lock_acquire_release_steal() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let lease = now + time::Duration::seconds(300);

        assert!(store.try_acquire_lock("dispatch", "a", now, lease).await.unwrap());
        assert!(!store.try_acquire_lock("dispatch", "b", now, lease).await.unwrap());

        // A different action name is an independent lock domain.
        assert!(store.try_acquire_lock("check", "b", now, lease).await.unwrap());

        store.release_lock("dispatch", "a").await.unwrap();
        assert!(store.try_acquire_lock("dispatch", "b", now, lease).await.unwrap());

        // An expired lease can be stolen.
        let later = lease + time::Duration::seconds(1);
        assert!(
            store
                .try_acquire_lock("dispatch", "c", later, later + time::Duration::seconds(300))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_reference_owner_lifecycle() {
        let (_dir, store) = open_store().await;
        let now = OffsetDateTime::now_utc();
        let row = FileReferenceRow {
            checksum: "c1".to_string(),
            storage_name: "s1".to_string(),
            storage_path: "/store/c1".to_string(),
            file_name: "data.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            size_bytes: 42,
            nearline_confirmed: None,
            created_at: now,
            updated_at: now,
        };
        store.upsert_reference(&row).await.unwrap();
        store
            .add_reference_owners("c1", "s1", &["u1".to_string(), "u2".to_string()])
            .await
            .unwrap();

        assert_eq!(store.remove_reference_owner("c1", "s1", "u1").await.unwrap(), 1);
        assert_eq!(store.remove_reference_owner("c1", "s1", "u2").await.unwrap(), 0);
    }
}
