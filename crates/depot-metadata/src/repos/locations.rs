//! Storage location configuration repository.

use crate::MetadataResult;
use crate::models::StorageLocationRow;
use async_trait::async_trait;

/// Repository for named storage configurations.
#[async_trait]
pub trait LocationRepo: Send + Sync {
    /// Create a location. Fails with `AlreadyExists` if the name is taken.
    async fn create_location(&self, row: &StorageLocationRow) -> MetadataResult<()>;

    /// Update a location. Fails with `NotFound` if the name is unknown.
    async fn update_location(&self, row: &StorageLocationRow) -> MetadataResult<()>;

    /// Get a location by name.
    async fn get_location(&self, name: &str) -> MetadataResult<Option<StorageLocationRow>>;

    /// Locations matching any of the given names. Missing names simply
    /// produce no row.
    async fn find_locations_by_names(
        &self,
        names: &[String],
    ) -> MetadataResult<Vec<StorageLocationRow>>;

    /// All configured locations.
    async fn list_locations(&self) -> MetadataResult<Vec<StorageLocationRow>>;

    /// Delete a location. Fails with `NotFound` if the name is unknown.
    async fn delete_location(&self, name: &str) -> MetadataResult<()>;
}
