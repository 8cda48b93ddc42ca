//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level service configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Active tenants. Each tenant gets its own metadata store; the
    /// scheduler iterates them on every tick.
    #[serde(default = "default_tenants")]
    pub tenants: Vec<String>,
    /// Directory holding per-tenant metadata databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub limits: RequestLimits,
    #[serde(default)]
    pub availability: AvailabilityConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Backends registered at startup. Each entry also ensures a storage
    /// location row exists in every tenant store.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tenants: default_tenants(),
            data_dir: default_data_dir(),
            scheduler: SchedulerConfig::default(),
            limits: RequestLimits::default(),
            availability: AvailabilityConfig::default(),
            cache: CacheConfig::default(),
            locations: LocationsConfig::default(),
            output: OutputConfig::default(),
            backends: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.tenants.is_empty() {
            return Err("at least one tenant must be configured".to_string());
        }
        if self.scheduler.page_size == 0 {
            return Err("scheduler.page_size must be positive".to_string());
        }
        if self.scheduler.lock_lease_secs == 0 {
            return Err("scheduler.lock_lease_secs must be positive".to_string());
        }
        if self.availability.max_bulk_size == 0 {
            return Err("availability.max_bulk_size must be positive".to_string());
        }
        if self.output.parallelism == 0 {
            return Err("output.parallelism must be positive".to_string());
        }
        Ok(())
    }
}

/// Periodic scheduling and sweep tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between dispatch ticks.
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    /// Seconds between check/complete/purge sweep ticks.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Lease duration for sweep locks, in seconds.
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,
    /// Page size for paged sweeps and dispatch passes.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// How long terminal requests are retained before the sweeper deletes
    /// them, in seconds.
    #[serde(default = "default_terminal_retention_secs")]
    pub terminal_retention_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_secs: default_dispatch_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            lock_lease_secs: default_lock_lease_secs(),
            page_size: default_page_size(),
            terminal_retention_secs: default_terminal_retention_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn terminal_retention(&self) -> time::Duration {
        let secs = i64::try_from(self.terminal_retention_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }
}

/// Per-request-type ingress batch ceilings.
///
/// A submission exceeding the ceiling for its type is rejected whole
/// before any persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestLimits {
    #[serde(default = "default_storage_limit")]
    pub storage: usize,
    #[serde(default = "default_deletion_limit")]
    pub deletion: usize,
    #[serde(default = "default_reference_limit")]
    pub reference: usize,
    #[serde(default = "default_availability_limit")]
    pub availability: usize,
    #[serde(default = "default_copy_limit")]
    pub copy: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            storage: default_storage_limit(),
            deletion: default_deletion_limit(),
            reference: default_reference_limit(),
            availability: default_availability_limit(),
            copy: default_copy_limit(),
        }
    }
}

impl RequestLimits {
    /// Ceiling for a given ingress request type.
    pub fn for_type(&self, request_type: crate::RequestType) -> usize {
        match request_type {
            crate::RequestType::Storage => self.storage,
            crate::RequestType::Deletion => self.deletion,
            crate::RequestType::Availability => self.availability,
            crate::RequestType::Copy => self.copy,
        }
    }
}

/// Availability resolution tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AvailabilityConfig {
    /// Maximum number of checksums accepted per bulk availability call.
    #[serde(default = "default_max_bulk_size")]
    pub max_bulk_size: usize,
    /// Timeout for one nearline backend availability check, in seconds.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            max_bulk_size: default_max_bulk_size(),
            backend_timeout_secs: default_backend_timeout_secs(),
        }
    }
}

impl AvailabilityConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

/// Local cache of restored nearline files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory where restored copies are placed.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Lifetime of a restored copy, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> time::Duration {
        let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }
}

/// Storage-location configuration cache tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationsConfig {
    /// TTL of locally cached storage location configurations, in seconds.
    #[serde(default = "default_location_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_location_cache_ttl_secs(),
        }
    }
}

impl LocationsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Content-addressed output storage tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base directory for content-addressed output placement.
    #[serde(default = "default_output_base_path")]
    pub base_path: PathBuf,
    /// Bounded worker pool size for hashing and copying output files.
    #[serde(default = "default_output_parallelism")]
    pub parallelism: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_path: default_output_base_path(),
            parallelism: default_output_parallelism(),
        }
    }
}

/// Built-in storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Online storage backed by a local directory or mounted share.
    Filesystem {
        name: String,
        path: PathBuf,
        #[serde(default)]
        priority: i32,
    },
    /// Nearline storage modelling a tiered archive mount.
    Nearline {
        name: String,
        archive_path: PathBuf,
        staging_path: PathBuf,
        #[serde(default = "default_staging_ttl_secs")]
        staging_ttl_secs: u64,
        #[serde(default)]
        priority: i32,
    },
}

impl BackendConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Filesystem { name, .. } => name,
            Self::Nearline { name, .. } => name,
        }
    }

    pub fn storage_type(&self) -> crate::StorageType {
        match self {
            Self::Filesystem { .. } => crate::StorageType::Online,
            Self::Nearline { .. } => crate::StorageType::Nearline,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            Self::Filesystem { priority, .. } => *priority,
            Self::Nearline { priority, .. } => *priority,
        }
    }
}

fn default_staging_ttl_secs() -> u64 {
    43200 // 12 hours
}

fn default_tenants() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/metadata")
}

fn default_dispatch_interval_secs() -> u64 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_lock_lease_secs() -> u64 {
    crate::DEFAULT_LOCK_LEASE_SECS
}

fn default_page_size() -> u32 {
    crate::DEFAULT_PAGE_SIZE
}

fn default_terminal_retention_secs() -> u64 {
    3600
}

fn default_storage_limit() -> usize {
    500
}

fn default_deletion_limit() -> usize {
    100
}

fn default_reference_limit() -> usize {
    100
}

fn default_availability_limit() -> usize {
    1000
}

fn default_copy_limit() -> usize {
    500
}

fn default_max_bulk_size() -> usize {
    1000
}

fn default_backend_timeout_secs() -> u64 {
    30
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_cache_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_location_cache_ttl_secs() -> u64 {
    300
}

fn default_output_base_path() -> PathBuf {
    PathBuf::from("./data/outputs")
}

fn default_output_parallelism() -> usize {
    4
}
