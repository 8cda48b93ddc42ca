//! depot daemon binary.

use anyhow::{Context, Result};
use clap::Parser;
use depot_backend::{BackendRegistry, FilesystemBackend, NearlineFilesystemBackend};
use depot_core::StorageLocation;
use depot_core::config::{AppConfig, BackendConfig};
use depot_metadata::{MetadataStore, SqliteStore};
use depot_service::{
    CacheService, Dispatcher, LocationService, LogEventSink, Scheduler, Sweeper, TenantContext,
};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// depot - tiered file storage lifecycle daemon
#[derive(Parser, Debug)]
#[command(name = "depotd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;

    let registry = Arc::new(BackendRegistry::new());
    for backend in &config.backends {
        match backend {
            BackendConfig::Filesystem { name, path, .. } => {
                registry.register(name.clone(), Arc::new(FilesystemBackend::new(path).await?));
            }
            BackendConfig::Nearline {
                name,
                archive_path,
                staging_path,
                staging_ttl_secs,
                ..
            } => {
                let ttl = time::Duration::seconds(
                    i64::try_from(*staging_ttl_secs).unwrap_or(i64::MAX),
                );
                registry.register(
                    name.clone(),
                    Arc::new(NearlineFilesystemBackend::new(archive_path, staging_path, ttl).await?),
                );
            }
        }
        tracing::info!(name = %backend.name(), storage_type = %backend.storage_type(), "Backend registered");
    }

    let events = Arc::new(LogEventSink);
    let mut tenants = Vec::new();
    for tenant in &config.tenants {
        let store: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(config.data_dir.join(format!("{tenant}.db")))
                .await
                .with_context(|| format!("failed to open metadata store for tenant {tenant}"))?,
        );
        store.health_check().await?;

        // Sync configured backends into the tenant's location table so
        // availability resolution can classify them.
        let locations = Arc::new(LocationService::new(store.clone(), &config.locations));
        for backend in &config.backends {
            locations
                .ensure(&StorageLocation {
                    name: backend.name().to_string(),
                    storage_type: backend.storage_type(),
                    priority: backend.priority(),
                })
                .await?;
        }

        let cache = Arc::new(CacheService::new(store.clone(), &config.cache));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            registry.clone(),
            events.clone(),
            cache.clone(),
            config.scheduler.page_size,
            config.output.parallelism.max(1),
        ));
        let sweeper = Arc::new(Sweeper::new(
            store.clone(),
            events.clone(),
            cache.clone(),
            config.scheduler.page_size,
            config.scheduler.terminal_retention(),
        ));

        tracing::info!(tenant = %tenant, "Tenant store ready");
        tenants.push(TenantContext {
            name: tenant.clone(),
            store,
            dispatcher,
            sweeper,
        });
    }

    let scheduler = Scheduler::new(tenants, config.scheduler.lock_lease_secs);

    let mut dispatch_interval = tokio::time::interval(std::time::Duration::from_secs(
        config.scheduler.dispatch_interval_secs,
    ));
    let mut sweep_interval = tokio::time::interval(std::time::Duration::from_secs(
        config.scheduler.sweep_interval_secs,
    ));

    tracing::info!("depotd started");
    loop {
        tokio::select! {
            _ = dispatch_interval.tick() => {
                scheduler.tick_dispatch().await;
            }
            _ = sweep_interval.tick() => {
                scheduler.tick_check().await;
                scheduler.tick_complete().await;
                scheduler.tick_purge().await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}
