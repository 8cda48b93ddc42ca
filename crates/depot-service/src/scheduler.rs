//! Scheduling guard: lease-locked periodic sweeps across replicas and
//! tenants.
//!
//! Every tick iterates the configured tenants. Per tenant and per action
//! a named lease lock is taken with zero acquisition timeout: if another
//! replica (or another tenant iteration) holds it, this tick is simply
//! skipped. Distinct lock names per action let dispatch, check, complete
//! and purge run concurrently with each other while each stays
//! single-flight across the fleet. The lock is released on success and
//! on error alike; a crashed holder is covered by lease expiry.

use crate::dispatcher::Dispatcher;
use crate::sweeper::Sweeper;
use crate::ServiceResult;
use depot_metadata::MetadataStore;
use std::future::Future;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Lock names, one per scheduled action type.
pub const DISPATCH_LOCK: &str = "dispatch";
pub const CHECK_LOCK: &str = "check";
pub const COMPLETE_LOCK: &str = "complete";
pub const PURGE_LOCK: &str = "purge";

/// Everything the scheduler needs for one tenant.
pub struct TenantContext {
    pub name: String,
    pub store: Arc<dyn MetadataStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub sweeper: Arc<Sweeper>,
}

pub struct Scheduler {
    tenants: Vec<TenantContext>,
    lease: time::Duration,
    holder: String,
}

impl Scheduler {
    pub fn new(tenants: Vec<TenantContext>, lease_secs: u64) -> Self {
        let lease_secs = i64::try_from(lease_secs).unwrap_or(i64::MAX);
        Self {
            tenants,
            lease: time::Duration::seconds(lease_secs),
            // Unique per process so a replica never steals its own lease.
            holder: format!("{}-{}", std::process::id(), Uuid::new_v4()),
        }
    }

    /// The tenants this scheduler drives.
    pub fn tenants(&self) -> &[TenantContext] {
        &self.tenants
    }

    /// Dispatch tick: drain pending requests of every tenant.
    pub async fn tick_dispatch(&self) {
        for tenant in &self.tenants {
            let dispatcher = tenant.dispatcher.clone();
            let outcome = self
                .run_locked(tenant, DISPATCH_LOCK, || async move {
                    dispatcher.dispatch_all().await.map(|_| ())
                })
                .await;
            log_outcome(&tenant.name, DISPATCH_LOCK, outcome);
        }
    }

    /// Check tick: finalize granted requests and drop terminal rows past
    /// retention, back-to-back under the same lease.
    pub async fn tick_check(&self) {
        for tenant in &self.tenants {
            let sweeper = tenant.sweeper.clone();
            let outcome = self
                .run_locked(tenant, CHECK_LOCK, || async move {
                    sweeper.check_sweep().await?;
                    sweeper.delete_terminal_sweep().await?;
                    Ok(())
                })
                .await;
            log_outcome(&tenant.name, CHECK_LOCK, outcome);
        }
    }

    /// Complete tick: early-delete handled requests with confirmed side
    /// effects.
    pub async fn tick_complete(&self) {
        for tenant in &self.tenants {
            let sweeper = tenant.sweeper.clone();
            let outcome = self
                .run_locked(tenant, COMPLETE_LOCK, || async move {
                    sweeper.complete_sweep().await.map(|_| ())
                })
                .await;
            log_outcome(&tenant.name, COMPLETE_LOCK, outcome);
        }
    }

    /// Purge tick: evict expired cache files.
    pub async fn tick_purge(&self) {
        for tenant in &self.tenants {
            let sweeper = tenant.sweeper.clone();
            let outcome = self
                .run_locked(tenant, PURGE_LOCK, || async move {
                    sweeper.purge_cache_sweep().await.map(|_| ())
                })
                .await;
            log_outcome(&tenant.name, PURGE_LOCK, outcome);
        }
    }

    /// Run `action` under its named lease lock for one tenant.
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere (contention is
    /// not an error; the next tick retries). The release runs whether the
    /// action succeeded or failed.
    pub async fn run_locked<F, Fut>(
        &self,
        tenant: &TenantContext,
        action: &str,
        f: F,
    ) -> ServiceResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<()>>,
    {
        let now = OffsetDateTime::now_utc();
        let acquired = tenant
            .store
            .try_acquire_lock(action, &self.holder, now, now + self.lease)
            .await?;
        if !acquired {
            tracing::debug!(
                tenant = %tenant.name,
                action = %action,
                "Lock held elsewhere, skipping tick"
            );
            return Ok(false);
        }

        let result = f().await;

        // Guaranteed release, success or not. A failed release only costs
        // one lease worth of skipped ticks.
        if let Err(err) = tenant.store.release_lock(action, &self.holder).await {
            tracing::error!(
                tenant = %tenant.name,
                action = %action,
                error = %err,
                "Failed to release sweep lock"
            );
        }

        result.map(|()| true)
    }
}

fn log_outcome(tenant: &str, action: &str, outcome: ServiceResult<bool>) {
    match outcome {
        Ok(_) => {}
        Err(err) => {
            // A tenant's failure never stops the remaining tenants or the
            // next tick.
            tracing::error!(
                tenant = %tenant,
                action = %action,
                error = %err,
                "Scheduled action failed"
            );
        }
    }
}
