//! Lease lock repository.

use crate::MetadataResult;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for the named lease locks guarding scheduled sweeps.
///
/// A lock is a row with a holder identity and an expiration timestamp.
/// Acquisition is a conditional write: it succeeds when no row exists or
/// the existing row's lease has expired. There is no acquisition wait; a
/// held lock means the caller skips its tick.
#[async_trait]
pub trait LockRepo: Send + Sync {
    /// Try to acquire `name` for `holder` until `expires_at`.
    ///
    /// Returns false without blocking when another holder has an
    /// unexpired lease.
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: OffsetDateTime,
        expires_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Release `name` if still held by `holder`. Releasing a lock lost to
    /// lease expiry is a no-op.
    async fn release_lock(&self, name: &str, holder: &str) -> MetadataResult<()>;
}
