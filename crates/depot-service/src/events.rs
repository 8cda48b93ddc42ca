//! Request egress events.
//!
//! The engine reports terminal outcomes through an [`EventSink`]
//! capability: one event per `(file, owner)` pair when a request reaches
//! a terminal state, and one summary per group once the group has no
//! outstanding requests. The transport carrying these toward requesters
//! is out of scope.

use async_trait::async_trait;
use depot_core::{Checksum, RequestType};
use depot_metadata::MetadataStore;
use std::sync::Arc;

/// Terminal outcome of one request, for one owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRequestEvent {
    pub checksum: Checksum,
    pub storage_name: String,
    pub request_type: RequestType,
    pub owner: String,
    pub group_id: String,
    pub success: bool,
    pub error_cause: Option<String>,
}

/// Completion summary of one request group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestGroupEvent {
    pub group_id: String,
    pub handled: u64,
    pub errors: u64,
}

/// Egress capability toward the external messaging layer.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish_file_event(&self, event: FileRequestEvent);

    async fn publish_group_event(&self, event: RequestGroupEvent);
}

/// Default sink that reports outcomes to the log.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish_file_event(&self, event: FileRequestEvent) {
        if event.success {
            tracing::info!(
                checksum = %event.checksum,
                storage = %event.storage_name,
                request_type = %event.request_type,
                owner = %event.owner,
                group_id = %event.group_id,
                "File request completed"
            );
        } else {
            tracing::warn!(
                checksum = %event.checksum,
                storage = %event.storage_name,
                request_type = %event.request_type,
                owner = %event.owner,
                group_id = %event.group_id,
                error_cause = event.error_cause.as_deref().unwrap_or("unknown"),
                "File request failed"
            );
        }
    }

    async fn publish_group_event(&self, event: RequestGroupEvent) {
        tracing::info!(
            group_id = %event.group_id,
            handled = event.handled,
            errors = event.errors,
            "Request group completed"
        );
    }
}

/// Publish the group completion summary once no non-terminal request
/// carries the group anymore.
///
/// Safe to call after every terminal transition; it is a no-op while the
/// group still has outstanding work.
pub async fn notify_group_if_complete(
    store: &Arc<dyn MetadataStore>,
    events: &Arc<dyn EventSink>,
    group_id: &str,
) -> crate::ServiceResult<()> {
    if store.count_open_requests_of_group(group_id).await? > 0 {
        return Ok(());
    }
    let terminal = store.find_terminal_requests_of_group(group_id).await?;
    if terminal.is_empty() {
        return Ok(());
    }
    let errors = terminal.iter().filter(|r| r.status == "error").count() as u64;
    events
        .publish_group_event(RequestGroupEvent {
            group_id: group_id.to_string(),
            handled: terminal.len() as u64 - errors,
            errors,
        })
        .await;
    Ok(())
}
