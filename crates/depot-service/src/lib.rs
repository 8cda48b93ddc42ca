//! Request processing and availability resolution engine for depot.
//!
//! This crate wires the metadata store and the backend capability into
//! the asynchronous core:
//! - Request aggregation with dedup by `(checksum, storage, type)`
//! - The dispatcher turning pending requests into backend operations
//! - Check/complete/purge sweepers reconciling and garbage-collecting
//! - The tiered availability resolver
//! - The lease-lock scheduling guard driving it all across replicas
//! - Content-addressed output storage for job execution results
//!
//! Request ingress and egress cross this crate's boundary as plain calls
//! and [`events::EventSink`] notifications; the transport carrying them
//! is someone else's problem.

pub mod availability;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod locations;
pub mod output;
pub mod requests;
pub mod scheduler;
pub mod sweeper;

pub use availability::AvailabilityResolver;
pub use cache::CacheService;
pub use dispatcher::Dispatcher;
pub use error::{ServiceError, ServiceResult};
pub use events::{EventSink, FileRequestEvent, LogEventSink, RequestGroupEvent};
pub use locations::LocationService;
pub use output::OutputStorageService;
pub use requests::RequestService;
pub use scheduler::{Scheduler, TenantContext};
pub use sweeper::Sweeper;

/// Error cause recorded on requests whose storage has no configuration.
pub const UNKNOWN_STORAGE_LOCATION: &str = "UNKNOWN_STORAGE_LOCATION";
