//! Metadata store abstraction and SQLite implementation for depot.
//!
//! This crate provides the control-plane data model:
//! - File references and their owners
//! - Aggregated request rows and owner multiplexing
//! - Cache file index for restored nearline copies
//! - Storage location configurations
//! - Content-addressed output file records
//! - Lease locks guarding scheduled sweeps
//!
//! One store is opened per tenant; replicas sharing a tenant share its
//! database file, which is what makes the lease locks cross-process.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};
