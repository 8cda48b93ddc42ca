//! Name-keyed backend registry.

use crate::error::{BackendError, BackendResult};
use crate::traits::StorageBackend;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Registry resolving storage names to backend instances.
///
/// Resolution of an unknown name yields [`BackendError::NotConfigured`];
/// absence never propagates as a null. A name may be configured on one
/// replica before another sees it, so callers treat the error as a
/// per-item failure, not a fatal one.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn StorageBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a backend under `name`.
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) {
        let name = name.into();
        self.backends
            .write()
            .expect("backend registry lock poisoned")
            .insert(name, backend);
    }

    /// Remove a backend. Resolutions of `name` fail afterwards.
    pub fn deregister(&self, name: &str) {
        self.backends
            .write()
            .expect("backend registry lock poisoned")
            .remove(name);
    }

    /// Resolve a backend by storage name.
    pub fn resolve(&self, name: &str) -> BackendResult<Arc<dyn StorageBackend>> {
        self.backends
            .read()
            .expect("backend registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::NotConfigured(name.to_string()))
    }

    /// Names of all registered backends.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .expect("backend registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
