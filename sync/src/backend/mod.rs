//! Storage backend adapters
//!
//! The engine only talks to storage through the [`Backend`] trait. Adapters for
//! object stores and CDNs live outside this crate and plug in through a
//! [`BackendRegistry`]; the local filesystem and in-memory adapters ship here.

pub mod local;
pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use crate::catalog::{Fingerprint, HashAlgorithm, Side};
use crate::error::BackendError;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A file as reported by a backend listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    /// Relative path, not yet normalized
    pub path: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Capability contract every storage adapter satisfies
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether paths differing only in case are distinct objects
    fn case_sensitive(&self) -> bool {
        true
    }

    /// List every file below the backend root
    async fn list(&self) -> BackendResult<Vec<ListedFile>>;

    /// Read the full content of one file
    async fn fetch(&self, path: &str) -> BackendResult<Bytes>;

    /// Create or replace one file
    async fn put(&self, path: &str, content: Bytes) -> BackendResult<()>;

    /// Remove one file; removing a missing file succeeds
    async fn delete(&self, path: &str) -> BackendResult<()>;
}

/// Normalized description of one configured source or target, handed to factories
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    /// Backend type name, e.g. `local`
    pub kind: String,
    pub side: Side,
    /// Root directory, bucket or container
    pub dir: Option<PathBuf>,
    /// Sub-path inside `dir` the file set is rooted at
    pub prefix: Option<String>,
    pub credentials: BTreeMap<String, String>,
    pub fingerprint: HashAlgorithm,
}

/// Constructor for one backend type
pub type BackendFactory = Arc<dyn Fn(&Endpoint) -> BackendResult<Arc<dyn Backend>> + Send + Sync>;

/// Backend type name to factory mapping
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry").field("kinds", &kinds).finish()
    }
}

impl BackendRegistry {
    /// Registry without any adapters
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `local` and `memory` adapters
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("local", |endpoint| {
            LocalBackend::from_endpoint(endpoint).map(|b| Arc::new(b) as Arc<dyn Backend>)
        });
        registry.register("memory", |endpoint| {
            Ok(Arc::new(MemoryBackend::new(endpoint.name.clone()).with_algorithm(endpoint.fingerprint))
                as Arc<dyn Backend>)
        });
        registry
    }

    /// Register (or replace) the factory for a backend type. Type names are case-insensitive.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Endpoint) -> BackendResult<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into().to_lowercase(), Arc::new(factory));
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }

    /// Construct a backend for the endpoint
    pub fn create(&self, endpoint: &Endpoint) -> BackendResult<Arc<dyn Backend>> {
        let factory = self
            .factories
            .get(&endpoint.kind.to_lowercase())
            .ok_or_else(|| BackendError::UnsupportedType(endpoint.kind.clone()))?;
        factory(endpoint)
    }
}
