//! Test doubles shared by the engine's test modules

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::backend::{Backend, BackendRegistry, BackendResult, ListedFile, MemoryBackend};
use crate::catalog::{Catalog, HashAlgorithm, LogicalFile, Side};
use crate::config::{EngineOptions, SourceConfig, TargetConfig};
use crate::error::BackendError;

/// Backend type name the scripted registry answers to
pub const SCRIPTED: &str = "scripted";

#[derive(Debug, Clone, Copy)]
enum Failure {
    Transient(u32),
    Permanent,
    Panic,
}

/// In-memory backend whose writes fail on cue
pub struct FlakyBackend {
    pub store: MemoryBackend,
    unreachable: AtomicBool,
    failures: Mutex<HashMap<String, Failure>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FlakyBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            store: MemoryBackend::new(name),
            unreachable: AtomicBool::new(false),
            failures: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_files(name: &str, files: &[(&str, &str)]) -> Arc<Self> {
        let backend = Self::new(name);
        for (path, content) in files {
            backend.store.insert(*path, content.to_string());
        }
        backend
    }

    /// The next `times` writes to `path` fail transiently
    pub fn fail_transiently(&self, path: &str, times: u32) {
        self.failures.lock().insert(path.to_string(), Failure::Transient(times));
    }

    /// Every write to `path` fails permanently
    pub fn fail_permanently(&self, path: &str) {
        self.failures.lock().insert(path.to_string(), Failure::Permanent);
    }

    /// Every write to `path` panics inside the adapter
    pub fn panic_on_write(&self, path: &str) {
        self.failures.lock().insert(path.to_string(), Failure::Panic);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Write attempts seen for `path`
    pub fn attempts(&self, path: &str) -> u32 {
        self.attempts.lock().get(path).copied().unwrap_or(0)
    }

    fn check_write(&self, path: &str) -> BackendResult<()> {
        *self.attempts.lock().entry(path.to_string()).or_insert(0) += 1;

        let mut failures = self.failures.lock();
        if let Some(Failure::Panic) = failures.get(path) {
            drop(failures);
            panic!("adapter crashed writing {}", path);
        }
        match failures.get_mut(path) {
            Some(Failure::Transient(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(BackendError::Transient(format!("503 while writing {}", path)))
            }
            Some(Failure::Permanent) => Err(BackendError::Permanent(format!("403 writing {}", path))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn list(&self) -> BackendResult<Vec<ListedFile>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable(self.store.name(), "connection refused"));
        }
        self.store.list().await
    }

    async fn fetch(&self, path: &str) -> BackendResult<Bytes> {
        self.store.fetch(path).await
    }

    async fn put(&self, path: &str, content: Bytes) -> BackendResult<()> {
        self.check_write(path)?;
        self.store.put(path, content).await
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        self.check_write(path)?;
        self.store.delete(path).await
    }
}

/// Registry resolving `scripted` endpoints to the given backends by endpoint name
pub fn scripted_registry(backends: &[&Arc<FlakyBackend>]) -> BackendRegistry {
    let by_name: HashMap<String, Arc<FlakyBackend>> = backends
        .iter()
        .map(|backend| (backend.name().to_string(), Arc::clone(backend)))
        .collect();

    let mut registry = BackendRegistry::with_builtin();
    registry.register(SCRIPTED, move |endpoint| {
        by_name
            .get(&endpoint.name)
            .map(|backend| Arc::clone(backend) as Arc<dyn Backend>)
            .ok_or_else(|| BackendError::unavailable(&endpoint.name, "no scripted backend"))
    });
    registry
}

pub fn scripted_source(name: &str) -> SourceConfig {
    SourceConfig {
        kind: SCRIPTED.to_string(),
        ..SourceConfig::local(name, "unused")
    }
}

pub fn scripted_target(name: &str) -> TargetConfig {
    TargetConfig::new(name, SCRIPTED)
}

/// Options that keep retries fast
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 4,
        target_pool_size: Some(4),
        ..Default::default()
    }
}

/// Catalog straight from `(path, content)` pairs
pub fn catalog_of(name: &str, side: Side, files: &[(String, String)]) -> Catalog {
    let files = files.iter().map(|(path, content)| {
        LogicalFile::new(
            path.clone(),
            HashAlgorithm::Blake3.fingerprint(content.as_bytes()),
            content.len() as u64,
            side,
        )
    });
    Catalog::from_files(name, side, files).expect("test catalog paths are unique")
}
