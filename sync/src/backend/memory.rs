//! In-memory backend, used for dry runs and tests

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{Backend, BackendResult, ListedFile};
use crate::catalog::{normalize_path, HashAlgorithm};
use crate::error::BackendError;

/// Clonable handle to a shared in-memory object map
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    name: String,
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
    case_sensitive: bool,
    algorithm: HashAlgorithm,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            case_sensitive: true,
            algorithm: HashAlgorithm::default(),
        }
    }

    pub fn with_case_sensitivity(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Seed an object directly, bypassing path validation
    pub fn insert(&self, path: impl Into<String>, content: impl Into<Bytes>) {
        self.objects.write().insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        let objects = self.objects.read();
        self.find_key(&objects, path).and_then(|key| objects.get(&key).cloned())
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Stored key addressed by `path`, honoring case sensitivity
    fn find_key(&self, objects: &BTreeMap<String, Bytes>, path: &str) -> Option<String> {
        if objects.contains_key(path) {
            return Some(path.to_string());
        }
        if self.case_sensitive {
            return None;
        }
        let folded = path.to_lowercase();
        objects.keys().find(|key| key.to_lowercase() == folded).cloned()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    async fn list(&self) -> BackendResult<Vec<ListedFile>> {
        let objects = self.objects.read();
        Ok(objects
            .iter()
            .map(|(path, content)| ListedFile {
                path: path.clone(),
                fingerprint: self.algorithm.fingerprint(content),
                size: content.len() as u64,
                modified: None,
            })
            .collect())
    }

    async fn fetch(&self, path: &str) -> BackendResult<Bytes> {
        let path = normalize_path(path)?;
        self.get(&path).ok_or(BackendError::NotFound(path))
    }

    async fn put(&self, path: &str, content: Bytes) -> BackendResult<()> {
        let path = normalize_path(path)?;
        let mut objects = self.objects.write();
        if let Some(existing) = self.find_key(&objects, &path) {
            objects.remove(&existing);
        }
        objects.insert(path, content);
        Ok(())
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        let path = normalize_path(path)?;
        let mut objects = self.objects.write();
        if let Some(existing) = self.find_key(&objects, &path) {
            objects.remove(&existing);
        }
        Ok(())
    }
}
