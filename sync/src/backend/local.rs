//! Local filesystem backend

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use super::{Backend, BackendResult, Endpoint, ListedFile};
use crate::catalog::{normalize_path, HashAlgorithm, Side};
use crate::error::BackendError;

/// A directory tree on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
    algorithm: HashAlgorithm,
    /// Fail listing when the root is missing instead of reporting an empty set
    require_root: bool,
}

impl LocalBackend {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            algorithm: HashAlgorithm::default(),
            require_root: false,
        }
    }

    /// Build from a configured endpoint; sources must point at an existing directory
    pub fn from_endpoint(endpoint: &Endpoint) -> BackendResult<Self> {
        let dir = endpoint.dir.as_ref().ok_or_else(|| {
            BackendError::Permanent(format!("local backend '{}' requires a directory", endpoint.name))
        })?;

        let root = match endpoint.prefix.as_deref() {
            Some(prefix) if !prefix.trim_matches('/').is_empty() => dir.join(normalize_path(prefix)?),
            _ => dir.clone(),
        };

        Ok(Self::new(endpoint.name.clone(), root)
            .with_algorithm(endpoint.fingerprint)
            .require_root(endpoint.side == Side::Source))
    }

    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn require_root(mut self, require: bool) -> Self {
        self.require_root = require;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> BackendResult<PathBuf> {
        Ok(self.root.join(normalize_path(path)?))
    }

    /// Remove directories left empty by a delete, stopping at the root
    async fn prune_empty_parents(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

fn list_blocking(root: &Path, algorithm: HashAlgorithm) -> BackendResult<Vec<ListedFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            BackendError::from(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk loop")),
            )
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let relative = relative
            .to_str()
            .ok_or_else(|| BackendError::invalid_path(relative.to_string_lossy(), "path is not UTF-8"))?;

        let metadata = entry.metadata().map_err(|e| {
            BackendError::from(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "metadata")),
            )
        })?;

        files.push(ListedFile {
            path: relative.replace('\\', "/"),
            fingerprint: algorithm.fingerprint_file(entry.path())?,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }

    Ok(files)
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn case_sensitive(&self) -> bool {
        !cfg!(any(windows, target_os = "macos"))
    }

    async fn list(&self) -> BackendResult<Vec<ListedFile>> {
        match fs::metadata(&self.root).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(BackendError::unavailable(
                    &self.name,
                    format!("'{}' is not a directory", self.root.display()),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !self.require_root => {
                debug!(backend = %self.name, root = %self.root.display(), "root missing, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(BackendError::unavailable(
                    &self.name,
                    format!("cannot read '{}': {}", self.root.display(), e),
                ))
            }
        }

        let root = self.root.clone();
        let algorithm = self.algorithm;
        tokio::task::spawn_blocking(move || list_blocking(&root, algorithm))
            .await
            .map_err(|e| BackendError::Permanent(format!("listing task failed: {}", e)))?
    }

    async fn fetch(&self, path: &str) -> BackendResult<Bytes> {
        let full_path = self.resolve(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, content: Bytes) -> BackendResult<()> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, &content).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        let full_path = self.resolve(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        self.prune_empty_parents(full_path.parent()).await;
        Ok(())
    }
}
