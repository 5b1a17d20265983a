//! Point-in-time catalogs of logical files for a source or a target

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::Backend;
use crate::error::{BackendError, Result, SyncError};
use crate::filter::FileFilter;

/// Which side of a sync a catalog describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Source,
    Target,
}

/// Hash algorithms supported for fingerprints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Blake3 hash (faster)
    #[default]
    Blake3,
    /// SHA-256 hash
    Sha256,
}

impl HashAlgorithm {
    /// Fingerprint an in-memory buffer
    pub fn fingerprint(self, data: &[u8]) -> Fingerprint {
        let mut hasher = FingerprintHasher::new(self);
        hasher.update(data);
        hasher.finalize()
    }

    /// Fingerprint a file by streaming it through the hasher
    pub fn fingerprint_file(self, path: &Path) -> std::io::Result<Fingerprint> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = FingerprintHasher::new(self);
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize())
    }
}

/// Incremental fingerprint computation
pub enum FingerprintHasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
}

impl FingerprintHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        use sha2::Digest;

        match algorithm {
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        use sha2::Digest;

        match self {
            Self::Blake3(hasher) => {
                hasher.update(data);
            }
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Fingerprint {
        use sha2::Digest;

        match self {
            Self::Blake3(hasher) => Fingerprint(format!("blake3:{}", hasher.finalize().to_hex())),
            Self::Sha256(hasher) => Fingerprint(format!("sha256:{:x}", hasher.finalize())),
        }
    }
}

/// Opaque content hash.
///
/// The algorithm is part of the value, so fingerprints computed with
/// different algorithms never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a precomputed fingerprint string
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One file as seen by a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFile {
    /// Normalized relative path, unique within a catalog
    pub path: String,
    /// Content fingerprint
    pub fingerprint: Fingerprint,
    /// File size in bytes
    pub size: u64,
    /// Last modified marker, when the backend knows it
    pub modified: Option<SystemTime>,
    /// Which side this entry was listed from
    pub source_of_truth: Side,
}

impl LogicalFile {
    pub fn new(path: impl Into<String>, fingerprint: Fingerprint, size: u64, side: Side) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            size,
            modified: None,
            source_of_truth: side,
        }
    }
}

/// Normalize a relative path for cross-backend comparison.
///
/// Separators become `/`, empty and `.` segments are dropped, and paths that
/// escape the root or name nothing are rejected.
pub fn normalize_path(raw: &str) -> std::result::Result<String, BackendError> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(BackendError::invalid_path(raw, "path escapes the root")),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(BackendError::invalid_path(raw, "path is empty"));
    }

    Ok(segments.join("/"))
}

/// Immutable mapping from path to logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    name: String,
    side: Side,
    files: BTreeMap<String, LogicalFile>,
}

impl Catalog {
    /// Empty catalog
    pub fn empty(name: impl Into<String>, side: Side) -> Self {
        Self {
            name: name.into(),
            side,
            files: BTreeMap::new(),
        }
    }

    /// Build a catalog from already-listed files.
    ///
    /// Paths are normalized; two entries normalizing to the same path are an error.
    pub fn from_files(
        name: impl Into<String>,
        side: Side,
        files: impl IntoIterator<Item = LogicalFile>,
    ) -> Result<Self> {
        let name = name.into();
        let mut map = BTreeMap::new();

        for mut file in files {
            let path = normalize_path(&file.path)
                .map_err(|e| SyncError::catalog_unavailable(name.clone(), e))?;
            if map.contains_key(&path) {
                return Err(SyncError::DuplicatePath(path));
            }
            file.path = path.clone();
            file.source_of_truth = side;
            map.insert(path, file);
        }

        Ok(Self {
            name,
            side,
            files: map,
        })
    }

    /// List a backend and build its catalog, applying the filter.
    pub async fn build(
        name: impl Into<String>,
        side: Side,
        backend: &dyn Backend,
        filter: &FileFilter,
    ) -> Result<Self> {
        let name = name.into();
        let listed = backend
            .list()
            .await
            .map_err(|e| SyncError::catalog_unavailable(name.clone(), e))?;
        let total = listed.len();

        let mut files = Vec::with_capacity(total);
        for file in listed {
            let path = normalize_path(&file.path)
                .map_err(|e| SyncError::catalog_unavailable(name.clone(), e))?;
            if filter.should_include(&path) {
                files.push(LogicalFile {
                    path,
                    fingerprint: file.fingerprint,
                    size: file.size,
                    modified: file.modified,
                    source_of_truth: side,
                });
            }
        }

        let catalog = Self::from_files(name, side, files)?;
        debug!(
            catalog = %catalog.name,
            listed = total,
            kept = catalog.len(),
            "catalog built"
        );
        Ok(catalog)
    }

    /// Overlay several catalogs in order; later layers win on path collision.
    ///
    /// With `case_sensitive` false, paths that differ only in case also
    /// collide and the later layer's spelling replaces the earlier ones.
    /// Returns the merged catalog and, for each path, the index of the layer it came from.
    pub fn overlay(
        name: impl Into<String>,
        layers: &[Arc<Catalog>],
        case_sensitive: bool,
    ) -> (Catalog, HashMap<String, usize>) {
        let mut files = BTreeMap::new();
        let mut owners: HashMap<String, usize> = HashMap::new();
        let mut spellings: HashMap<String, Vec<String>> = HashMap::new();

        for (index, layer) in layers.iter().enumerate() {
            for (path, file) in &layer.files {
                if !case_sensitive {
                    let seen = spellings.entry(path.to_lowercase()).or_default();
                    seen.retain(|earlier| {
                        let shadowed = earlier != path && owners.get(earlier).map_or(false, |&owner| owner < index);
                        if shadowed {
                            debug!(kept = %path, dropped = %earlier, "later source replaces case variant");
                            files.remove(earlier);
                            owners.remove(earlier);
                        }
                        !shadowed
                    });
                    if !seen.contains(path) {
                        seen.push(path.clone());
                    }
                }
                files.insert(path.clone(), file.clone());
                owners.insert(path.clone(), index);
            }
        }

        let side = layers.first().map(|c| c.side).unwrap_or(Side::Source);
        (
            Catalog {
                name: name.into(),
                side,
                files,
            },
            owners,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn get(&self, path: &str) -> Option<&LogicalFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in lexicographic path order
    pub fn iter(&self) -> impl Iterator<Item = &LogicalFile> {
        self.files.values()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }

    /// Copy of this catalog holding only the paths `filter` lets through
    pub fn filtered(&self, filter: &FileFilter) -> Catalog {
        Catalog {
            name: self.name.clone(),
            side: self.side,
            files: self
                .files
                .iter()
                .filter(|(path, _)| filter.should_include(path))
                .map(|(path, file)| (path.clone(), file.clone()))
                .collect(),
        }
    }
}
