//! Content-addressed store of OCR transcriptions.
//!
//! Entries are keyed by the SHA-256 of the image bytes together with the OCR
//! model, live for the whole process and are never evicted. When a directory
//! is configured each entry is also written to
//! `<dir>/<sha256>-<model>.txt` and read back on a later run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Cache key: image fingerprint plus the model that transcribed it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: String,
    pub model: String,
}

impl CacheKey {
    pub fn new(image: &[u8], model: &str) -> Self {
        Self {
            fingerprint: fingerprint(image),
            model: model.to_string(),
        }
    }

    fn file_name(&self) -> String {
        let model: String = self
            .model
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}-{model}.txt", self.fingerprint)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Shared handle; clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct OcrCache {
    entries: Arc<DashMap<CacheKey, Arc<str>>>,
    dir: Option<PathBuf>,
}

impl OcrCache {
    /// Memory-only cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache persisted under `dir` (created on first write).
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: Arc::default(),
            dir: Some(dir.into()),
        }
    }

    pub fn from_dir(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::with_dir(dir),
            None => Self::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look the key up in memory, then on disk.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<str>> {
        if let Some(hit) = self.entries.get(key) {
            return Some(Arc::clone(hit.value()));
        }

        let path = self.dir.as_ref()?.join(key.file_name());
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                debug!(path = %path.display(), "OCR cache hit on disk");
                let stored = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Arc::from(text))
                    .value()
                    .clone();
                Some(stored)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable OCR cache entry");
                None
            }
        }
    }

    /// Store `text` unless an entry already exists; returns the stored value.
    pub async fn insert(&self, key: CacheKey, text: String) -> Arc<str> {
        let mut won = false;
        let stored = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| {
                won = true;
                Arc::from(text)
            })
            .value()
            .clone();

        if won {
            if let Some(dir) = &self.dir {
                if let Err(e) = persist(dir, &key, &stored).await {
                    warn!(dir = %dir.display(), error = %e, "Could not persist OCR cache entry");
                }
            }
        }
        stored
    }
}

async fn persist(dir: &Path, key: &CacheKey, text: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(key.file_name());
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await;
    match file {
        Ok(mut file) => {
            file.write_all(text.as_bytes()).await?;
            file.flush().await
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
