//! Local filesystem document storage.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use docqueue_core::{DocumentStorage, Error, Result};

/// Default storage root when `STORAGE_ROOT` is unset.
pub const DEFAULT_STORAGE_ROOT: &str = "./storage";

/// Reads documents from a directory. Job paths are relative to the root.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage rooted at `STORAGE_ROOT`, or `./storage`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("STORAGE_ROOT").unwrap_or_else(|_| DEFAULT_STORAGE_ROOT.into()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative document path under the root.
    ///
    /// Absolute paths and parent components are rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(Error::InvalidInput(format!(
                "document path must be relative to the storage root: {path}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStorage for FilesystemStorage {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => {
                debug!(
                    subsystem = "jobs",
                    component = "storage",
                    path = %full.display(),
                    bytes = data.len(),
                    "Fetched document"
                );
                Ok(data)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(path.to_string())),
            Err(e) => Err(Error::Storage(format!("{path}: {e}"))),
        }
    }
}
