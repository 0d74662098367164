//! Worker image resolution.
//!
//! The bridge does not know how the parser bundle gets onto disk; it only asks
//! a [`WorkerImageProvider`] for a path once per invocation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::supervisor::LaunchError;

/// Supplies the script the worker runtime executes.
#[async_trait]
pub trait WorkerImageProvider: Send + Sync {
    async fn resolve(&self) -> Result<PathBuf, LaunchError>;
}

/// A bundle at a fixed, explicitly configured path.
#[derive(Debug, Clone)]
pub struct BundleFile {
    path: PathBuf,
}

impl BundleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WorkerImageProvider for BundleFile {
    async fn resolve(&self) -> Result<PathBuf, LaunchError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => Ok(self.path.clone()),
            Ok(_) => Err(LaunchError::ImageUnavailable(format!(
                "{} is not a file",
                self.path.display()
            ))),
            Err(e) => Err(LaunchError::ImageUnavailable(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
