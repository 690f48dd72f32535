//! Pluggable transport for backup archives between the two instances.
//!
//! Backends report failure through their return value plus a last-error
//! slot instead of `Result`, so a worker can record the backend's message on
//! the job verbatim. Every call overwrites the slot, so each worker run opens
//! its own backend through a [`StorageFactory`].

pub mod shared_disk;

pub use shared_disk::SharedDiskStorage;

use std::path::{Path, PathBuf};
use crate::config::{StorageConfig, StorageType};

/// Message recorded when a worker runs without a usable backend.
pub const STORAGE_NOT_CONFIGURED: &str = "A storage class has not been configured";

/// A named-blob store shared by the source and destination instances.
pub trait StorageBackend: Send + Sync {
    /// Human name of the backend, used in logs.
    fn name(&self) -> &'static str;

    /// Copies the local file `source` into the store as `name`.
    fn push_file(&self, name: &str, source: &Path) -> bool;

    /// Copies the blob `name` into local scratch space.
    fn pull_file(&self, name: &str) -> Option<PulledFile>;

    fn delete_file(&self, name: &str) -> bool;

    fn file_exists(&self, name: &str) -> bool;

    fn ready_for_push(&self) -> bool;

    fn ready_for_pull(&self) -> bool;

    /// Error message of the most recent call, if it failed.
    fn last_error(&self) -> Option<String>;

    fn clear_error(&self);
}

/// Builds the backend selected in configuration; `None` when storage is
/// disabled.
pub fn build_storage(config: &StorageConfig, scratch_dir: &Path) -> Option<Box<dyn StorageBackend>> {
    match config.kind? {
        StorageType::SharedDisk => Some(Box::new(SharedDiskStorage::new(
            config.directory.clone(),
            scratch_dir.to_path_buf(),
        ))),
    }
}

/// Opens a backend for one worker run.
pub trait StorageFactory: Send + Sync {
    /// `None` when storage is disabled.
    fn open(&self) -> Option<Box<dyn StorageBackend>>;
}

/// Opens the backend selected in configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredStorage {
    config: StorageConfig,
    scratch_dir: PathBuf,
}

impl ConfiguredStorage {
    pub fn new(config: StorageConfig, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Shared-disk storage rooted at `directory`.
    pub fn shared_disk(directory: Option<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            StorageConfig {
                kind: Some(StorageType::SharedDisk),
                directory,
            },
            scratch_dir,
        )
    }

    /// Storage turned off.
    pub fn disabled() -> Self {
        Self::new(StorageConfig::default(), PathBuf::new())
    }

    pub fn kind(&self) -> Option<StorageType> {
        self.config.kind
    }
}

impl StorageFactory for ConfiguredStorage {
    fn open(&self) -> Option<Box<dyn StorageBackend>> {
        build_storage(&self.config, &self.scratch_dir)
    }
}

/// A local copy of a pulled blob. Removed on drop unless already deleted.
#[derive(Debug)]
pub struct PulledFile {
    path: PathBuf,
    removed: bool,
}

impl PulledFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the local copy now.
    pub fn delete(mut self) -> std::io::Result<()> {
        self.removed = true;
        std::fs::remove_file(&self.path)
    }
}

impl Drop for PulledFile {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove pulled file {}: {}", self.path.display(), e);
                }
            }
        }
    }
}
