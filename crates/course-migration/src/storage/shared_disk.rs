use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{PulledFile, StorageBackend};

/// Stores blobs as plain files in a directory both instances can reach,
/// such as an NFS mount.
pub struct SharedDiskStorage {
    directory: Option<PathBuf>,
    scratch_dir: PathBuf,
    last_error: Mutex<Option<String>>,
}

impl SharedDiskStorage {
    /// `directory` may be unset; the backend is then never ready.
    pub fn new(directory: Option<PathBuf>, scratch_dir: PathBuf) -> Self {
        Self {
            directory: directory.filter(|d| !d.as_os_str().is_empty()),
            scratch_dir,
            last_error: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_error(&self, message: String) {
        tracing::debug!(error = %message, "shared disk storage call failed");
        *self.slot() = Some(message);
    }

    /// Resolves `name` inside the shared directory, recording why not when
    /// that is impossible.
    fn blob_path(&self, name: &str) -> Option<PathBuf> {
        let Some(directory) = &self.directory else {
            self.set_error("Shared disk directory is not configured".to_string());
            return None;
        };
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            self.set_error(format!("Invalid file name '{}'", name));
            return None;
        }
        Some(directory.join(name))
    }
}

/// Moves `src` to `dst`, falling back to copy + delete across devices.
fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)?;
    std::fs::remove_file(src)
}

impl StorageBackend for SharedDiskStorage {
    fn name(&self) -> &'static str {
        "shared_disk"
    }

    fn push_file(&self, name: &str, source: &Path) -> bool {
        self.clear_error();
        let Some(target) = self.blob_path(name) else {
            return false;
        };

        if let Some(parent) = target.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                self.set_error(format!("Cannot create directory {}: {}", parent.display(), e));
                return false;
            }
        }

        // Write under a temporary name so readers never see a partial blob.
        let partial = target.with_file_name(format!("{}.part", name));
        if let Err(e) = std::fs::copy(source, &partial) {
            self.set_error(format!(
                "Cannot copy {} to {}: {}",
                source.display(),
                partial.display(),
                e
            ));
            let _ = std::fs::remove_file(&partial);
            return false;
        }
        if let Err(e) = move_file(&partial, &target) {
            self.set_error(format!("Cannot move file into {}: {}", target.display(), e));
            let _ = std::fs::remove_file(&partial);
            return false;
        }
        true
    }

    fn pull_file(&self, name: &str) -> Option<PulledFile> {
        self.clear_error();
        let source = self.blob_path(name)?;

        if !source.is_file() {
            self.set_error(format!("File {} does not exist", source.display()));
            return None;
        }
        if let Err(e) = std::fs::create_dir_all(&self.scratch_dir) {
            self.set_error(format!(
                "Cannot create directory {}: {}",
                self.scratch_dir.display(),
                e
            ));
            return None;
        }

        let local = self
            .scratch_dir
            .join(format!("{}-{}", uuid::Uuid::new_v4(), name));
        match std::fs::copy(&source, &local) {
            Ok(_) => Some(PulledFile::new(local)),
            Err(e) => {
                self.set_error(format!("Cannot copy {}: {}", source.display(), e));
                let _ = std::fs::remove_file(&local);
                None
            }
        }
    }

    fn delete_file(&self, name: &str) -> bool {
        self.clear_error();
        let Some(path) = self.blob_path(name) else {
            return false;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                self.set_error(format!("Cannot delete {}: {}", path.display(), e));
                false
            }
        }
    }

    fn file_exists(&self, name: &str) -> bool {
        self.clear_error();
        self.blob_path(name).is_some_and(|p| p.is_file())
    }

    fn ready_for_push(&self) -> bool {
        self.directory.is_some()
    }

    fn ready_for_pull(&self) -> bool {
        self.directory.is_some()
    }

    fn last_error(&self) -> Option<String> {
        self.slot().clone()
    }

    fn clear_error(&self) {
        *self.slot() = None;
    }
}
