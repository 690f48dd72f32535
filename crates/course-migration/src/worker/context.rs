use std::path::PathBuf;
use std::sync::Arc;

use crate::collaborators::{ContentPackager, CourseCatalog};
use crate::config::{BackupConfig, Config, RestoreConfig};
use crate::db::MigrationRepo;
use crate::events::EventBroadcaster;
use crate::remote::RestoreNotifier;
use crate::storage::StorageFactory;
use crate::worker::lock::LockRegistry;
use crate::worker::task::TaskDispatcher;

/// User id recorded in `modified_by` for changes made by background work.
pub const SYSTEM_USER: i64 = 0;

/// Settings workers read on every run.
#[derive(Debug, Clone, Default)]
pub struct WorkerSettings {
    pub restore: RestoreConfig,
    pub backup: BackupConfig,
    /// Parent of per-run extraction directories.
    pub temp_directory: PathBuf,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            restore: config.restore.clone(),
            backup: config.backup.clone(),
            temp_directory: config.worker.temp_directory.clone(),
        }
    }
}

/// Everything a worker needs, shared by all worker threads.
#[derive(Clone)]
pub struct WorkerContext {
    pub repo: MigrationRepo,
    pub catalog: Arc<dyn CourseCatalog>,
    pub packager: Arc<dyn ContentPackager>,
    /// Opens a fresh backend per run; opens nothing when storage is disabled.
    pub storage: Arc<dyn StorageFactory>,
    /// `None` when the remote endpoint is not configured.
    pub notifier: Option<Arc<dyn RestoreNotifier>>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub events: EventBroadcaster,
    pub locks: LockRegistry,
    pub settings: WorkerSettings,
}
