//! Test harness for isolated worker and service tests.
//!
//! The `TestHarness` struct provides:
//! - Temporary directories for shared storage, scratch space and packager output
//! - An in-memory job store
//! - Fake collaborators and a recording dispatcher
//! - A `WorkerContext` assembled from all of the above

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use course_migration::config::{BackupConfig, RestoreConfig};
use course_migration::db::{Database, MigrationRepo};
use course_migration::events::EventBroadcaster;
use course_migration::migration::{MigrationJob, NewMigrationJob};
use course_migration::remote::RestoreNotifier;
use course_migration::storage::{ConfiguredStorage, StorageFactory};
use course_migration::worker::{LockRegistry, WorkerContext, WorkerSettings};

use super::fakes::{FakeCatalog, FakeNotifier, FakePackager, RecordingDispatcher};

pub struct TestHarness {
    temp_dir: TempDir,
    /// Directory both instances share.
    pub storage_dir: PathBuf,
    /// Parent of extraction directories.
    pub scratch_dir: PathBuf,
    pub repo: MigrationRepo,
    pub catalog: Arc<FakeCatalog>,
    pub packager: Arc<FakePackager>,
    pub notifier: Arc<FakeNotifier>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub events: EventBroadcaster,
    pub locks: LockRegistry,
    pub restore: RestoreConfig,
    pub backup: BackupConfig,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let storage_dir = base.join("shared");
        let scratch_dir = base.join("scratch");
        std::fs::create_dir_all(&storage_dir).expect("Failed to create storage dir");
        std::fs::create_dir_all(&scratch_dir).expect("Failed to create scratch dir");

        Self {
            storage_dir,
            scratch_dir,
            repo: MigrationRepo::new(Database::open_in_memory().expect("Failed to open database")),
            catalog: Arc::new(FakeCatalog::new()),
            packager: Arc::new(FakePackager::new(base.join("packager"))),
            notifier: Arc::new(FakeNotifier::default()),
            dispatcher: Arc::new(RecordingDispatcher::default()),
            events: EventBroadcaster::default(),
            locks: LockRegistry::new(),
            restore: RestoreConfig::default(),
            backup: BackupConfig::default(),
            temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Shared-disk storage over `storage_dir`.
    pub fn storage(&self) -> Arc<dyn StorageFactory> {
        Arc::new(ConfiguredStorage::shared_disk(
            Some(self.storage_dir.clone()),
            self.scratch_dir.clone(),
        ))
    }

    /// Context with the harness's storage and notifier.
    pub fn context(&self) -> WorkerContext {
        let notifier: Arc<dyn RestoreNotifier> = self.notifier.clone();
        self.context_with(self.storage(), Some(notifier))
    }

    pub fn context_with(
        &self,
        storage: Arc<dyn StorageFactory>,
        notifier: Option<Arc<dyn RestoreNotifier>>,
    ) -> WorkerContext {
        WorkerContext {
            repo: self.repo.clone(),
            catalog: self.catalog.clone(),
            packager: self.packager.clone(),
            storage,
            notifier,
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
            locks: self.locks.clone(),
            settings: WorkerSettings {
                restore: self.restore.clone(),
                backup: self.backup.clone(),
                temp_directory: self.scratch_dir.clone(),
            },
        }
    }

    pub fn create_job(&self, job: NewMigrationJob) -> MigrationJob {
        self.repo.create(&job, 2).expect("Failed to create job")
    }

    pub fn job(&self, id: i64) -> MigrationJob {
        self.repo.get_by_id(id).expect("Job not found")
    }

    /// Puts a blob straight into shared storage.
    pub fn put_blob(&self, name: &str, content: &str) {
        std::fs::write(self.storage_dir.join(name), content).expect("Failed to write blob");
    }

    pub fn blob_exists(&self, name: &str) -> bool {
        self.storage_dir.join(name).exists()
    }

    /// Entries left in the scratch directory.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(&self.scratch_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}
