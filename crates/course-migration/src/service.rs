//! Composition root: wires the store, collaborators, storage, notifier,
//! worker pool and sweep schedulers into one running service.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::api::RestoreRequestApi;
use crate::collaborators::{AccessPolicy, ContentPackager, CourseCatalog};
use crate::config::Config;
use crate::db::{default_database_path, Database, JobFilter, MigrationRepo, SortOrder};
use crate::error::{MigrationError, Result};
use crate::events::EventBroadcaster;
use crate::import::BulkImporter;
use crate::migration::{Action, JobStatus};
use crate::remote::{HttpRestoreNotifier, RestoreNotifier};
use crate::report::MigrationReport;
use crate::scheduler::{BackupSweep, RestoreSweep, Sweep, SweepScheduler};
use crate::storage::{ConfiguredStorage, StorageFactory};
use crate::worker::{
    LockRegistry, MigrationTaskRunner, PoolHandle, Task, TaskDispatcher, WorkerContext, WorkerPool,
    WorkerSettings,
};

/// Host-platform implementations the service drives.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CourseCatalog>,
    pub packager: Arc<dyn ContentPackager>,
    pub policy: Arc<dyn AccessPolicy>,
}

/// Background parts that only exist while the service runs.
struct Running {
    pool: WorkerPool,
    schedulers: Vec<(SweepScheduler, JoinHandle<()>)>,
}

pub struct MigrationService {
    config: Config,
    repo: MigrationRepo,
    events: EventBroadcaster,
    collaborators: Collaborators,
    storage: Arc<dyn StorageFactory>,
    notifier: Option<Arc<dyn RestoreNotifier>>,
    backup_trigger: broadcast::Sender<()>,
    restore_trigger: broadcast::Sender<()>,
    running: Option<Running>,
}

impl MigrationService {
    /// Opens the database named in `config` (or the default location) and
    /// builds the service.
    pub fn open(config: Config, collaborators: Collaborators) -> Result<Self> {
        let path = config
            .database_path
            .clone()
            .or_else(default_database_path)
            .ok_or(MigrationError::NoDatabasePath)?;
        let db = Database::open(&path)?;
        Self::new(config, db, collaborators)
    }

    /// Builds the service over an already opened database. Storage and the
    /// HTTP notifier are created from `config` when configured there.
    pub fn new(config: Config, db: Database, collaborators: Collaborators) -> Result<Self> {
        let events = EventBroadcaster::default();
        let storage: Arc<dyn StorageFactory> = Arc::new(ConfiguredStorage::new(
            config.storage.clone(),
            config.worker.temp_directory.clone(),
        ));
        let notifier: Option<Arc<dyn RestoreNotifier>> = if config.remote.is_configured() {
            Some(Arc::new(HttpRestoreNotifier::new(&config.remote, events.clone())?))
        } else {
            None
        };

        match storage.open() {
            Some(backend) => log::info!("Using {} storage", backend.name()),
            None => log::warn!("No storage configured, backups and restores will fail"),
        }
        if notifier.is_none() {
            log::warn!("Remote endpoint not configured, backups will fail");
        }

        let (backup_trigger, _) = broadcast::channel(16);
        let (restore_trigger, _) = broadcast::channel(16);

        Ok(Self {
            config,
            repo: MigrationRepo::new(db),
            events,
            collaborators,
            storage,
            notifier,
            backup_trigger,
            restore_trigger,
            running: None,
        })
    }

    /// Replaces the configured storage backend. Takes effect on the next
    /// [`start`](Self::start).
    pub fn with_storage(mut self, storage: Arc<dyn StorageFactory>) -> Self {
        self.storage = storage;
        self
    }

    /// Replaces the configured notifier. Takes effect on the next
    /// [`start`](Self::start).
    pub fn with_notifier(mut self, notifier: Option<Arc<dyn RestoreNotifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repo(&self) -> &MigrationRepo {
        &self.repo
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn importer(&self) -> BulkImporter {
        BulkImporter::new(
            self.repo.clone(),
            self.events.clone(),
            self.config.remote.is_configured(),
        )
    }

    pub fn restore_api(&self) -> RestoreRequestApi {
        RestoreRequestApi::new(
            self.repo.clone(),
            Arc::clone(&self.collaborators.catalog),
            Arc::clone(&self.collaborators.policy),
            self.config.restore.default_category_id,
        )
    }

    pub fn report(&self) -> MigrationReport {
        MigrationReport::new(self.repo.clone(), Arc::clone(&self.collaborators.catalog))
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Re-queues jobs a previous run left unfinished, then starts the worker
    /// pool and both sweep schedulers.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let temp_directory = &self.config.worker.temp_directory;
        std::fs::create_dir_all(temp_directory).map_err(|e| MigrationError::Io {
            path: temp_directory.clone(),
            source: e,
        })?;

        let mut pool = WorkerPool::new(
            self.config.worker.worker_count.max(1),
            self.config.worker.retry.clone(),
        );
        let handle = pool.handle();
        let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(handle.clone());

        let ctx = Arc::new(WorkerContext {
            repo: self.repo.clone(),
            catalog: Arc::clone(&self.collaborators.catalog),
            packager: Arc::clone(&self.collaborators.packager),
            storage: Arc::clone(&self.storage),
            notifier: self.notifier.clone(),
            dispatcher: Arc::clone(&dispatcher),
            events: self.events.clone(),
            locks: LockRegistry::new(),
            settings: WorkerSettings::from_config(&self.config),
        });
        let recovered = self.recover_unfinished(&handle)?;
        if recovered > 0 {
            log::info!("Re-queued {} unfinished migration jobs", recovered);
        }
        pool.start(Arc::new(MigrationTaskRunner::new(ctx)))?;

        let scheduler_config = &self.config.scheduler;
        let backup: Arc<dyn Sweep> = Arc::new(BackupSweep::new(
            self.repo.clone(),
            Arc::clone(&self.collaborators.catalog),
            Arc::clone(&dispatcher),
            scheduler_config.batch_limit,
        ));
        let restore: Arc<dyn Sweep> = Arc::new(RestoreSweep::new(
            self.repo.clone(),
            Arc::clone(&self.collaborators.catalog),
            dispatcher,
            self.config.restore.default_category_id,
            scheduler_config.batch_limit,
        ));

        let mut schedulers = Vec::with_capacity(2);
        for (sweep, interval_secs, trigger) in [
            (backup, scheduler_config.backup_interval_secs, &self.backup_trigger),
            (restore, scheduler_config.restore_interval_secs, &self.restore_trigger),
        ] {
            let scheduler = SweepScheduler::new(sweep, Duration::from_secs(interval_secs.max(1)));
            let thread = scheduler.start(trigger.subscribe())?;
            schedulers.push((scheduler, thread));
        }

        log::info!("Course migration service started");
        self.running = Some(Running { pool, schedulers });
        Ok(())
    }

    /// Dispatches every job left `InProgress` and every restore left
    /// `Retrying`. Their queued or delayed tasks died with the previous pool.
    /// Must run before the workers start, while none of these jobs can be
    /// running.
    fn recover_unfinished(&self, handle: &PoolHandle) -> Result<usize> {
        let mut stranded = self.repo.find_all(&JobFilter {
            status: Some(JobStatus::InProgress),
            order: SortOrder::OldestFirst,
            ..JobFilter::default()
        })?;
        stranded.extend(self.repo.find_all(&JobFilter {
            action: Some(Action::Restore),
            status: Some(JobStatus::Retrying),
            order: SortOrder::OldestFirst,
            ..JobFilter::default()
        })?);

        for job in &stranded {
            let task = match job.action {
                Action::Backup => Task::Backup { job_id: job.id },
                Action::Restore => Task::Restore { job_id: job.id },
            };
            handle.dispatch(task)?;
        }
        Ok(stranded.len())
    }

    /// Wakes both sweeps now instead of waiting for their interval.
    pub fn trigger_sweeps(&self) {
        // No receivers just means the service is not running.
        let _ = self.backup_trigger.send(());
        let _ = self.restore_trigger.send(());
    }

    /// Stops the schedulers, then the pool, and waits for both.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        for (scheduler, _) in &running.schedulers {
            scheduler.stop();
        }
        self.trigger_sweeps();
        for (_, thread) in running.schedulers {
            if thread.join().is_err() {
                log::error!("Sweep scheduler thread panicked");
            }
        }

        running.pool.shutdown();
        running.pool.wait();
        log::info!("Course migration service stopped");
    }
}

impl Drop for MigrationService {
    fn drop(&mut self) {
        self.stop();
    }
}
