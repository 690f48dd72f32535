//! The two dispatch sweeps: promote `NotStarted` jobs to `InProgress` and
//! hand one worker task per job to the pool.

use std::sync::Arc;

use crate::collaborators::{resolve_category, CourseCatalog};
use crate::db::{DatabaseError, JobFilter, MigrationRepo};
use crate::migration::{Action, JobStatus, MigrationJob};
use crate::worker::{Task, TaskDispatcher, SYSTEM_USER};

/// What one pass over the pending jobs did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs read from the store.
    pub examined: usize,
    /// Jobs moved to `InProgress` with a task queued.
    pub dispatched: usize,
    /// Jobs moved to `Failed` by the sweep itself.
    pub failed: usize,
}

/// A periodic pass over pending jobs.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Processes one batch. Only a failure to read the batch is an error;
    /// per-job failures are recorded on the job and counted.
    fn run_once(&self) -> Result<SweepReport, DatabaseError>;
}

/// Outcome of handling one job inside a sweep.
enum Handled {
    Dispatched,
    Failed,
}

/// Marks the job `InProgress`, persists it, then queues `task`.
///
/// The status is saved before the task is queued so a worker never races
/// the sweep's write. A queueing failure moves the job on to `Failed`.
fn start_job(
    repo: &MigrationRepo,
    dispatcher: &dyn TaskDispatcher,
    job: &mut MigrationJob,
    task: Task,
    error_prefix: &str,
) -> Result<Handled, DatabaseError> {
    if job.transition(JobStatus::InProgress).is_err() {
        log::warn!("Migration {} is {} and cannot be started", job.id, job.status());
        return Ok(Handled::Failed);
    }
    repo.save(job, SYSTEM_USER)?;

    match dispatcher.dispatch(task) {
        Ok(()) => Ok(Handled::Dispatched),
        Err(e) => {
            let message = format!(
                "{} Migration id: {} error message: {}",
                error_prefix, job.id, e
            );
            fail_job(repo, job, message)?;
            Ok(Handled::Failed)
        }
    }
}

fn fail_job(repo: &MigrationRepo, job: &mut MigrationJob, message: String) -> Result<(), DatabaseError> {
    log::warn!("{}", message);
    job.set_error(message);
    if let Err(e) = job.transition(JobStatus::Failed) {
        log::error!("Migration {}: {}", job.id, e);
    }
    repo.save(job, SYSTEM_USER)
}

fn tally(report: &mut SweepReport, job_id: i64, result: Result<Handled, DatabaseError>) {
    match result {
        Ok(Handled::Dispatched) => report.dispatched += 1,
        Ok(Handled::Failed) => report.failed += 1,
        Err(e) => log::error!("Migration {} could not be updated: {}", job_id, e),
    }
}

/// Dispatches pending backups, oldest first.
pub struct BackupSweep {
    repo: MigrationRepo,
    catalog: Arc<dyn CourseCatalog>,
    dispatcher: Arc<dyn TaskDispatcher>,
    batch_limit: u64,
}

impl BackupSweep {
    pub const ERROR_PREFIX: &'static str = "Error in creating backup task.";

    pub fn new(
        repo: MigrationRepo,
        catalog: Arc<dyn CourseCatalog>,
        dispatcher: Arc<dyn TaskDispatcher>,
        batch_limit: u64,
    ) -> Self {
        Self {
            repo,
            catalog,
            dispatcher,
            batch_limit,
        }
    }

    fn handle(&self, job: &mut MigrationJob) -> Result<Handled, DatabaseError> {
        let course_id = match job.course_id {
            Some(id) if self.catalog.course_exists(id) => id,
            Some(id) => {
                let message = format!(
                    "{} Migration id: {} error message: Course {} does not exist",
                    Self::ERROR_PREFIX,
                    job.id,
                    id
                );
                fail_job(&self.repo, job, message)?;
                return Ok(Handled::Failed);
            }
            None => {
                let message = format!(
                    "{} Migration id: {} error message: Course id is missing",
                    Self::ERROR_PREFIX,
                    job.id
                );
                fail_job(&self.repo, job, message)?;
                return Ok(Handled::Failed);
            }
        };

        log::debug!("Dispatching backup of course {} (migration {})", course_id, job.id);
        start_job(
            &self.repo,
            self.dispatcher.as_ref(),
            job,
            Task::Backup { job_id: job.id },
            Self::ERROR_PREFIX,
        )
    }
}

impl Sweep for BackupSweep {
    fn name(&self) -> &'static str {
        "backup"
    }

    fn run_once(&self) -> Result<SweepReport, DatabaseError> {
        let span = tracing::info_span!("sweep", kind = "backup");
        let _guard = span.enter();

        let jobs = self
            .repo
            .find_all(&JobFilter::pending(Action::Backup, self.batch_limit))?;
        let mut report = SweepReport {
            examined: jobs.len(),
            ..SweepReport::default()
        };

        for mut job in jobs {
            let id = job.id;
            let result = self.handle(&mut job);
            tally(&mut report, id, result);
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                dispatched = report.dispatched,
                failed = report.failed,
                "Backup sweep finished"
            );
        }
        Ok(report)
    }
}

/// Dispatches pending restores, oldest first.
pub struct RestoreSweep {
    repo: MigrationRepo,
    catalog: Arc<dyn CourseCatalog>,
    dispatcher: Arc<dyn TaskDispatcher>,
    default_category_id: Option<i64>,
    batch_limit: u64,
}

impl RestoreSweep {
    pub const ERROR_PREFIX: &'static str = "Error in creating restore task.";

    pub fn new(
        repo: MigrationRepo,
        catalog: Arc<dyn CourseCatalog>,
        dispatcher: Arc<dyn TaskDispatcher>,
        default_category_id: Option<i64>,
        batch_limit: u64,
    ) -> Self {
        Self {
            repo,
            catalog,
            dispatcher,
            default_category_id,
            batch_limit,
        }
    }

    fn handle(&self, job: &mut MigrationJob) -> Result<Handled, DatabaseError> {
        let Some(category_id) = resolve_category(
            self.catalog.as_ref(),
            job.destination_category_id,
            self.default_category_id,
        ) else {
            let requested = job
                .destination_category_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".to_string());
            let message = format!(
                "{} Migration id: {} error message: Category {} does not exist and no default category is available",
                Self::ERROR_PREFIX,
                job.id,
                requested
            );
            fail_job(&self.repo, job, message)?;
            return Ok(Handled::Failed);
        };
        job.destination_category_id = Some(category_id);

        log::debug!("Dispatching restore into category {} (migration {})", category_id, job.id);
        start_job(
            &self.repo,
            self.dispatcher.as_ref(),
            job,
            Task::Restore { job_id: job.id },
            Self::ERROR_PREFIX,
        )
    }
}

impl Sweep for RestoreSweep {
    fn name(&self) -> &'static str {
        "restore"
    }

    fn run_once(&self) -> Result<SweepReport, DatabaseError> {
        let span = tracing::info_span!("sweep", kind = "restore");
        let _guard = span.enter();

        let jobs = self
            .repo
            .find_all(&JobFilter::pending(Action::Restore, self.batch_limit))?;
        let mut report = SweepReport {
            examined: jobs.len(),
            ..SweepReport::default()
        };

        for mut job in jobs {
            let id = job.id;
            let result = self.handle(&mut job);
            tally(&mut report, id, result);
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                dispatched = report.dispatched,
                failed = report.failed,
                "Restore sweep finished"
            );
        }
        Ok(report)
    }
}
