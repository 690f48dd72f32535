//! Restore worker: pull a transferred archive, restore it into a fresh
//! course, and decide between retry and failure when that goes wrong.

use std::path::{Path, PathBuf};

use crate::collaborators::{
    resolve_category, CatalogError, RESTORING_COURSE_FULLNAME, RESTORING_COURSE_SHORTNAME,
};
use crate::error::WorkerError;
use crate::events::MigrationEvent;
use crate::migration::{Action, JobStatus, MigrationJob};
use crate::storage::{StorageBackend, STORAGE_NOT_CONFIGURED};
use crate::worker::context::{WorkerContext, SYSTEM_USER};
use crate::worker::lock::LockKey;
use crate::worker::task::Task;

/// Recorded when a restore unit names a job that does not exist.
pub const INVALID_RESTORE_ID: &str = "Invalid id. Error: could not find record for restore.";

/// Recorded when the storage backend has nowhere to pull from.
pub const STORAGE_NOT_READY_FOR_PULL: &str =
    "Unable to restore course. The [restore from] directory has not been configured";

/// Removes a per-run extraction directory on every exit path.
struct ExtractionDir(PathBuf);

impl ExtractionDir {
    fn create(parent: &Path) -> std::io::Result<Self> {
        let path = parent.join(format!("restore_{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&path)?;
        Ok(Self(path))
    }
}

impl Drop for ExtractionDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove extraction directory");
            }
        }
    }
}

/// Runs one restore job and returns the status it ended in.
///
/// A failure while the archive is still in storage leaves the job in
/// `Retrying` and returns [`WorkerError::Retryable`] so the pool runs it
/// again later.
pub fn run(ctx: &WorkerContext, job_id: i64) -> Result<JobStatus, WorkerError> {
    let span = tracing::info_span!("restore", job_id);
    let _guard = span.enter();

    let Some(mut job) = ctx.repo.find_by_id(job_id)? else {
        ctx.events.emit(MigrationEvent::RestoreFailed {
            migration_id: 0,
            error: INVALID_RESTORE_ID.to_string(),
        });
        return Err(WorkerError::InvalidTask(INVALID_RESTORE_ID.to_string()));
    };
    if job.action != Action::Restore {
        return Err(WorkerError::InvalidTask(format!(
            "Migration {} is a {} job, not a restore",
            job_id, job.action
        )));
    }

    let Some(_lock) = ctx.locks.try_acquire(LockKey::RestoreJob(job_id)) else {
        tracing::debug!("Restore already running for this job, skipping duplicate unit");
        return Ok(job.status());
    };

    if job.status().is_terminal() {
        return Err(WorkerError::transition(
            job_id,
            job.status(),
            JobStatus::InProgress,
        ));
    }

    if let Some(stale) = job.course_id {
        discard_stale_course(ctx, &mut job, stale)?;
    }

    if job.status() != JobStatus::InProgress {
        let from = job.status();
        job.transition(JobStatus::InProgress)
            .map_err(|_| WorkerError::transition(job_id, from, JobStatus::InProgress))?;
        ctx.repo.save(&mut job, SYSTEM_USER)?;
    }

    let Some(filename) = job.filename.clone() else {
        return fail(ctx, &mut job, "Restore filename is missing".to_string());
    };
    let Some(storage) = ctx.storage.open() else {
        return fail(ctx, &mut job, STORAGE_NOT_CONFIGURED.to_string());
    };
    if !storage.ready_for_pull() {
        return fail(ctx, &mut job, STORAGE_NOT_READY_FOR_PULL.to_string());
    }

    match attempt_restore(ctx, &mut job, storage.as_ref(), &filename) {
        Ok(course_id) => complete(ctx, &mut job, storage.as_ref(), &filename, course_id),
        Err(reason) => recover(ctx, &mut job, storage.as_ref(), &filename, reason),
    }
}

/// A previous run got as far as creating a course. Record it, delete that
/// course, and forget it before starting over.
fn discard_stale_course(
    ctx: &WorkerContext,
    job: &mut MigrationJob,
    course_id: i64,
) -> Result<(), WorkerError> {
    tracing::info!(course_id, "Discarding course left by a previous attempt");
    job.set_error(format!(
        "Migration task was restarted. Previous course ID {}.",
        course_id
    ));

    match ctx.catalog.delete_course(course_id) {
        Ok(()) | Err(CatalogError::CourseNotFound(_)) => {}
        Err(e) => {
            tracing::warn!(course_id, error = %e, "Failed to delete stale course, queuing cleanup");
            if let Err(e) = ctx.dispatcher.dispatch(Task::CourseCleanup { course_id }) {
                tracing::error!(course_id, error = %e, "Failed to queue course cleanup");
            }
        }
    }

    job.course_id = None;
    ctx.repo.save(job, SYSTEM_USER)?;
    Ok(())
}

/// Pull, extract, create the course shell, restore. Returns the new course
/// id, or the reason for failure.
fn attempt_restore(
    ctx: &WorkerContext,
    job: &mut MigrationJob,
    storage: &dyn StorageBackend,
    filename: &str,
) -> Result<i64, String> {
    let workdir = ExtractionDir::create(&ctx.settings.temp_directory)
        .map_err(|e| format!("Cannot create extraction directory: {}", e))?;

    let pulled = storage.pull_file(filename).ok_or_else(|| {
        format!(
            "File can not be pulled from the storage. Error: {}",
            storage
                .last_error()
                .unwrap_or_else(|| "unknown storage error".to_string())
        )
    })?;

    ctx.packager
        .extract(pulled.path(), &workdir.0)
        .map_err(|e| format!("Cannot extract archive {}. {}", filename, e))?;
    if let Err(e) = pulled.delete() {
        tracing::warn!(error = %e, "Failed to delete pulled archive");
    }

    let category_id = resolve_category(
        ctx.catalog.as_ref(),
        job.destination_category_id,
        ctx.settings.restore.default_category_id,
    )
    .ok_or_else(|| match job.destination_category_id {
        Some(id) => format!(
            "Category {} does not exist and no default category is available",
            id
        ),
        None => "No category given and no default category is available".to_string(),
    })?;
    job.destination_category_id = Some(category_id);

    let course_id = ctx
        .catalog
        .create_course(category_id, RESTORING_COURSE_FULLNAME, RESTORING_COURSE_SHORTNAME)
        .map_err(|e| e.to_string())?;
    job.course_id = Some(course_id);
    // Persist at once so a crash mid-restore leaves a trace of the course.
    ctx.repo
        .save(job, SYSTEM_USER)
        .map_err(|e| format!("Cannot record course {}: {}", course_id, e))?;

    tracing::info!(course_id, category_id, "Restoring archive into new course");
    ctx.packager
        .restore(&workdir.0, course_id)
        .map_err(|e| e.to_string())?;

    Ok(course_id)
}

fn complete(
    ctx: &WorkerContext,
    job: &mut MigrationJob,
    storage: &dyn StorageBackend,
    filename: &str,
    course_id: i64,
) -> Result<JobStatus, WorkerError> {
    job.transition(JobStatus::Completed)
        .map_err(|e| WorkerError::transition(job.id, e.from, e.to))?;
    ctx.repo.save(job, SYSTEM_USER)?;

    if ctx.settings.restore.hide_restored_course {
        if let Err(e) = ctx.catalog.set_course_visible(course_id, false) {
            tracing::warn!(course_id, error = %e, "Failed to hide restored course");
        }
    }
    if ctx.settings.restore.delete_on_successful_restore && !storage.delete_file(filename) {
        tracing::warn!(error = ?storage.last_error(), "Failed to delete restored archive");
    }

    ctx.events.emit(MigrationEvent::RestoreCompleted {
        migration_id: job.id,
        course_id,
    });
    Ok(JobStatus::Completed)
}

/// Records the failure and decides between `Retrying` (archive still
/// present) and `Failed`.
fn recover(
    ctx: &WorkerContext,
    job: &mut MigrationJob,
    storage: &dyn StorageBackend,
    filename: &str,
    reason: String,
) -> Result<JobStatus, WorkerError> {
    let message = format!("Cannot restore the course. {}", reason);
    tracing::warn!(error = %message, "Restore failed");
    job.set_error(message.clone());

    if ctx.settings.restore.delete_on_failed_restore && !storage.delete_file(filename) {
        tracing::warn!(error = ?storage.last_error(), "Failed to delete archive after failed restore");
    }

    ctx.events.emit(MigrationEvent::RestoreFailed {
        migration_id: job.id,
        error: message.clone(),
    });

    if storage.file_exists(filename) {
        job.transition(JobStatus::Retrying)
            .map_err(|e| WorkerError::transition(job.id, e.from, e.to))?;
        ctx.repo.save(job, SYSTEM_USER)?;
        return Err(WorkerError::Retryable {
            job_id: job.id,
            message,
        });
    }

    job.transition(JobStatus::Failed)
        .map_err(|e| WorkerError::transition(job.id, e.from, e.to))?;
    ctx.repo.save(job, SYSTEM_USER)?;
    Ok(JobStatus::Failed)
}

/// Records a precondition failure that no retry can fix.
fn fail(ctx: &WorkerContext, job: &mut MigrationJob, message: String) -> Result<JobStatus, WorkerError> {
    tracing::warn!(error = %message, "Restore failed");
    job.set_error(message.clone());
    job.transition(JobStatus::Failed)
        .map_err(|e| WorkerError::transition(job.id, e.from, e.to))?;
    ctx.repo.save(job, SYSTEM_USER)?;

    ctx.events.emit(MigrationEvent::RestoreFailed {
        migration_id: job.id,
        error: message,
    });
    Ok(JobStatus::Failed)
}

/// Called by the pool once the retry budget is spent.
pub fn give_up(ctx: &WorkerContext, job_id: i64, attempts: u32) -> Result<(), WorkerError> {
    let Some(mut job) = ctx.repo.find_by_id(job_id)? else {
        return Err(WorkerError::JobNotFound(job_id));
    };
    if job.status() != JobStatus::Retrying {
        return Ok(());
    }

    let message = format!("Retry limit reached after {} attempts", attempts);
    job.set_error(message.clone());
    job.transition(JobStatus::Failed)
        .map_err(|e| WorkerError::transition(job_id, e.from, e.to))?;
    ctx.repo.save(&mut job, SYSTEM_USER)?;

    ctx.events.emit(MigrationEvent::RestoreFailed {
        migration_id: job_id,
        error: message,
    });
    Ok(())
}

/// Fails a job whose unit ended with an error no retry can fix, so it does
/// not stay `InProgress`. Jobs already finished are left alone.
pub fn abandon(ctx: &WorkerContext, job_id: i64, error: &WorkerError) -> Result<(), WorkerError> {
    let Some(mut job) = ctx.repo.find_by_id(job_id)? else {
        return Ok(());
    };
    if job.action != Action::Restore || job.status().is_terminal() {
        return Ok(());
    }
    fail(ctx, &mut job, format!("Unexpected error in restore task: {}", error))?;
    Ok(())
}
