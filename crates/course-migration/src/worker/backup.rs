//! Backup worker: archive a course, push it to shared storage, and ask the
//! destination instance to restore it.

use std::path::PathBuf;

use crate::collaborators::BackupOptions;
use crate::error::WorkerError;
use crate::events::MigrationEvent;
use crate::migration::{Action, JobStatus, MigrationJob};
use crate::remote::NotifyError;
use crate::sanitize::redact_token;
use crate::storage::STORAGE_NOT_CONFIGURED;
use crate::worker::context::{WorkerContext, SYSTEM_USER};
use crate::worker::lock::LockKey;

/// Recorded when the storage backend has nowhere to push to.
pub const STORAGE_NOT_READY_FOR_PUSH: &str =
    "Unable to backup course. The [save to] directory has not been configured";

/// Removes the packager's local archive on every exit path.
struct LocalArchive(PathBuf);

impl Drop for LocalArchive {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove local archive");
            }
        }
    }
}

/// Runs one backup job and returns the status it ended in.
///
/// Expected failures are recorded on the job and returned as `Ok(Failed)`;
/// only contract violations (unknown job, wrong action, illegal state) are
/// errors.
pub fn run(ctx: &WorkerContext, job_id: i64) -> Result<JobStatus, WorkerError> {
    let span = tracing::info_span!("backup", job_id);
    let _guard = span.enter();

    let mut job = ctx
        .repo
        .find_by_id(job_id)?
        .ok_or_else(|| WorkerError::InvalidTask(format!("No match for Course migration id: {}", job_id)))?;
    if job.action != Action::Backup {
        return Err(WorkerError::InvalidTask(format!(
            "Migration {} is a {} job, not a backup",
            job_id, job.action
        )));
    }

    if job.status() != JobStatus::InProgress {
        let from = job.status();
        job.transition(JobStatus::InProgress)
            .map_err(|_| WorkerError::transition(job_id, from, JobStatus::InProgress))?;
        ctx.repo.save(&mut job, SYSTEM_USER)?;
    }

    let Some(course_id) = job.course_id else {
        return fail(ctx, &mut job, "Course id is missing".to_string());
    };

    let Some(_lock) = ctx.locks.try_acquire(LockKey::BackupCourse(course_id)) else {
        let message = format!(
            "Backup task, Migration id: {} for course: {}, is already running.",
            job.id, course_id
        );
        return fail(ctx, &mut job, message);
    };

    let Some(storage) = ctx.storage.open() else {
        return fail(ctx, &mut job, STORAGE_NOT_CONFIGURED.to_string());
    };
    if !storage.ready_for_push() {
        return fail(ctx, &mut job, STORAGE_NOT_READY_FOR_PUSH.to_string());
    }
    let Some(notifier) = ctx.notifier.clone() else {
        return fail(ctx, &mut job, NotifyError::NotConfigured.to_string());
    };

    if !ctx.catalog.course_exists(course_id) {
        return fail(ctx, &mut job, format!("Course {} does not exist", course_id));
    }

    tracing::info!(course_id, "Performing backup");
    let artifact = match ctx
        .packager
        .create_backup(course_id, BackupOptions::CONTENT_ONLY)
    {
        Ok(artifact) => artifact,
        Err(e) => return fail(ctx, &mut job, e.to_string()),
    };
    let local = LocalArchive(artifact.path.clone());

    let filename = format!("{}-{}", job.id, artifact.default_name);
    if !storage.push_file(&filename, &local.0) {
        let reason = storage
            .last_error()
            .unwrap_or_else(|| "unknown storage error".to_string());
        return fail(
            ctx,
            &mut job,
            format!("File can not be pushed to the storage. Error: {}", reason),
        );
    }
    drop(local);

    job.filename = Some(filename.clone());
    ctx.repo.save(&mut job, SYSTEM_USER)?;

    if let Err(e) = notifier.request_restore(&filename, job.destination_category_id) {
        if ctx.settings.backup.delete_on_failed_backup && !storage.delete_file(&filename) {
            tracing::warn!(
                filename = %filename,
                error = ?storage.last_error(),
                "Failed to delete blob after failed restore request"
            );
        }
        return fail(ctx, &mut job, redact_token(&e.to_string()));
    }

    job.transition(JobStatus::Completed)
        .map_err(|e| WorkerError::transition(job.id, e.from, e.to))?;
    ctx.repo.save(&mut job, SYSTEM_USER)?;

    ctx.events.emit(MigrationEvent::BackupCompleted {
        migration_id: job.id,
        course_id,
        course_name: ctx
            .catalog
            .course_name(course_id)
            .unwrap_or_else(|| course_id.to_string()),
        filename,
        destination_category_id: job.destination_category_id,
    });
    Ok(JobStatus::Completed)
}

/// Records `message`, moves the job to `Failed`, and emits `backup_failed`.
fn fail(ctx: &WorkerContext, job: &mut MigrationJob, message: String) -> Result<JobStatus, WorkerError> {
    tracing::warn!(error = %message, "Backup failed");
    job.set_error(message.clone());
    job.transition(JobStatus::Failed)
        .map_err(|e| WorkerError::transition(job.id, e.from, e.to))?;
    ctx.repo.save(job, SYSTEM_USER)?;

    ctx.events.emit(MigrationEvent::BackupFailed {
        migration_id: job.id,
        course_id: job.course_id,
        error: message,
    });
    Ok(JobStatus::Failed)
}

/// Fails a job whose unit ended with an error no retry can fix, so it does
/// not stay `InProgress`. Jobs already finished are left alone.
pub fn abandon(ctx: &WorkerContext, job_id: i64, error: &WorkerError) -> Result<(), WorkerError> {
    let Some(mut job) = ctx.repo.find_by_id(job_id)? else {
        return Ok(());
    };
    if job.action != Action::Backup || job.status().is_terminal() {
        return Ok(());
    }
    fail(ctx, &mut job, format!("Unexpected error in backup task: {}", error))?;
    Ok(())
}
