use std::sync::Arc;

use crate::error::WorkerError;
use crate::worker::context::WorkerContext;
use crate::worker::task::{Task, TaskRunner};
use crate::worker::{backup, cleanup, restore};

/// Routes pool tasks to the backup, restore and cleanup workers.
pub struct MigrationTaskRunner {
    ctx: Arc<WorkerContext>,
}

impl MigrationTaskRunner {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }
}

impl TaskRunner for MigrationTaskRunner {
    fn run(&self, task: &Task, attempt: u32) -> Result<(), WorkerError> {
        match *task {
            Task::Backup { job_id } => {
                let status = backup::run(&self.ctx, job_id)?;
                tracing::debug!(job_id, %status, "Backup unit finished");
            }
            Task::Restore { job_id } => {
                let status = restore::run(&self.ctx, job_id)?;
                tracing::debug!(job_id, attempt, %status, "Restore unit finished");
            }
            Task::CourseCleanup { course_id } => cleanup::run(&self.ctx, course_id)?,
        }
        Ok(())
    }

    fn give_up(&self, task: &Task, attempts: u32, error: &WorkerError) {
        match *task {
            Task::Restore { job_id } => {
                if let Err(e) = restore::give_up(&self.ctx, job_id, attempts) {
                    tracing::error!(job_id, error = %e, "Failed to mark exhausted restore as failed");
                }
            }
            Task::CourseCleanup { course_id } => {
                tracing::error!(
                    course_id,
                    attempts,
                    error = %error,
                    "Giving up on stale course cleanup, course must be removed manually"
                );
            }
            Task::Backup { job_id } => {
                tracing::error!(job_id, attempts, error = %error, "Backup gave up");
            }
        }
    }

    fn abandon(&self, task: &Task, error: &WorkerError) {
        let result = match *task {
            Task::Backup { job_id } => backup::abandon(&self.ctx, job_id, error),
            Task::Restore { job_id } => restore::abandon(&self.ctx, job_id, error),
            Task::CourseCleanup { course_id } => {
                tracing::error!(course_id, error = %error, "Stale course cleanup failed");
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!(%task, error = %e, "Failed to mark abandoned job as failed");
        }
    }
}
