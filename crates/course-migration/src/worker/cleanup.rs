//! Deferred removal of a half-restored course.

use crate::collaborators::CatalogError;
use crate::error::WorkerError;

use crate::worker::context::WorkerContext;

/// Deletes `course_id` if it still exists.
///
/// A failed deletion returns [`WorkerError::CleanupPending`] so the pool
/// tries again with backoff.
pub fn run(ctx: &WorkerContext, course_id: i64) -> Result<(), WorkerError> {
    if !ctx.catalog.course_exists(course_id) {
        tracing::debug!(course_id, "Course already gone, nothing to clean up");
        return Ok(());
    }

    match ctx.catalog.delete_course(course_id) {
        Ok(()) | Err(CatalogError::CourseNotFound(_)) => {
            tracing::info!(course_id, "Deleted stale course");
            Ok(())
        }
        Err(e) => Err(WorkerError::CleanupPending {
            course_id,
            message: e.to_string(),
        }),
    }
}
