//! Entry point the destination instance's web service calls after an
//! archive has been transferred.

use std::sync::Arc;

use crate::collaborators::{resolve_category, AccessPolicy, CourseCatalog, RESTORE_CAPABILITY};
use crate::db::MigrationRepo;
use crate::error::ApiError;
use crate::migration::{MigrationJob, NewMigrationJob};

/// Queues restore jobs on behalf of remote callers.
#[derive(Clone)]
pub struct RestoreRequestApi {
    repo: MigrationRepo,
    catalog: Arc<dyn CourseCatalog>,
    policy: Arc<dyn AccessPolicy>,
    default_category_id: Option<i64>,
}

impl RestoreRequestApi {
    pub fn new(
        repo: MigrationRepo,
        catalog: Arc<dyn CourseCatalog>,
        policy: Arc<dyn AccessPolicy>,
        default_category_id: Option<i64>,
    ) -> Self {
        Self {
            repo,
            catalog,
            policy,
            default_category_id,
        }
    }

    /// Creates a `NotStarted` restore job for `filename`.
    ///
    /// `category_id` of `None` or `Some(0)` asks for the default category;
    /// a category that no longer exists falls back to it as well. `actor`
    /// must hold the restore capability on the category finally chosen.
    pub fn request_restore(
        &self,
        actor: i64,
        filename: &str,
        category_id: Option<i64>,
    ) -> Result<MigrationJob, ApiError> {
        let filename = validate_filename(filename)?;
        let requested = category_id.filter(|&id| id > 0);

        let category_id = resolve_category(self.catalog.as_ref(), requested, self.default_category_id)
            .ok_or(ApiError::InvalidCategory(requested.unwrap_or(0)))?;

        if !self
            .policy
            .has_capability(actor, RESTORE_CAPABILITY, category_id)
        {
            return Err(ApiError::PermissionDenied {
                capability: RESTORE_CAPABILITY.to_string(),
            });
        }

        let job = self
            .repo
            .create(&NewMigrationJob::restore(filename, Some(category_id)), actor)?;
        tracing::info!(job_id = job.id, category_id, filename, "Restore requested");
        Ok(job)
    }
}

/// Accepts a bare file name: no directories, no parent references, no
/// control characters.
fn validate_filename(filename: &str) -> Result<&str, ApiError> {
    let trimmed = filename.trim();
    let valid = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains(['/', '\\'])
        && !trimmed.chars().any(char::is_control);
    if valid {
        Ok(trimmed)
    } else {
        Err(ApiError::InvalidParameter(format!("filename '{}'", filename)))
    }
}
