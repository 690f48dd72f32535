//! Interfaces to the systems this crate orchestrates but does not own.
//!
//! The course catalog, the content packager and the access policy all live
//! in the host platform. Workers receive them as trait objects so tests and
//! embedders can plug in their own implementations.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Capability required to queue a restore into a category.
pub const RESTORE_CAPABILITY: &str = "course/migration:restore";

/// Full name given to the empty course shell a restore fills in.
pub const RESTORING_COURSE_FULLNAME: &str = "Restoring course";

/// Short name given to the empty course shell a restore fills in.
pub const RESTORING_COURSE_SHORTNAME: &str = "restoring";

/// Errors reported by the course catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Course {0} does not exist")]
    CourseNotFound(i64),

    #[error("Category {0} does not exist")]
    CategoryNotFound(i64),

    #[error("{0}")]
    Failed(String),
}

/// Errors reported by the content packager. The message is recorded on the
/// job verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PackagerError(pub String);

impl PackagerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Read and write access to courses and categories on the local instance.
pub trait CourseCatalog: Send + Sync {
    fn course_exists(&self, course_id: i64) -> bool;

    /// Display name of the course, `None` when it does not exist.
    fn course_name(&self, course_id: i64) -> Option<String>;

    fn category_exists(&self, category_id: i64) -> bool;

    /// Creates an empty course and returns its id.
    fn create_course(
        &self,
        category_id: i64,
        fullname: &str,
        shortname: &str,
    ) -> Result<i64, CatalogError>;

    fn delete_course(&self, course_id: i64) -> Result<(), CatalogError>;

    fn set_course_visible(&self, course_id: i64, visible: bool) -> Result<(), CatalogError>;
}

/// What a backup archive may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupOptions {
    pub include_users: bool,
    pub anonymize: bool,
}

impl BackupOptions {
    /// Course content only: no enrolments, no user data.
    pub const CONTENT_ONLY: Self = Self {
        include_users: false,
        anonymize: false,
    };
}

/// A local archive produced by [`ContentPackager::create_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    /// Name the packager would give the archive, e.g. `backup-course-2.mbz`.
    pub default_name: String,
}

/// Creates archives from courses and recreates courses from archives.
pub trait ContentPackager: Send + Sync {
    fn create_backup(
        &self,
        course_id: i64,
        options: BackupOptions,
    ) -> Result<BackupArtifact, PackagerError>;

    /// Unpacks `archive` into the existing directory `destination`.
    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), PackagerError>;

    /// Restores the extracted archive in `extracted` into `course_id`.
    fn restore(&self, extracted: &Path, course_id: i64) -> Result<(), PackagerError>;
}

/// Capability checks against the host's permission system.
pub trait AccessPolicy: Send + Sync {
    fn has_capability(&self, actor: i64, capability: &str, category_id: i64) -> bool;
}

/// Picks the category a restore lands in: the requested one when it still
/// exists, otherwise the configured default when that exists.
pub fn resolve_category(
    catalog: &dyn CourseCatalog,
    requested: Option<i64>,
    default: Option<i64>,
) -> Option<i64> {
    requested
        .filter(|id| catalog.category_exists(*id))
        .or_else(|| default.filter(|id| catalog.category_exists(*id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Categories(HashSet<i64>);

    impl CourseCatalog for Categories {
        fn course_exists(&self, _course_id: i64) -> bool {
            false
        }
        fn course_name(&self, _course_id: i64) -> Option<String> {
            None
        }
        fn category_exists(&self, category_id: i64) -> bool {
            self.0.contains(&category_id)
        }
        fn create_course(&self, _: i64, _: &str, _: &str) -> Result<i64, CatalogError> {
            Err(CatalogError::Failed("unused".into()))
        }
        fn delete_course(&self, course_id: i64) -> Result<(), CatalogError> {
            Err(CatalogError::CourseNotFound(course_id))
        }
        fn set_course_visible(&self, course_id: i64, _: bool) -> Result<(), CatalogError> {
            Err(CatalogError::CourseNotFound(course_id))
        }
    }

    #[test]
    fn test_resolve_category_prefers_requested() {
        let catalog = Categories([1, 5].into_iter().collect());
        assert_eq!(resolve_category(&catalog, Some(5), Some(1)), Some(5));
    }

    #[test]
    fn test_resolve_category_falls_back_to_default() {
        let catalog = Categories([1].into_iter().collect());
        assert_eq!(resolve_category(&catalog, Some(99), Some(1)), Some(1));
        assert_eq!(resolve_category(&catalog, None, Some(1)), Some(1));
    }

    #[test]
    fn test_resolve_category_none_when_nothing_exists() {
        let catalog = Categories(HashSet::new());
        assert_eq!(resolve_category(&catalog, Some(2), Some(1)), None);
        assert_eq!(resolve_category(&catalog, None, None), None);
    }
}
