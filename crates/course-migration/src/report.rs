//! Read-only projection of migration jobs for reporting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collaborators::CourseCatalog;
use crate::db::{DatabaseError, JobFilter, MigrationRepo};
use crate::migration::{Action, JobStatus, MigrationJob};

/// One job as shown to an administrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub id: i64,
    pub action: String,
    /// Course name, `"{id} (course is missing)"`, or empty.
    pub course: String,
    pub destination_category: String,
    pub status: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// The error trail, oldest first, one entry per line.
    pub errors: Vec<String>,
}

/// A page of report rows plus the number of jobs matching the filter.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPage {
    pub rows: Vec<ReportRow>,
    pub total: u64,
}

/// Number of jobs of one action in one status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub action: String,
    pub status: String,
    pub count: u64,
}

pub struct MigrationReport {
    repo: MigrationRepo,
    catalog: Arc<dyn CourseCatalog>,
}

impl MigrationReport {
    pub fn new(repo: MigrationRepo, catalog: Arc<dyn CourseCatalog>) -> Self {
        Self { repo, catalog }
    }

    /// Jobs matching `filter`, newest first unless the filter says otherwise.
    pub fn fetch(&self, filter: &JobFilter) -> Result<ReportPage, DatabaseError> {
        let (jobs, total) = self.repo.query(filter)?;
        let rows = jobs.iter().map(|job| self.row(job)).collect();
        Ok(ReportPage { rows, total })
    }

    /// Job totals for every action and status, including empty ones.
    pub fn status_counts(&self) -> Result<Vec<StatusCount>, DatabaseError> {
        let mut counts = Vec::with_capacity(Action::ALL.len() * JobStatus::ALL.len());
        for action in Action::ALL {
            for status in JobStatus::ALL {
                counts.push(StatusCount {
                    action: action.to_string(),
                    status: status.to_string(),
                    count: self.repo.count_by_status(action, status)?,
                });
            }
        }
        Ok(counts)
    }

    fn row(&self, job: &MigrationJob) -> ReportRow {
        ReportRow {
            id: job.id,
            action: job.action.to_string(),
            course: self.course_label(job.course_id),
            destination_category: self.category_label(job),
            status: job.status().to_string(),
            filename: job.filename.clone().unwrap_or_default(),
            created_at: job.created_at,
            modified_at: job.modified_at,
            errors: job.errors().messages().map(str::to_owned).collect(),
        }
    }

    fn course_label(&self, course_id: Option<i64>) -> String {
        match course_id {
            Some(id) => self
                .catalog
                .course_name(id)
                .unwrap_or_else(|| format!("{} (course is missing)", id)),
            None => String::new(),
        }
    }

    /// Backups name a category on the remote instance, so only restores
    /// are checked against the local catalog.
    fn category_label(&self, job: &MigrationJob) -> String {
        match (job.action, job.destination_category_id) {
            (_, None) => String::new(),
            (Action::Backup, Some(id)) => id.to_string(),
            (Action::Restore, Some(id)) if self.catalog.category_exists(id) => id.to_string(),
            (Action::Restore, Some(id)) => format!("{} (category is missing)", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CatalogError;
    use crate::db::Database;
    use crate::migration::{JobStatus, NewMigrationJob};

    struct OneCourse;

    impl CourseCatalog for OneCourse {
        fn course_exists(&self, course_id: i64) -> bool {
            course_id == 2
        }
        fn course_name(&self, course_id: i64) -> Option<String> {
            (course_id == 2).then(|| "Physics 101".to_string())
        }
        fn category_exists(&self, category_id: i64) -> bool {
            category_id == 1
        }
        fn create_course(&self, _: i64, _: &str, _: &str) -> Result<i64, CatalogError> {
            Err(CatalogError::Failed("unused".into()))
        }
        fn delete_course(&self, course_id: i64) -> Result<(), CatalogError> {
            Err(CatalogError::CourseNotFound(course_id))
        }
        fn set_course_visible(&self, _: i64, _: bool) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    #[test]
    fn test_rows_carry_labels() {
        let repo = MigrationRepo::new(Database::open_in_memory().unwrap());
        let present = repo.create(&NewMigrationJob::backup(2, Some(9)), 1).unwrap();
        let mut gone = repo.create(&NewMigrationJob::backup(3, None), 1).unwrap();
        gone.set_error("first");
        gone.set_error("second");
        gone.transition(JobStatus::Failed).unwrap();
        repo.save(&mut gone, 1).unwrap();
        let restore = repo.create(&NewMigrationJob::restore("x.mbz", Some(4)), 1).unwrap();

        let report = MigrationReport::new(repo, Arc::new(OneCourse));
        let page = report.fetch(&JobFilter::default()).unwrap();
        assert_eq!(page.total, 3);

        let by_id = |id| page.rows.iter().find(|r| r.id == id).unwrap();
        let row = by_id(present.id);
        assert_eq!(row.action, "Backup");
        assert_eq!(row.course, "Physics 101");
        assert_eq!(row.destination_category, "9");
        assert_eq!(row.status, "Not started");

        let row = by_id(gone.id);
        assert_eq!(row.course, "3 (course is missing)");
        assert_eq!(row.status, "Failed");
        assert_eq!(row.errors, vec!["first", "second"]);

        let row = by_id(restore.id);
        assert_eq!(row.action, "Restore");
        assert_eq!(row.course, "");
        assert_eq!(row.destination_category, "4 (category is missing)");
        assert_eq!(row.filename, "x.mbz");
    }

    #[test]
    fn test_filter_by_action() {
        let repo = MigrationRepo::new(Database::open_in_memory().unwrap());
        repo.create(&NewMigrationJob::backup(2, None), 1).unwrap();
        repo.create(&NewMigrationJob::restore("x.mbz", None), 1).unwrap();

        let report = MigrationReport::new(repo, Arc::new(OneCourse));
        let page = report
            .fetch(&JobFilter {
                action: Some(Action::Restore),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.rows[0].action, "Restore");
    }

    #[test]
    fn test_status_counts_cover_every_combination() {
        let repo = MigrationRepo::new(Database::open_in_memory().unwrap());
        repo.create(&NewMigrationJob::backup(2, None), 1).unwrap();
        repo.create(&NewMigrationJob::backup(3, None), 1).unwrap();
        let mut failed = repo.create(&NewMigrationJob::restore("x.mbz", None), 1).unwrap();
        failed.transition(JobStatus::Failed).unwrap();
        repo.save(&mut failed, 1).unwrap();

        let report = MigrationReport::new(repo, Arc::new(OneCourse));
        let counts = report.status_counts().unwrap();
        assert_eq!(counts.len(), 10);

        let count = |action: &str, status: &str| {
            counts
                .iter()
                .find(|c| c.action == action && c.status == status)
                .unwrap()
                .count
        };
        assert_eq!(count("Backup", "Not started"), 2);
        assert_eq!(count("Restore", "Failed"), 1);
        assert_eq!(count("Restore", "Not started"), 0);
    }
}
