use chrono::{DateTime, Utc};
use serde::Serialize;

use super::status::{Action, JobStatus, TransitionError};

/// Separator used when the error trail is rendered as a single string.
pub const ERROR_DELIMITER: &str = "\n";

/// One entry of a job's failure history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// Row id once persisted, `None` while only held in memory.
    #[serde(skip)]
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

/// Append-only, ordered failure history of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorTrail {
    records: Vec<ErrorRecord>,
}

impl ErrorTrail {
    pub(crate) fn from_records(records: Vec<ErrorRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.records.push(ErrorRecord {
            id: None,
            created_at: Utc::now(),
            message: message.into(),
        });
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.message.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// All messages joined by [`ERROR_DELIMITER`], oldest first.
    pub fn joined(&self) -> Option<String> {
        if self.records.is_empty() {
            return None;
        }
        Some(self.messages().collect::<Vec<_>>().join(ERROR_DELIMITER))
    }

    /// Records not yet written to the database.
    pub(crate) fn unsaved_mut(&mut self) -> impl Iterator<Item = &mut ErrorRecord> {
        self.records.iter_mut().filter(|r| r.id.is_none())
    }
}

/// Fields needed to create a job. Everything else is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMigrationJob {
    pub action: Action,
    pub course_id: Option<i64>,
    pub destination_category_id: Option<i64>,
    pub filename: Option<String>,
}

impl NewMigrationJob {
    /// A backup of `course_id`, to be restored remotely into `category_id`.
    pub fn backup(course_id: i64, destination_category_id: Option<i64>) -> Self {
        Self {
            action: Action::Backup,
            course_id: Some(course_id),
            destination_category_id,
            filename: None,
        }
    }

    /// A restore of an already transferred archive into `category_id`.
    pub fn restore(filename: impl Into<String>, destination_category_id: Option<i64>) -> Self {
        Self {
            action: Action::Restore,
            course_id: None,
            destination_category_id,
            filename: Some(filename.into()),
        }
    }
}

/// The record of one course's migration intent and progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationJob {
    pub id: i64,
    pub action: Action,
    /// Source course for a backup; the course created by a restore.
    pub course_id: Option<i64>,
    pub destination_category_id: Option<i64>,
    status: JobStatus,
    /// Blob name in storage once produced (backup) or requested (restore).
    pub filename: Option<String>,
    errors: ErrorTrail,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub modified_by: i64,
}

impl MigrationJob {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: i64,
        action: Action,
        course_id: Option<i64>,
        destination_category_id: Option<i64>,
        status: JobStatus,
        filename: Option<String>,
        errors: ErrorTrail,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
        modified_by: i64,
    ) -> Self {
        Self {
            id,
            action,
            course_id,
            destination_category_id,
            status,
            filename,
            errors,
            created_at,
            modified_at,
            modified_by,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Moves the job to `to`, rejecting anything the state machine forbids.
    pub fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Appends `message` to the failure history. Earlier messages are kept.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.errors.push(message);
    }

    pub fn errors(&self) -> &ErrorTrail {
        &self.errors
    }

    pub(crate) fn errors_mut(&mut self) -> &mut ErrorTrail {
        &mut self.errors
    }

    /// The failure history rendered as a single delimited string.
    pub fn error(&self) -> Option<String> {
        self.errors.joined()
    }
}
