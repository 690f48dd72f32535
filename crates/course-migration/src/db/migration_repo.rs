//! Migration job repository: CRUD operations for the `course_migrations`
//! table and its append-only `course_migration_errors` trail.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::migration::{
    Action, ErrorRecord, ErrorTrail, JobStatus, MigrationJob, NewMigrationJob,
};

const TABLE: &str = "course_migrations";
const ERRORS_TABLE: &str = "course_migration_errors";

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct MigrationRow {
    id: i64,
    action: String,
    course_id: Option<i64>,
    destination_category_id: Option<i64>,
    status: String,
    filename: Option<String>,
    created_at: String,
    modified_at: String,
    modified_by: i64,
}

impl MigrationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            action: row.get("action")?,
            course_id: row.get("course_id")?,
            destination_category_id: row.get("destination_category_id")?,
            status: row.get("status")?,
            filename: row.get("filename")?,
            created_at: row.get("created_at")?,
            modified_at: row.get("modified_at")?,
            modified_by: row.get("modified_by")?,
        })
    }

    fn into_job(self, errors: ErrorTrail) -> Result<MigrationJob, DatabaseError> {
        let action = Action::parse(&self.action).ok_or_else(|| corrupt(
            TABLE,
            format!("job {} has unknown action '{}'", self.id, self.action),
        ))?;
        let status = JobStatus::parse(&self.status).ok_or_else(|| corrupt(
            TABLE,
            format!("job {} has unknown status '{}'", self.id, self.status),
        ))?;
        Ok(MigrationJob::from_parts(
            self.id,
            action,
            self.course_id,
            self.destination_category_id,
            status,
            self.filename,
            errors,
            parse_timestamp(TABLE, &self.created_at)?,
            parse_timestamp(TABLE, &self.modified_at)?,
            self.modified_by,
        ))
    }
}

fn corrupt(table: &'static str, reason: String) -> DatabaseError {
    DatabaseError::CorruptRow { table, reason }
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that text
/// ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(table: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| corrupt(table, format!("bad timestamp '{}': {}", value, e)))
}

/// Order of query results by creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Sweeps process the oldest jobs first.
    OldestFirst,
    #[default]
    NewestFirst,
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub action: Option<Action>,
    pub status: Option<JobStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub order: SortOrder,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl JobFilter {
    /// Jobs eligible for a dispatch sweep, oldest first.
    pub fn pending(action: Action, limit: u64) -> Self {
        Self {
            action: Some(action),
            status: Some(JobStatus::NotStarted),
            order: SortOrder::OldestFirst,
            limit: Some(limit),
            ..Default::default()
        }
    }
}

/// Persistence for migration jobs.
///
/// Cloning is cheap; every clone talks to the same [`Database`].
#[derive(Clone)]
pub struct MigrationRepo {
    db: Database,
}

impl MigrationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new job in `NotStarted` and returns it with its assigned id.
    pub fn create(
        &self,
        new_job: &NewMigrationJob,
        modified_by: i64,
    ) -> Result<MigrationJob, DatabaseError> {
        let now = format_timestamp(&Utc::now());
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO course_migrations (action, course_id, destination_category_id,
                 status, filename, created_at, modified_at, modified_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)",
                params![
                    new_job.action.as_str(),
                    new_job.course_id,
                    new_job.destination_category_id,
                    JobStatus::NotStarted.as_str(),
                    new_job.filename,
                    now,
                    modified_by,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        self.get_by_id(id)
    }

    /// Finds a job by its id.
    pub fn find_by_id(&self, id: i64) -> Result<Option<MigrationJob>, DatabaseError> {
        self.db.with_conn(|conn| load_job(conn, id))
    }

    /// Like [`find_by_id`](Self::find_by_id) but a missing job is an error.
    pub fn get_by_id(&self, id: i64) -> Result<MigrationJob, DatabaseError> {
        self.find_by_id(id)?.ok_or(DatabaseError::NotFound(id))
    }

    /// Writes the job row and any unsaved error records in one transaction,
    /// bumping `modified_at` and `modified_by`.
    pub fn save(&self, job: &mut MigrationJob, modified_by: i64) -> Result<(), DatabaseError> {
        let now = Utc::now();
        let now_str = format_timestamp(&now);
        let created_str = format_timestamp(&job.created_at);

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO course_migrations (id, action, course_id, destination_category_id,
                 status, filename, created_at, modified_at, modified_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    action = excluded.action,
                    course_id = excluded.course_id,
                    destination_category_id = excluded.destination_category_id,
                    status = excluded.status,
                    filename = excluded.filename,
                    modified_at = excluded.modified_at,
                    modified_by = excluded.modified_by",
                params![
                    job.id,
                    job.action.as_str(),
                    job.course_id,
                    job.destination_category_id,
                    job.status().as_str(),
                    job.filename,
                    created_str,
                    now_str,
                    modified_by,
                ],
            )?;
            let job_id = job.id;
            for record in job.errors_mut().unsaved_mut() {
                record.id = Some(insert_error(&tx, job_id, record)?);
            }
            tx.commit()?;
            Ok(())
        })?;

        job.modified_at = now;
        job.modified_by = modified_by;
        Ok(())
    }

    /// Appends `message` to the job's error trail and persists just that
    /// record. Earlier messages are never touched.
    pub fn set_error(
        &self,
        job: &mut MigrationJob,
        message: impl Into<String>,
    ) -> Result<(), DatabaseError> {
        job.set_error(message);
        let job_id = job.id;
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for record in job.errors_mut().unsaved_mut() {
                record.id = Some(insert_error(&tx, job_id, record)?);
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Returns the jobs matching `filter`.
    pub fn find_all(&self, filter: &JobFilter) -> Result<Vec<MigrationJob>, DatabaseError> {
        self.query(filter).map(|(rows, _)| rows)
    }

    /// Queries jobs with filters, returning (rows, total_count).
    pub fn query(&self, filter: &JobFilter) -> Result<(Vec<MigrationJob>, u64), DatabaseError> {
        self.db.with_conn(|conn| {
            let mut conditions = Vec::new();
            let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(action) = filter.action {
                conditions.push(format!("action = ?{}", param_values.len() + 1));
                param_values.push(Box::new(action.as_str()));
            }
            if let Some(status) = filter.status {
                conditions.push(format!("status = ?{}", param_values.len() + 1));
                param_values.push(Box::new(status.as_str()));
            }
            if let Some(ref from) = filter.created_from {
                conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
                param_values.push(Box::new(format_timestamp(from)));
            }
            if let Some(ref to) = filter.created_to {
                conditions.push(format!("created_at <= ?{}", param_values.len() + 1));
                param_values.push(Box::new(format_timestamp(to)));
            }

            let where_clause = if conditions.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", conditions.join(" AND "))
            };

            let count_sql = format!("SELECT COUNT(*) FROM course_migrations {}", where_clause);
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

            // SQLite treats a negative LIMIT as "no limit".
            let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
            let offset = filter.offset.unwrap_or(0) as i64;
            param_values.push(Box::new(limit));
            param_values.push(Box::new(offset));
            let direction = match filter.order {
                SortOrder::OldestFirst => "ASC",
                SortOrder::NewestFirst => "DESC",
            };
            let query_sql = format!(
                "SELECT * FROM course_migrations {} ORDER BY created_at {dir}, id {dir} LIMIT ?{} OFFSET ?{}",
                where_clause,
                param_values.len() - 1,
                param_values.len(),
                dir = direction,
            );

            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&query_sql)?;
            let rows: Vec<MigrationRow> = stmt
                .query_map(params_ref.as_slice(), MigrationRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let mut jobs = Vec::with_capacity(rows.len());
            for row in rows {
                let errors = load_errors(conn, row.id)?;
                jobs.push(row.into_job(errors)?);
            }

            Ok((jobs, total))
        })
    }

    /// Counts jobs of the given action in the given status.
    pub fn count_by_status(&self, action: Action, status: JobStatus) -> Result<u64, DatabaseError> {
        self.db.with_conn(|conn| {
            let count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM course_migrations WHERE action = ?1 AND status = ?2",
                params![action.as_str(), status.as_str()],
                |r| r.get(0),
            )?;
            Ok(count)
        })
    }
}

fn load_job(conn: &Connection, id: i64) -> Result<Option<MigrationJob>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM course_migrations WHERE id = ?1",
            params![id],
            MigrationRow::from_row,
        )
        .optional()?;
    match row {
        Some(row) => {
            let errors = load_errors(conn, row.id)?;
            Ok(Some(row.into_job(errors)?))
        }
        None => Ok(None),
    }
}

fn load_errors(conn: &Connection, migration_id: i64) -> Result<ErrorTrail, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, created_at, message FROM course_migration_errors
         WHERE migration_id = ?1 ORDER BY id ASC",
    )?;
    let raw: Vec<(i64, String, String)> = stmt
        .query_map(params![migration_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(raw.len());
    for (id, created_at, message) in raw {
        records.push(ErrorRecord {
            id: Some(id),
            created_at: parse_timestamp(ERRORS_TABLE, &created_at)?,
            message,
        });
    }
    Ok(ErrorTrail::from_records(records))
}

fn insert_error(
    conn: &Connection,
    migration_id: i64,
    record: &ErrorRecord,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO course_migration_errors (migration_id, created_at, message)
         VALUES (?1, ?2, ?3)",
        params![migration_id, format_timestamp(&record.created_at), record.message],
    )?;
    Ok(conn.last_insert_rowid())
}
