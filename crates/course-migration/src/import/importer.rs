use serde::Serialize;

use crate::db::MigrationRepo;
use crate::error::ImportError;
use crate::events::{EventBroadcaster, MigrationEvent};
use crate::import::columns::HeaderMap;
use crate::import::{Delimiter, Encoding};
use crate::migration::{MigrationJob, NewMigrationJob};

/// Summary of one processed upload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadResults {
    /// Data rows read, header excluded.
    pub row_count: usize,
    pub success: usize,
    pub failed: usize,
    /// One message per invalid cell or rejected row, in file order.
    pub errors: Vec<String>,
    /// Jobs created, in file order.
    #[serde(skip)]
    pub jobs: Vec<MigrationJob>,
}

impl UploadResults {
    /// Aggregate message shown to the uploader, followed by the error lines.
    pub fn message(&self) -> String {
        let mut message = format!(
            "File successfully processed. Total rows: {}, Success: {}, Failed: {}, Errors in CSV file: {}",
            self.row_count,
            self.success,
            self.failed,
            self.errors.len()
        );
        for error in &self.errors {
            message.push('\n');
            message.push_str(error);
        }
        message
    }
}

/// Turns an uploaded course list into backup jobs.
pub struct BulkImporter {
    repo: MigrationRepo,
    events: EventBroadcaster,
    remote_configured: bool,
}

impl BulkImporter {
    /// `remote_configured` says whether the destination endpoint and token
    /// are set; without them an upload would only create doomed jobs.
    pub fn new(repo: MigrationRepo, events: EventBroadcaster, remote_configured: bool) -> Self {
        Self {
            repo,
            events,
            remote_configured,
        }
    }

    /// Processes `content` uploaded by `user_id` as `filename`.
    ///
    /// A bad row is counted and reported but never stops the rows around it.
    /// A header without the required columns rejects the whole file.
    pub fn import(
        &self,
        user_id: i64,
        filename: &str,
        content: &[u8],
        delimiter: Delimiter,
        encoding: Encoding,
    ) -> Result<UploadResults, ImportError> {
        if !self.remote_configured {
            return Err(ImportError::NotConfigured);
        }

        self.events.emit(MigrationEvent::FileUploaded {
            user_id,
            filename: filename.to_string(),
        });

        let text = encoding.decode(content).map_err(|e| ImportError::Unreadable {
            name: filename.to_string(),
            reason: e.to_string(),
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter.as_byte())
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader.headers().map_err(|e| ImportError::Unreadable {
            name: filename.to_string(),
            reason: e.to_string(),
        })?;
        let header_map = HeaderMap::from_headers(headers.iter())
            .map_err(|errors| ImportError::MissingColumns(errors.join(" AND ")))?;

        let mut results = UploadResults::default();
        for (index, record) in reader.records().enumerate() {
            let row_number = index + 1;
            results.row_count += 1;

            let parsed = record
                .map_err(|e| vec![format!("Row {} could not be read: {}", row_number, e)])
                .and_then(|row| header_map.parse_row(&row, row_number));

            match parsed {
                Ok((course_id, category_id)) => {
                    let job = self
                        .repo
                        .create(&NewMigrationJob::backup(course_id, Some(category_id)), user_id)?;
                    tracing::debug!(job_id = job.id, course_id, category_id, "Queued backup from upload");
                    results.jobs.push(job);
                    results.success += 1;
                }
                Err(messages) => {
                    results.errors.extend(messages);
                    results.failed += 1;
                }
            }
        }

        tracing::info!(
            filename,
            rows = results.row_count,
            success = results.success,
            failed = results.failed,
            "Processed course list upload"
        );
        self.events.emit(MigrationEvent::FileProcessed {
            user_id,
            filename: filename.to_string(),
            row_count: results.row_count,
            success: results.success,
            failed: results.failed,
        });

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::migration::{Action, JobStatus};

    fn importer(configured: bool) -> (BulkImporter, MigrationRepo, EventBroadcaster) {
        let repo = MigrationRepo::new(Database::open_in_memory().unwrap());
        let events = EventBroadcaster::default();
        (
            BulkImporter::new(repo.clone(), events.clone(), configured),
            repo,
            events,
        )
    }

    fn run(importer: &BulkImporter, csv: &str) -> Result<UploadResults, ImportError> {
        importer.import(12, "courses.csv", csv.as_bytes(), Delimiter::Comma, Encoding::Utf8)
    }

    #[test]
    fn test_single_valid_row_creates_job() {
        let (importer, _repo, _events) = importer(true);
        let results = run(&importer, "courseid,categoryid\n2,1\n").unwrap();

        assert_eq!((results.row_count, results.success, results.failed), (1, 1, 0));
        assert!(results.errors.is_empty());
        let job = &results.jobs[0];
        assert_eq!(job.action, Action::Backup);
        assert_eq!(job.course_id, Some(2));
        assert_eq!(job.destination_category_id, Some(1));
        assert_eq!(job.status(), JobStatus::NotStarted);
        assert_eq!(job.modified_by, 12);
    }

    #[test]
    fn test_url_column() {
        let (importer, _repo, _events) = importer(true);
        let results = run(
            &importer,
            "url,categoryid\nhttps://lms.example.org/course/view.php?id=2,1\n",
        )
        .unwrap();
        assert_eq!(results.success, 1);
        assert_eq!(results.jobs[0].course_id, Some(2));
    }

    #[test]
    fn test_invalid_rows_do_not_void_valid_ones() {
        let (importer, repo, _events) = importer(true);
        let csv = "courseid,categoryid\n2,1\nx,1\n3,y\n,1\n";
        let results = run(&importer, csv).unwrap();

        assert_eq!((results.row_count, results.success, results.failed), (4, 1, 3));
        assert_eq!(
            results.errors,
            vec![
                "Non integer value for courseid found on row 2",
                "Non integer value for categoryid found on row 3",
                "Non integer value for courseid found on row 4",
            ]
        );
        assert_eq!(repo.find_all(&Default::default()).unwrap().len(), 1);
        assert!(results
            .message()
            .starts_with("File successfully processed. Total rows: 4, Success: 1, Failed: 3, Errors in CSV file: 3"));
    }

    #[test]
    fn test_missing_columns_rejects_file() {
        let (importer, repo, _events) = importer(true);
        let err = run(&importer, "id,category\n2,1\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "CSV file must include one of courseid, url as column headings AND \
             CSV file must include one of categoryid as column headings"
        );
        assert!(repo.find_all(&Default::default()).unwrap().is_empty());
    }

    #[test]
    fn test_semicolon_delimiter() {
        let (importer, _repo, _events) = importer(true);
        let results = importer
            .import(1, "list.csv", b"CourseID;CategoryID\n5;3\n", Delimiter::Semicolon, Encoding::Utf8)
            .unwrap();
        assert_eq!(results.jobs[0].course_id, Some(5));
    }

    #[test]
    fn test_unconfigured_remote_refuses_upload() {
        let (importer, _repo, _events) = importer(false);
        let err = run(&importer, "courseid,categoryid\n2,1\n").unwrap_err();
        assert!(matches!(err, ImportError::NotConfigured));
    }

    #[test]
    fn test_upload_events() {
        let (importer, _repo, events) = importer(true);
        let mut rx = events.subscribe();
        run(&importer, "courseid,categoryid\n2,1\n").unwrap();

        let uploaded = rx.try_recv().unwrap();
        assert_eq!(uploaded.event.name(), "file_uploaded");
        let processed = rx.try_recv().unwrap();
        assert_eq!(
            processed.event,
            MigrationEvent::FileProcessed {
                user_id: 12,
                filename: "courses.csv".into(),
                row_count: 1,
                success: 1,
                failed: 0,
            }
        );
    }
}
