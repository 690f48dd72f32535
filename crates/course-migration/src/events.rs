//! Structured events emitted by sweeps, workers, and the bulk importer.
//!
//! Every event is logged through `tracing` and fanned out to subscribers
//! over a tokio broadcast channel. Secrets are redacted before either.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::sanitize::redact_token;

/// Default channel capacity for [`EventBroadcaster::default`].
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    BackupCompleted {
        migration_id: i64,
        course_id: i64,
        course_name: String,
        filename: String,
        destination_category_id: Option<i64>,
    },
    BackupFailed {
        migration_id: i64,
        course_id: Option<i64>,
        error: String,
    },
    RestoreCompleted {
        migration_id: i64,
        course_id: i64,
    },
    /// `migration_id` is 0 when the job could not be found.
    RestoreFailed {
        migration_id: i64,
        error: String,
    },
    HttpRequestFailed {
        url: String,
        error: String,
    },
    FileUploaded {
        user_id: i64,
        filename: String,
    },
    FileProcessed {
        user_id: i64,
        filename: String,
        row_count: usize,
        success: usize,
        failed: usize,
    },
}

impl MigrationEvent {
    /// An `http_request_failed` event with the token stripped from both
    /// fields.
    pub fn http_request_failed(url: &str, error: &str) -> Self {
        MigrationEvent::HttpRequestFailed {
            url: redact_token(url),
            error: redact_token(error),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MigrationEvent::BackupCompleted { .. } => "backup_completed",
            MigrationEvent::BackupFailed { .. } => "backup_failed",
            MigrationEvent::RestoreCompleted { .. } => "restore_completed",
            MigrationEvent::RestoreFailed { .. } => "restore_failed",
            MigrationEvent::HttpRequestFailed { .. } => "http_request_failed",
            MigrationEvent::FileUploaded { .. } => "file_uploaded",
            MigrationEvent::FileProcessed { .. } => "file_processed",
        }
    }

    /// Human-readable description for logs and audit trails.
    pub fn description(&self) -> String {
        match self {
            MigrationEvent::BackupCompleted {
                course_id,
                course_name,
                filename,
                destination_category_id,
                ..
            } => format!(
                "Backup course '{}' (id: {}) is successfully completed to file '{}' for category id: {}.",
                course_name,
                course_id,
                filename,
                destination_category_id.map_or_else(|| "default".to_string(), |id| id.to_string())
            ),
            MigrationEvent::BackupFailed {
                migration_id,
                course_id,
                error,
            } => format!(
                "Backup of course {} for migration {} failed. Error: {}",
                course_id.map_or_else(|| "unknown".to_string(), |id| id.to_string()),
                migration_id,
                error
            ),
            MigrationEvent::RestoreCompleted {
                migration_id,
                course_id,
            } => format!(
                "Migration {} restored course with id {}.",
                migration_id, course_id
            ),
            MigrationEvent::RestoreFailed { error, .. } => {
                format!("Restoring course is failed. Error: {}", error)
            }
            MigrationEvent::HttpRequestFailed { url, error } => {
                format!("HTTP request failed. Error: {} URL: {}", error, url)
            }
            MigrationEvent::FileUploaded { user_id, filename } => {
                format!("User with id '{}' uploaded file '{}'", user_id, filename)
            }
            MigrationEvent::FileProcessed {
                filename,
                row_count,
                success,
                failed,
                ..
            } => format!(
                "File '{}' successfully processed. Total rows: '{}'. Loaded: '{}'. Errors: '{}'.",
                filename, row_count, success, failed
            ),
        }
    }

    fn redacted(self) -> Self {
        match self {
            MigrationEvent::HttpRequestFailed { url, error } => {
                MigrationEvent::http_request_failed(&url, &error)
            }
            MigrationEvent::BackupFailed {
                migration_id,
                course_id,
                error,
            } => MigrationEvent::BackupFailed {
                migration_id,
                course_id,
                error: redact_token(&error),
            },
            MigrationEvent::RestoreFailed {
                migration_id,
                error,
            } => MigrationEvent::RestoreFailed {
                migration_id,
                error: redact_token(&error),
            },
            other => other,
        }
    }
}

/// An emitted event with its timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: MigrationEvent,
}

/// Fans out migration events to any number of subscribers.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<EventRecord>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Logs the event and sends it to all current subscribers.
    pub fn emit(&self, event: MigrationEvent) {
        let event = event.redacted();
        match &event {
            MigrationEvent::BackupFailed { .. }
            | MigrationEvent::RestoreFailed { .. }
            | MigrationEvent::HttpRequestFailed { .. } => {
                tracing::warn!(event = event.name(), "{}", event.description());
            }
            _ => tracing::info!(event = event.name(), "{}", event.description()),
        }

        // No receivers is fine.
        let _ = self.sender.send(EventRecord {
            timestamp: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }
}
