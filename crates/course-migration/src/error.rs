use std::path::PathBuf;
use thiserror::Error;

use crate::migration::{JobStatus, TransitionError};

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Request error: {0}")]
    Api(#[from] ApiError),

    #[error("Remote notifier error: {0}")]
    Notify(#[from] crate::remote::NotifyError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] crate::telemetry::TelemetryError),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No database path configured and no home directory found")]
    NoDatabasePath,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    /// The dispatched payload does not describe a job this worker can run.
    #[error("{0}")]
    InvalidTask(String),

    #[error("Migration job {0} not found")]
    JobNotFound(i64),

    #[error("{task} panicked: {message}")]
    Panicked { task: String, message: String },

    #[error("Migration job {job_id}: {source}")]
    InvalidTransition {
        job_id: i64,
        #[source]
        source: TransitionError,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    /// The attempt failed but can be run again later; the pool reschedules it.
    #[error("Migration job {job_id} will be retried: {message}")]
    Retryable { job_id: i64, message: String },

    /// A stale course could not be deleted yet; the cleanup is retried.
    #[error("Course {course_id} cleanup will be retried: {message}")]
    CleanupPending { course_id: i64, message: String },
}

impl WorkerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::Retryable { .. } | WorkerError::CleanupPending { .. }
        )
    }

    pub(crate) fn transition(job_id: i64, from: JobStatus, to: JobStatus) -> Self {
        WorkerError::InvalidTransition {
            job_id,
            source: TransitionError { from, to },
        }
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("The course migration plugin is not setup: [Destination URL] and [Web service token] need to be configured")]
    NotConfigured,

    #[error("{0}")]
    MissingColumns(String),

    #[error("Failed to read uploaded file '{name}': {reason}")]
    Unreadable { name: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid parameter value detected: {0}")]
    InvalidParameter(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(i64),

    #[error("Sorry, but you do not currently have permissions to do that ({capability})")]
    PermissionDenied { capability: String },

    #[error("Catalog lookup failed: {0}")]
    Catalog(#[from] crate::collaborators::CatalogError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, MigrationError>;
