pub mod api;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod import;
pub mod migration;
pub mod remote;
pub mod report;
pub mod sanitize;
pub mod scheduler;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use api::RestoreRequestApi;
pub use collaborators::{AccessPolicy, ContentPackager, CourseCatalog};
pub use config::{load_config, Config};
pub use db::{Database, JobFilter, MigrationRepo};
pub use error::{ApiError, ConfigError, ImportError, MigrationError, Result, WorkerError};
pub use events::{EventBroadcaster, MigrationEvent};
pub use import::{BulkImporter, UploadResults};
pub use migration::{Action, JobStatus, MigrationJob, NewMigrationJob};
pub use report::MigrationReport;
pub use secrets::{resolve_secret, SecretError};
pub use service::{Collaborators, MigrationService};
pub use storage::{build_storage, ConfiguredStorage, StorageBackend, StorageFactory};
