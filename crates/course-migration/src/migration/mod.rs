//! Migration job model.
//!
//! A [`MigrationJob`] tracks one course moving through backup or restore. Its
//! status is a closed enum and every change goes through
//! [`MigrationJob::transition`], which rejects moves the state machine does
//! not allow.

pub mod job;
pub mod status;

pub use job::{ErrorRecord, ErrorTrail, MigrationJob, NewMigrationJob, ERROR_DELIMITER};
pub use status::{Action, JobStatus, TransitionError};
