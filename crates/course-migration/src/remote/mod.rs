//! Notification of the destination instance that an archive is ready to be
//! restored.

pub mod http;

pub use http::HttpRestoreNotifier;

use thiserror::Error;

use crate::secrets::SecretError;

/// Web-service function invoked on the destination instance.
pub const WS_FUNCTION: &str = "tool_coursemigration_request_restore";

/// Response format requested from the destination instance.
pub const WS_FORMAT: &str = "json";

/// Why a restore request did not succeed. Rendered the way it is stored on
/// the job and in the `http_request_failed` event.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Error attempting to make HTTP request: Plugin is not configured.")]
    NotConfigured,

    #[error("Error attempting to make HTTP request: {0}.")]
    Secret(#[from] SecretError),

    #[error("Error attempting to make HTTP request: Invalid endpoint URL: {0}.")]
    InvalidUrl(String),

    #[error("Error attempting to make HTTP request: {0}.")]
    Transport(String),

    #[error("Error attempting to make HTTP request: Invalid HTTP code: {0}.")]
    InvalidStatus(u16),

    /// The destination answered with a web-service exception.
    #[error("Error attempting to make HTTP request: {0}.")]
    Exception(String),

    #[error("Error attempting to make HTTP request: Unexpected response.")]
    UnexpectedResponse,
}

/// Asks the destination instance to restore an archive that has already
/// been transferred.
pub trait RestoreNotifier: Send + Sync {
    /// `category_id` of `None` lets the destination pick its default.
    fn request_restore(&self, filename: &str, category_id: Option<i64>) -> Result<(), NotifyError>;
}
