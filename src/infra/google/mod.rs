// =============================================================================
// GOOGLE WORKSPACE BACKENDS
// =============================================================================
//
// REST clients implementing the core traits against Google's APIs:
// - `docs_client.rs`   - DocumentBackend (Docs batchUpdate + Drive copy/delete)
// - `drive_client.rs`  - ArtifactStore (folders, PDF export and upload)
// - `sheets_client.rs` - DataSource + SettingsSource (responses + settings tabs)
// - `gmail_client.rs`  - MailTransport (raw MIME via users.messages.send)
//
// All of them share one `ServiceAccountAuth` behind an `Arc`.

pub mod docs_client;
pub mod drive_client;
pub mod gmail_client;
pub mod service_account;
pub mod sheets_client;

pub use docs_client::GoogleDocsClient;
pub use drive_client::GoogleDriveClient;
pub use gmail_client::GmailClient;
pub use service_account::ServiceAccountAuth;
pub use sheets_client::GoogleSheetsClient;

use crate::core::backend_error::BackendError;
use reqwest::{Response, StatusCode};

pub const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
pub const DOCS_API: &str = "https://docs.googleapis.com/v1";
pub const SHEETS_API: &str = "https://sheets.googleapis.com/v4";
pub const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1";

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Passes successful responses through and turns everything else into the
/// matching `BackendError`, keeping Google's error body for the message.
pub(crate) async fn check_response(
    response: Response,
    context: &str,
) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(error_for_status(status, context, &text))
}

pub(crate) fn error_for_status(status: StatusCode, context: &str, body: &str) -> BackendError {
    let message = format!("{} ({}): {}", context, status, body.trim());
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Auth(message),
        _ => BackendError::Api(message),
    }
}
