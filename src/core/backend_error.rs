use thiserror::Error;

/// Errors raised by any external collaborator (sheet, document store, drive, mail).
///
/// The core layer never inspects HTTP details; implementations squash them into
/// one of these variants with a human-readable message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Transport error: {0}")]
    Transport(String),
}
