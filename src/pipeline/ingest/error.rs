//! Error types for the ingestion pipeline, one enum per stage.

use thiserror::Error;
use uuid::Uuid;

use super::types::CompletionPath;
use crate::db::DatabaseError;

/// Failures talking to the upload proxy (storage target, byte transfer,
/// extraction status).
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Cannot connect to {0}")]
    Connection(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    ResponseParsing(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Extraction response for exam {0} carries no data")]
    MissingPayload(Uuid),

    #[error("Extraction payload is malformed: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Extraction failed (reported via {via})")]
    ExtractionFailed { via: CompletionPath },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Synchronization after poll failed: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload target request failed: {0}")]
    Gateway(#[source] GatewayError),

    #[error("File transfer failed: {0}")]
    Transport(#[source] GatewayError),

    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Patient matching failed: {0}")]
    Matching(#[from] DatabaseError),

    #[error("Exam {0} is not waiting for a patient match")]
    NotAwaitingMatch(Uuid),
}
