//! Types shared by the ingestion pipeline stages.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::derive::DerivationWarning;
use super::error::UploadError;
use crate::models::{ExamRecord, ExtractionResponse};

// ═══════════════════════════════════════════════════════════
// Inputs
// ═══════════════════════════════════════════════════════════

/// A file to ingest, already read into memory.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    /// Declared MIME type, if the source provided one.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, UploadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        Ok(Self::new(file_name, bytes))
    }
}

/// Options shared by every file of one upload or batch.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub target_patient: Option<Uuid>,
    pub exam_date: Option<NaiveDate>,
    pub uploaded_by: Option<String>,
}

/// Request for a presigned storage target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub user_id: String,
    pub file_name: String,
    pub content_type: String,
}

/// Where the bytes go, and the content type the storage expects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub upload_url: String,
    #[serde(rename = "s3Key")]
    pub storage_key: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// Progress
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub message: String,
}

/// Sending half of a progress channel. A reporter without a channel
/// discards events; a closed receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn report(&self, percent: u8, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                percent: percent.min(100),
                message: message.into(),
            });
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPath {
    Push,
    Poll,
}

impl std::fmt::Display for CompletionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Poll => "poll",
        })
    }
}

/// How a completion watch ended, short of failure.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Resolved {
        via: CompletionPath,
        biomarkers: u32,
        /// Present only when the poll path resolved: the push path's record
        /// already holds the committed payload.
        response: Option<ExtractionResponse>,
    },
    /// The ceiling passed without a terminal state. Not a failure.
    TimedOut { elapsed: Duration },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Committed {
        readings: usize,
        derived: usize,
        rejected: usize,
        warnings: Vec<DerivationWarning>,
    },
    /// Another sync for the same exam holds the lock.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Completed(ExamRecord),
    /// Soft timeout: the exam stays `processing` and may finish later.
    Background(ExamRecord),
}

impl UploadOutcome {
    pub fn exam(&self) -> &ExamRecord {
        match self {
            Self::Completed(exam) | Self::Background(exam) => exam,
        }
    }
}
