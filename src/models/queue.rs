use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::QueueStatus;

/// A file submitted to a batch, tracked from `pending` to a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub file_name: String,
    pub status: QueueStatus,
    pub progress: u8,
    pub message: String,
    pub exam_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub error: Option<String>,
    /// Soft-timed-out: still processing remotely, not an error.
    pub background: bool,
    pub pending_match: Option<MatchRequest>,
}

impl QueueItem {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            status: QueueStatus::Pending,
            progress: 0,
            message: "Waiting".into(),
            exam_id: None,
            patient_id: None,
            error: None,
            background: false,
            pending_match: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, QueueStatus::Completed | QueueStatus::Error)
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.status = QueueStatus::Error;
        self.message = message.clone();
        self.error = Some(message);
    }
}

/// Candidates offered when the extracted patient name is ambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub exam_id: Uuid,
    pub extracted_name: String,
    pub candidates: Vec<MatchCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub patient_id: Uuid,
    pub full_name: String,
    /// Percentage in [0, 100].
    pub similarity: f64,
}
