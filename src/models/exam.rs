use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{MatchingKind, ProcessingStatus};

/// One uploaded lab report and its processing state.
///
/// The persisted row is authoritative: pipeline stages re-read or re-write
/// it rather than trusting an in-memory copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRecord {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub uploaded_by: Option<String>,
    pub storage_key: String,
    pub storage_file_name: String,
    pub exam_date: Option<NaiveDate>,
    pub processing_status: ProcessingStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub laboratory: Option<String>,
    pub patient_name_extracted: Option<String>,
    pub total_biomarkers: Option<u32>,
    pub raw_payload: Option<serde_json::Value>,
    pub matching_kind: Option<MatchingKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when an exam row is first created (state `uploading`).
#[derive(Debug, Clone, Default)]
pub struct NewExam {
    pub patient_id: Option<Uuid>,
    pub uploaded_by: Option<String>,
    pub storage_key: String,
    pub storage_file_name: String,
    pub exam_date: Option<NaiveDate>,
}

/// Metadata written on completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionMetadata {
    pub laboratory: Option<String>,
    pub patient_name: Option<String>,
    pub total_biomarkers: u32,
    /// Only fills an exam whose date was not given at upload.
    pub exam_date: Option<NaiveDate>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub full_name: String,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
