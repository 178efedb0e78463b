//! Seams between the pipeline and its collaborators.
//!
//! - StorageGateway: presigned upload targets and byte transfer
//! - ExtractionService: status query for a stored file
//! - ExamStore: authoritative exam/reading persistence plus change notifications
//! - PatientMatcher: name-based patient lookup for unassigned exams

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::error::GatewayError;
use super::types::{UploadRequest, UploadTarget};
use crate::db::DatabaseError;
use crate::models::*;

#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn request_upload_target(&self, request: &UploadRequest) -> Result<UploadTarget, GatewayError>;

    /// PUT the bytes to `target.upload_url` with `content_type`.
    async fn transfer(
        &self,
        target: &UploadTarget,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn query_status(&self, user_id: &str, storage_key: &str) -> Result<ExtractionResponse, GatewayError>;
}

/// Persistence for exams and their readings.
///
/// Every successful exam write publishes the new record to subscribers.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn create_exam(&self, exam: NewExam) -> Result<ExamRecord, DatabaseError>;

    async fn get_exam(&self, id: Uuid) -> Result<Option<ExamRecord>, DatabaseError>;

    async fn find_exam_by_storage_key(&self, storage_key: &str) -> Result<Option<ExamRecord>, DatabaseError>;

    async fn set_status(&self, id: Uuid, status: ProcessingStatus) -> Result<ExamRecord, DatabaseError>;

    async fn complete_exam(
        &self,
        id: Uuid,
        metadata: ExtractionMetadata,
        raw_payload: serde_json::Value,
    ) -> Result<ExamRecord, DatabaseError>;

    async fn assign_patient(
        &self,
        id: Uuid,
        patient_id: Uuid,
        kind: MatchingKind,
    ) -> Result<ExamRecord, DatabaseError>;

    async fn delete_readings(&self, exam_id: Uuid) -> Result<usize, DatabaseError>;

    /// All rows or none.
    async fn insert_readings(&self, readings: Vec<NormalizedReading>) -> Result<usize, DatabaseError>;

    async fn readings_for_exam(&self, exam_id: Uuid) -> Result<Vec<NormalizedReading>, DatabaseError>;

    async fn replace_rejected(
        &self,
        exam_id: Uuid,
        rejected: Vec<RejectedReading>,
    ) -> Result<usize, DatabaseError>;

    /// Change notifications for all exams; receivers filter by id.
    fn subscribe(&self) -> broadcast::Receiver<ExamRecord>;
}

#[async_trait]
pub trait PatientMatcher: Send + Sync {
    /// Candidates for `extracted_name`, best first.
    async fn candidates(
        &self,
        extracted_name: &str,
        owner_id: Option<&str>,
    ) -> Result<Vec<MatchCandidate>, DatabaseError>;

    async fn create_patient(&self, full_name: &str, owner_id: Option<&str>) -> Result<Patient, DatabaseError>;
}
