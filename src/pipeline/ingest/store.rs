//! SQLite-backed exam store.
//!
//! Wraps one connection behind a mutex and publishes every exam write on a
//! broadcast channel, which is the push path the completion watcher listens
//! to. Writes made through any handle (orchestrator, webhook) reach every
//! subscriber.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::traits::{ExamStore, PatientMatcher};
use crate::db::{self, DatabaseError};
use crate::models::*;

const NOTIFY_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct SqliteExamStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<ExamRecord>,
}

impl SqliteExamStore {
    pub fn new(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        }
    }

    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(db::open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(db::open_memory_database()?))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite consistent; keep serving.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, record: &ExamRecord) {
        // No subscribers is fine.
        let _ = self.changes.send(record.clone());
    }

    pub fn rejected_for_exam(&self, exam_id: Uuid) -> Result<Vec<RejectedReading>, DatabaseError> {
        db::get_rejected_for_exam(&self.conn(), &exam_id)
    }

    pub fn list_exams(&self) -> Result<Vec<ExamRecord>, DatabaseError> {
        db::list_exams(&self.conn())
    }

    pub fn list_patients(&self, owner_id: Option<&str>) -> Result<Vec<Patient>, DatabaseError> {
        db::list_patients(&self.conn(), owner_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }
}

#[async_trait]
impl ExamStore for SqliteExamStore {
    async fn create_exam(&self, exam: NewExam) -> Result<ExamRecord, DatabaseError> {
        let record = db::insert_exam(&self.conn(), &exam)?;
        self.publish(&record);
        Ok(record)
    }

    async fn get_exam(&self, id: Uuid) -> Result<Option<ExamRecord>, DatabaseError> {
        db::get_exam(&self.conn(), &id)
    }

    async fn find_exam_by_storage_key(&self, storage_key: &str) -> Result<Option<ExamRecord>, DatabaseError> {
        db::get_exam_by_storage_key(&self.conn(), storage_key)
    }

    async fn set_status(&self, id: Uuid, status: ProcessingStatus) -> Result<ExamRecord, DatabaseError> {
        let record = db::update_exam_status(&self.conn(), &id, status)?;
        tracing::debug!(exam_id = %id, status = %status, "Exam status updated");
        self.publish(&record);
        Ok(record)
    }

    async fn complete_exam(
        &self,
        id: Uuid,
        metadata: ExtractionMetadata,
        raw_payload: serde_json::Value,
    ) -> Result<ExamRecord, DatabaseError> {
        let record = db::complete_exam(&self.conn(), &id, &metadata, &raw_payload)?;
        self.publish(&record);
        Ok(record)
    }

    async fn assign_patient(
        &self,
        id: Uuid,
        patient_id: Uuid,
        kind: MatchingKind,
    ) -> Result<ExamRecord, DatabaseError> {
        let record = db::assign_exam_patient(&self.conn(), &id, &patient_id, kind)?;
        self.publish(&record);
        Ok(record)
    }

    async fn delete_readings(&self, exam_id: Uuid) -> Result<usize, DatabaseError> {
        db::delete_readings_for_exam(&self.conn(), &exam_id)
    }

    async fn insert_readings(&self, readings: Vec<NormalizedReading>) -> Result<usize, DatabaseError> {
        db::insert_readings(&self.conn(), &readings)
    }

    async fn readings_for_exam(&self, exam_id: Uuid) -> Result<Vec<NormalizedReading>, DatabaseError> {
        db::get_readings_for_exam(&self.conn(), &exam_id)
    }

    async fn replace_rejected(
        &self,
        exam_id: Uuid,
        rejected: Vec<RejectedReading>,
    ) -> Result<usize, DatabaseError> {
        db::replace_rejected_readings(&self.conn(), &exam_id, &rejected)
    }

    fn subscribe(&self) -> broadcast::Receiver<ExamRecord> {
        self.changes.subscribe()
    }
}

/// Patient creation lives with the store; similarity ranking is in `matching`.
#[async_trait]
impl PatientMatcher for SqliteExamStore {
    async fn candidates(
        &self,
        extracted_name: &str,
        owner_id: Option<&str>,
    ) -> Result<Vec<MatchCandidate>, DatabaseError> {
        let patients = self.list_patients(owner_id)?;
        Ok(super::matching::rank_candidates(extracted_name, &patients))
    }

    async fn create_patient(&self, full_name: &str, owner_id: Option<&str>) -> Result<Patient, DatabaseError> {
        let patient = db::insert_patient(&self.conn(), full_name, owner_id)?;
        tracing::info!(patient_id = %patient.id, "Created patient from extracted name");
        Ok(patient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_exam() -> NewExam {
        NewExam {
            storage_key: "uploads/a.pdf".into(),
            storage_file_name: "a.pdf".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let store = SqliteExamStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();

        let exam = store.create_exam(new_exam()).await.unwrap();
        let created = rx.recv().await.unwrap();
        assert_eq!(created.id, exam.id);
        assert_eq!(created.processing_status, ProcessingStatus::Uploading);

        store.set_status(exam.id, ProcessingStatus::Processing).await.unwrap();
        let updated = rx.recv().await.unwrap();
        assert_eq!(updated.processing_status, ProcessingStatus::Processing);
    }

    #[tokio::test]
    async fn clones_share_connection_and_channel() {
        let store = SqliteExamStore::open_in_memory().unwrap();
        let other = store.clone();
        let mut rx = store.subscribe();

        let exam = other.create_exam(new_exam()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().id, exam.id);
        assert!(store.get_exam(exam.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_receiver_unsubscribes() {
        let store = SqliteExamStore::open_in_memory().unwrap();
        let rx = store.subscribe();
        assert_eq!(store.subscriber_count(), 1);
        drop(rx);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn candidates_rank_existing_patients() {
        let store = SqliteExamStore::open_in_memory().unwrap();
        store.create_patient("Maria Souza", Some("dr-ana")).await.unwrap();
        store.create_patient("Pedro Alves", Some("dr-ana")).await.unwrap();

        let found = store.candidates("MARIA SOUZA", Some("dr-ana")).await.unwrap();
        assert_eq!(found[0].full_name, "Maria Souza");
        assert_eq!(found[0].similarity, 100.0);
    }
}
