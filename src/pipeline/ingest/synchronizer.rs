//! Commits an extraction payload as an exam's canonical reading set.
//!
//! Delete-then-insert under a per-exam lease: dedup, normalize and rescale,
//! derive absolute differential counts, then write everything in one
//! transaction. Rejected-entry diagnostics are stored after the readings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::dedup::dedup;
use super::derive::derive_absolute_counts;
use super::error::SyncError;
use super::normalize::{normalize_reading, Normalized};
use super::sync_lock::SyncLockRegistry;
use super::traits::ExamStore;
use super::types::SyncOutcome;
use crate::db::DatabaseError;
use crate::models::{
    ExamRecord, ExtractionMetadata, ExtractionPayload, ExtractionResponse, NormalizedReading,
    ProcessingStatus, RejectedEntry, RejectedReading,
};

pub struct ResultSynchronizer {
    store: Arc<dyn ExamStore>,
    locks: Arc<SyncLockRegistry>,
}

impl ResultSynchronizer {
    pub fn new(store: Arc<dyn ExamStore>, locks: Arc<SyncLockRegistry>) -> Self {
        Self { store, locks }
    }

    pub fn locks(&self) -> &SyncLockRegistry {
        &self.locks
    }

    /// Commit the payload carried by a `completed` extraction response.
    pub async fn sync(&self, exam_id: Uuid, response: &ExtractionResponse) -> Result<SyncOutcome, SyncError> {
        let data = response.data.as_ref().ok_or(SyncError::MissingPayload(exam_id))?;
        self.sync_payload(exam_id, data, response.processed_at).await
    }

    /// Commit a raw extraction payload. Returns `AlreadyRunning` without
    /// touching the exam when another sync holds its lease.
    pub async fn sync_payload(
        &self,
        exam_id: Uuid,
        raw: &serde_json::Value,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(_lease) = self.locks.try_acquire(exam_id) else {
            let since = self.locks.held_since(&exam_id).map(|t| t.to_rfc3339());
            tracing::info!(exam_id = %exam_id, held_since = ?since, "Sync already running, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let result = self.commit(exam_id, raw, processed_at).await;
        if let Err(e) = &result {
            tracing::error!(exam_id = %exam_id, error = %e, "Result sync failed");
        }
        result
    }

    async fn commit(
        &self,
        exam_id: Uuid,
        raw: &serde_json::Value,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<SyncOutcome, SyncError> {
        let payload = ExtractionPayload::from_value(raw)?;

        let metadata = ExtractionMetadata {
            laboratory: payload.laboratory().map(str::to_string),
            patient_name: payload.patient_name().map(str::to_string),
            total_biomarkers: payload.biomarker_count(),
            exam_date: payload.exam_date(),
            processed_at: processed_at.unwrap_or_else(Utc::now),
        };
        self.store.complete_exam(exam_id, metadata, raw.clone()).await?;

        let removed = self.store.delete_readings(exam_id).await?;

        let retained = dedup(&payload.readings);
        let normalized: Vec<Normalized> = retained
            .iter()
            .map(|reading| normalize_reading(exam_id, reading))
            .collect();
        let derivation = derive_absolute_counts(exam_id, &normalized);

        let readings = normalized.len();
        let derived = derivation.readings.len();
        let mut rows: Vec<NormalizedReading> = normalized.into_iter().map(|n| n.reading).collect();
        rows.extend(derivation.readings);
        self.store.insert_readings(rows).await?;

        let rejected_rows = payload
            .rejected
            .iter()
            .map(|entry| rejected_row(exam_id, entry))
            .collect();
        let rejected = self.store.replace_rejected(exam_id, rejected_rows).await?;

        tracing::info!(
            exam_id = %exam_id,
            extracted = payload.readings.len(),
            readings,
            derived,
            rejected,
            replaced = removed,
            "Exam readings committed"
        );

        Ok(SyncOutcome::Committed {
            readings,
            derived,
            rejected,
            warnings: derivation.warnings,
        })
    }

    /// Record an extraction failure. Completed exams are left as they are.
    pub async fn fail(&self, exam_id: Uuid) -> Result<ExamRecord, SyncError> {
        let current = self
            .store
            .get_exam(exam_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity_type: "exam".into(),
                id: exam_id.to_string(),
            })?;
        if current.processing_status == ProcessingStatus::Completed {
            tracing::warn!(exam_id = %exam_id, "Failure reported for a completed exam, ignoring");
            return Ok(current);
        }
        let record = self.store.set_status(exam_id, ProcessingStatus::Error).await?;
        tracing::warn!(exam_id = %exam_id, "Extraction reported failure");
        Ok(record)
    }
}

fn rejected_row(exam_id: Uuid, entry: &RejectedEntry) -> RejectedReading {
    RejectedReading {
        id: Uuid::new_v4(),
        exam_id,
        original_name: entry.original_name.clone(),
        original_value: entry.original_value.clone(),
        reason: entry.effective_reason().map(str::to_string),
        suggestions: entry.suggestions.clone(),
        similarity: entry.similarity,
        created_at: Utc::now(),
    }
}
