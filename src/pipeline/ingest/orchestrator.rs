//! Drives one file from upload to a terminal exam state.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::error::UploadError;
use super::filename::{effective_content_type, storage_file_name};
use super::synchronizer::ResultSynchronizer;
use super::traits::{ExamStore, ExtractionService, StorageGateway};
use super::types::{ProgressReporter, UploadFile, UploadOptions, UploadOutcome, UploadRequest, WatchOutcome};
use super::watcher::{CompletionWatcher, WatchConfig};
use crate::db::DatabaseError;
use crate::models::{ExamRecord, NewExam, ProcessingStatus};

/// Owner identity sent to the gateway when no patient is assigned yet.
pub const UNASSIGNED_OWNER: &str = "pending";

pub struct UploadOrchestrator {
    gateway: Arc<dyn StorageGateway>,
    store: Arc<dyn ExamStore>,
    watcher: CompletionWatcher,
}

impl UploadOrchestrator {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        extraction: Arc<dyn ExtractionService>,
        store: Arc<dyn ExamStore>,
        synchronizer: Arc<ResultSynchronizer>,
        config: WatchConfig,
    ) -> Self {
        let watcher = CompletionWatcher::new(store.clone(), extraction, synchronizer, config);
        Self {
            gateway,
            store,
            watcher,
        }
    }

    pub fn store(&self) -> &Arc<dyn ExamStore> {
        &self.store
    }

    /// Upload `file`, wait for extraction and return the exam it produced.
    ///
    /// A soft timeout is not an error: the exam stays `processing` and the
    /// outcome is `Background`.
    pub async fn process(
        &self,
        file: UploadFile,
        options: &UploadOptions,
        progress: &ProgressReporter,
    ) -> Result<UploadOutcome, UploadError> {
        progress.report(10, "Preparing upload");

        let content_type = effective_content_type(&file.file_name, file.content_type.as_deref());
        let storage_name = storage_file_name(&file.file_name, Utc::now());
        let owner = options
            .target_patient
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNASSIGNED_OWNER.to_string());

        tracing::info!(
            file_name = %file.file_name,
            storage_name = %storage_name,
            content_type = %content_type,
            size = file.bytes.len(),
            "Uploading exam"
        );

        let target = self
            .gateway
            .request_upload_target(&UploadRequest {
                user_id: owner.clone(),
                file_name: storage_name.clone(),
                content_type: content_type.clone(),
            })
            .await
            .map_err(UploadError::Gateway)?;
        progress.report(20, "Upload target granted");

        let exam = self
            .store
            .create_exam(NewExam {
                patient_id: options.target_patient,
                uploaded_by: options.uploaded_by.clone(),
                storage_key: target.storage_key.clone(),
                storage_file_name: storage_name,
                exam_date: options.exam_date,
            })
            .await?;

        progress.report(30, "Sending file");
        let effective = target.content_type.clone().unwrap_or(content_type);
        if let Err(e) = self.gateway.transfer(&target, &effective, file.bytes).await {
            tracing::error!(exam_id = %exam.id, error = %e, "File transfer failed");
            self.mark_failed(exam.id).await;
            return Err(UploadError::Transport(e));
        }

        let exam = self.store.set_status(exam.id, ProcessingStatus::Processing).await?;
        progress.report(50, "Processing");

        match self.watcher.watch(&exam, &owner, progress).await {
            Ok(WatchOutcome::Resolved { via, biomarkers, .. }) => {
                let message = if biomarkers > 0 {
                    format!("Completed: {biomarkers} biomarkers extracted")
                } else {
                    "Completed".to_string()
                };
                progress.report(100, message);
                tracing::info!(exam_id = %exam.id, %via, biomarkers, "Exam processed");
                Ok(UploadOutcome::Completed(self.reload(exam.id).await?))
            }
            Ok(WatchOutcome::TimedOut { elapsed }) => {
                progress.report(95, "Processing in background");
                tracing::info!(
                    exam_id = %exam.id,
                    elapsed_secs = elapsed.as_secs(),
                    "Continuing in background"
                );
                Ok(UploadOutcome::Background(self.reload(exam.id).await?))
            }
            Err(e) => {
                tracing::error!(exam_id = %exam.id, error = %e, "Extraction did not complete");
                self.mark_failed(exam.id).await;
                Err(e.into())
            }
        }
    }

    async fn reload(&self, exam_id: Uuid) -> Result<ExamRecord, DatabaseError> {
        self.store
            .get_exam(exam_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity_type: "exam".into(),
                id: exam_id.to_string(),
            })
    }

    async fn mark_failed(&self, exam_id: Uuid) {
        if let Err(e) = self.store.set_status(exam_id, ProcessingStatus::Error).await {
            tracing::warn!(exam_id = %exam_id, error = %e, "Could not mark exam as failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingest::error::{GatewayError, WatchError};
    use crate::pipeline::ingest::gateway::{MockExtractionService, MockStorageGateway};
    use crate::pipeline::ingest::store::SqliteExamStore;
    use crate::pipeline::ingest::sync_lock::SyncLockRegistry;
    use crate::pipeline::ingest::types::ProgressEvent;
    use serde_json::json;

    fn orchestrator(
        gateway: Arc<MockStorageGateway>,
        extraction: MockExtractionService,
    ) -> (SqliteExamStore, UploadOrchestrator) {
        let store = SqliteExamStore::open_in_memory().unwrap();
        let shared: Arc<dyn ExamStore> = Arc::new(store.clone());
        let synchronizer = Arc::new(ResultSynchronizer::new(shared.clone(), Arc::new(SyncLockRegistry::new())));
        let orchestrator = UploadOrchestrator::new(
            gateway,
            Arc::new(extraction),
            shared,
            synchronizer,
            WatchConfig::default(),
        );
        (store, orchestrator)
    }

    fn completed() -> MockExtractionService {
        MockExtractionService::new().then(MockExtractionService::completed(json!({
            "metadata": {"total_exames": 1},
            "exames": [{"nome": "Glicose", "resultado": "92", "unidade": "mg/dL"}]
        })))
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn uploads_and_completes() {
        let gateway = Arc::new(MockStorageGateway::new());
        let (store, orchestrator) = orchestrator(gateway.clone(), completed());
        let (reporter, mut rx) = ProgressReporter::channel();

        let outcome = orchestrator
            .process(UploadFile::new("Hemograma Março.PDF", b"%PDF".to_vec()), &UploadOptions::default(), &reporter)
            .await
            .unwrap();

        let exam = match outcome {
            UploadOutcome::Completed(exam) => exam,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(exam.processing_status, ProcessingStatus::Completed);
        assert!(exam.storage_file_name.ends_with("-hemograma_marco.pdf"));
        assert_eq!(store.readings_for_exam(exam.id).await.unwrap().len(), 1);

        let requests = gateway.requests();
        assert_eq!(requests[0].user_id, UNASSIGNED_OWNER);
        assert_eq!(requests[0].content_type, "application/pdf");
        assert_eq!(gateway.transfers()[0].2, 4);

        let events = drain(&mut rx);
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(&percents[..4], &[10, 20, 30, 50]);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        let last = events.last().unwrap();
        assert_eq!(last.percent, 100);
        assert!(last.message.contains("1 biomarkers"));
    }

    #[tokio::test(start_paused = true)]
    async fn target_patient_is_the_owner() {
        let gateway = Arc::new(MockStorageGateway::new());
        let (_store, orchestrator) = orchestrator(gateway.clone(), completed());
        let patient = Uuid::new_v4();
        let options = UploadOptions {
            target_patient: Some(patient),
            ..Default::default()
        };

        let outcome = orchestrator
            .process(UploadFile::new("a.png", vec![0]), &options, &ProgressReporter::disabled())
            .await
            .unwrap();
        assert_eq!(outcome.exam().patient_id, Some(patient));
        assert_eq!(gateway.requests()[0].user_id, patient.to_string());
        assert_eq!(gateway.transfers()[0].1, "image/png");
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_failure_marks_error() {
        let gateway = Arc::new(MockStorageGateway::new().failing_for("broken"));
        let (store, orchestrator) = orchestrator(gateway, completed());

        let err = orchestrator
            .process(UploadFile::new("broken.pdf", vec![0]), &UploadOptions::default(), &ProgressReporter::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport(GatewayError::Connection(_))));

        let exams = store.list_exams().unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].processing_status, ProcessingStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn extraction_failure_marks_error() {
        let gateway = Arc::new(MockStorageGateway::new());
        let (store, orchestrator) =
            orchestrator(gateway, MockExtractionService::new().then(MockExtractionService::failed()));

        let err = orchestrator
            .process(UploadFile::new("a.pdf", vec![0]), &UploadOptions::default(), &ProgressReporter::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Watch(WatchError::ExtractionFailed { .. })));
        assert_eq!(store.list_exams().unwrap()[0].processing_status, ProcessingStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn soft_timeout_continues_in_background() {
        let gateway = Arc::new(MockStorageGateway::new());
        let (_store, orchestrator) = orchestrator(gateway, MockExtractionService::new());
        let (reporter, mut rx) = ProgressReporter::channel();

        let outcome = orchestrator
            .process(UploadFile::new("a.pdf", vec![0]), &UploadOptions::default(), &reporter)
            .await
            .unwrap();
        match outcome {
            UploadOutcome::Background(exam) => {
                assert_eq!(exam.processing_status, ProcessingStatus::Processing)
            }
            other => panic!("expected background, got {other:?}"),
        }
        let last = drain(&mut rx).pop().unwrap();
        assert_eq!(last.percent, 95);
        assert_eq!(last.message, "Processing in background");
    }
}
