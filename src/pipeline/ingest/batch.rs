//! Sequential multi-file ingestion with per-item failure isolation.
//!
//! Each file runs through the upload orchestrator in submission order. A
//! failed item is recorded and the batch moves on. Exams uploaded without a
//! target patient are matched by the extracted patient name afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::error::BatchError;
use super::matching::{decide, MatchDecision};
use super::orchestrator::UploadOrchestrator;
use super::traits::PatientMatcher;
use super::types::{ProgressEvent, ProgressReporter, UploadFile, UploadOptions, UploadOutcome};
use crate::models::{ExamRecord, MatchRequest, MatchingKind, QueueItem, QueueStatus};

/// Events emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Queued { items: Vec<QueueItem> },
    ItemUpdated { item: QueueItem },
    /// The caller must pick a patient through `confirm_match`.
    MatchRequired { item_id: Uuid, request: MatchRequest },
    Finished { summary: BatchSummary },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub background: usize,
    pub awaiting_match: usize,
}

impl BatchSummary {
    fn from_items(items: &[QueueItem]) -> Self {
        let mut summary = Self {
            total: items.len(),
            ..Self::default()
        };
        for item in items {
            if item.pending_match.is_some() {
                summary.awaiting_match += 1;
            } else if item.background {
                summary.background += 1;
            } else {
                match item.status {
                    QueueStatus::Completed => summary.completed += 1,
                    QueueStatus::Error => summary.failed += 1,
                    _ => {}
                }
            }
        }
        summary
    }
}

pub struct BatchProcessor {
    orchestrator: Arc<UploadOrchestrator>,
    matcher: Arc<dyn PatientMatcher>,
    events: Option<mpsc::UnboundedSender<BatchEvent>>,
    /// Items waiting for a manual patient choice, by exam id.
    awaiting: Mutex<HashMap<Uuid, QueueItem>>,
}

impl BatchProcessor {
    pub fn new(orchestrator: Arc<UploadOrchestrator>, matcher: Arc<dyn PatientMatcher>) -> Self {
        Self {
            orchestrator,
            matcher,
            events: None,
            awaiting: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Process `files` one after the other and return every item in its
    /// final state. Items awaiting a patient choice are returned with
    /// `pending_match` set.
    pub async fn run(&self, files: Vec<UploadFile>, options: &UploadOptions) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = files.iter().map(|f| QueueItem::new(f.file_name.clone())).collect();
        self.emit(BatchEvent::Queued { items: items.clone() });
        tracing::info!(files = items.len(), "Batch started");

        for (index, file) in files.into_iter().enumerate() {
            let item = &mut items[index];
            self.process_item(item, file, options).await;
            self.emit(BatchEvent::ItemUpdated { item: item.clone() });
        }

        let summary = BatchSummary::from_items(&items);
        tracing::info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            background = summary.background,
            awaiting_match = summary.awaiting_match,
            "Batch finished"
        );
        self.emit(BatchEvent::Finished { summary });
        items
    }

    async fn process_item(&self, item: &mut QueueItem, file: UploadFile, options: &UploadOptions) {
        item.status = QueueStatus::Uploading;
        let (reporter, mut rx) = ProgressReporter::channel();

        let work = self.orchestrator.process(file, options, &reporter);
        tokio::pin!(work);
        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                Some(event) = rx.recv() => self.track(item, event),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.track(item, event);
        }

        match result {
            Ok(UploadOutcome::Completed(exam)) => {
                item.exam_id = Some(exam.id);
                item.patient_id = exam.patient_id;
                if options.target_patient.is_some() {
                    item.status = QueueStatus::Completed;
                } else {
                    self.match_patient(item, &exam, options.uploaded_by.as_deref()).await;
                }
            }
            Ok(UploadOutcome::Background(exam)) => {
                item.exam_id = Some(exam.id);
                item.status = QueueStatus::Processing;
                item.background = true;
                item.message = "Still processing".into();
            }
            Err(e) => {
                tracing::warn!(file_name = %item.file_name, error = %e, "Batch item failed");
                item.fail(e.to_string());
            }
        }
    }

    fn track(&self, item: &mut QueueItem, event: ProgressEvent) {
        item.status = if event.percent < 50 {
            QueueStatus::Uploading
        } else {
            QueueStatus::Processing
        };
        item.progress = event.percent;
        item.message = event.message;
        self.emit(BatchEvent::ItemUpdated { item: item.clone() });
    }

    async fn match_patient(&self, item: &mut QueueItem, exam: &ExamRecord, owner: Option<&str>) {
        let Some(name) = exam
            .patient_name_extracted
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        else {
            item.fail("No patient name found in the exam");
            return;
        };

        match self.resolve_patient(exam, name, owner).await {
            Ok(Resolution::Assigned(record)) => {
                item.patient_id = record.patient_id;
                item.status = QueueStatus::Completed;
            }
            Ok(Resolution::NeedsChoice(request)) => {
                item.message = "Waiting for patient confirmation".into();
                item.pending_match = Some(request.clone());
                if let Ok(mut awaiting) = self.awaiting.lock() {
                    awaiting.insert(exam.id, item.clone());
                }
                self.emit(BatchEvent::MatchRequired {
                    item_id: item.id,
                    request,
                });
            }
            Err(e) => item.fail(e.to_string()),
        }
    }

    async fn resolve_patient(
        &self,
        exam: &ExamRecord,
        name: &str,
        owner: Option<&str>,
    ) -> Result<Resolution, BatchError> {
        let store = self.orchestrator.store();
        let ranked = self.matcher.candidates(name, owner).await?;
        let record = match decide(ranked) {
            MatchDecision::Exact(candidate) => {
                tracing::info!(exam_id = %exam.id, patient_id = %candidate.patient_id, "Patient matched");
                store
                    .assign_patient(exam.id, candidate.patient_id, MatchingKind::AutoExact)
                    .await?
            }
            MatchDecision::CreateNew => {
                let patient = self.matcher.create_patient(name, owner).await?;
                store
                    .assign_patient(exam.id, patient.id, MatchingKind::AutoCreated)
                    .await?
            }
            MatchDecision::Ambiguous(candidates) => {
                tracing::info!(exam_id = %exam.id, candidates = candidates.len(), "Patient match needs confirmation");
                return Ok(Resolution::NeedsChoice(MatchRequest {
                    exam_id: exam.id,
                    extracted_name: name.to_string(),
                    candidates,
                }));
            }
        };
        Ok(Resolution::Assigned(record))
    }

    /// Exams whose items wait for `confirm_match`.
    pub fn awaiting_match(&self) -> Vec<Uuid> {
        self.awaiting
            .lock()
            .map(|a| a.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Assign the patient chosen for an ambiguous match and finish its item.
    pub async fn confirm_match(&self, exam_id: Uuid, patient_id: Uuid) -> Result<QueueItem, BatchError> {
        let mut item = self
            .awaiting
            .lock()
            .ok()
            .and_then(|mut a| a.remove(&exam_id))
            .ok_or(BatchError::NotAwaitingMatch(exam_id))?;

        let record = match self
            .orchestrator
            .store()
            .assign_patient(exam_id, patient_id, MatchingKind::Manual)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                // Keep the item waiting so the choice can be retried.
                if let Ok(mut awaiting) = self.awaiting.lock() {
                    awaiting.insert(exam_id, item);
                }
                return Err(e.into());
            }
        };

        item.patient_id = record.patient_id;
        item.pending_match = None;
        item.status = QueueStatus::Completed;
        item.progress = 100;
        item.message = "Completed".into();
        tracing::info!(exam_id = %exam_id, patient_id = %patient_id, "Patient match confirmed");
        self.emit(BatchEvent::ItemUpdated { item: item.clone() });
        Ok(item)
    }
}

enum Resolution {
    Assigned(ExamRecord),
    NeedsChoice(MatchRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingest::gateway::{MockExtractionService, MockStorageGateway};
    use crate::pipeline::ingest::store::SqliteExamStore;
    use crate::pipeline::ingest::sync_lock::SyncLockRegistry;
    use crate::pipeline::ingest::synchronizer::ResultSynchronizer;
    use crate::pipeline::ingest::traits::ExamStore;
    use crate::pipeline::ingest::watcher::WatchConfig;
    use serde_json::json;

    fn extraction_for(patient: &str) -> MockExtractionService {
        MockExtractionService::new().then(MockExtractionService::completed(json!({
            "dados_basicos": {"paciente": patient},
            "exames": [{"nome": "Glicose", "resultado": "92", "unidade": "mg/dL"}]
        })))
    }

    fn processor(
        gateway: MockStorageGateway,
        extraction: MockExtractionService,
    ) -> (SqliteExamStore, BatchProcessor, mpsc::UnboundedReceiver<BatchEvent>) {
        let store = SqliteExamStore::open_in_memory().unwrap();
        let shared: Arc<dyn ExamStore> = Arc::new(store.clone());
        let synchronizer = Arc::new(ResultSynchronizer::new(shared.clone(), Arc::new(SyncLockRegistry::new())));
        let orchestrator = Arc::new(UploadOrchestrator::new(
            Arc::new(gateway),
            Arc::new(extraction),
            shared,
            synchronizer,
            WatchConfig::default(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let batch = BatchProcessor::new(orchestrator, Arc::new(store.clone())).with_events(tx);
        (store, batch, rx)
    }

    fn files(names: &[&str]) -> Vec<UploadFile> {
        names.iter().map(|n| UploadFile::new(*n, vec![1, 2, 3])).collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BatchEvent>) -> Vec<BatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_isolated_and_batch_finishes() {
        let (_store, batch, mut rx) = processor(
            MockStorageGateway::new().failing_for("second"),
            extraction_for("Maria Souza"),
        );
        let options = UploadOptions {
            target_patient: Some(Uuid::new_v4()),
            ..Default::default()
        };

        let items = batch.run(files(&["first.pdf", "second.pdf", "third.pdf"]), &options).await;
        let statuses: Vec<QueueStatus> = items.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![QueueStatus::Completed, QueueStatus::Error, QueueStatus::Completed]
        );
        assert!(items.iter().all(QueueItem::is_terminal));
        assert!(items[1].error.as_deref().unwrap_or("").contains("transfer"));

        let events = drain(&mut rx);
        assert!(matches!(&events[0], BatchEvent::Queued { items } if items.len() == 3));
        match events.last() {
            Some(BatchEvent::Finished { summary }) => {
                assert_eq!(summary.completed, 2);
                assert_eq!(summary.failed, 1);
            }
            other => panic!("expected finish event, got {other:?}"),
        }
        let third_done = events.iter().position(|e| {
            matches!(e, BatchEvent::ItemUpdated { item } if item.file_name == "third.pdf" && item.status == QueueStatus::Completed)
        });
        assert!(third_done.is_some_and(|p| p < events.len() - 1));
    }

    #[tokio::test(start_paused = true)]
    async fn exact_name_match_assigns_existing_patient() {
        let (store, batch, _rx) = processor(MockStorageGateway::new(), extraction_for("MARIA SOUZA"));
        let maria = store.create_patient("Maria Souza", None).await.unwrap();

        let items = batch.run(files(&["a.pdf"]), &UploadOptions::default()).await;
        assert_eq!(items[0].status, QueueStatus::Completed);
        assert_eq!(items[0].patient_id, Some(maria.id));

        let exam = store.get_exam(items[0].exam_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(exam.matching_kind, Some(MatchingKind::AutoExact));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_name_creates_patient() {
        let (store, batch, _rx) = processor(MockStorageGateway::new(), extraction_for("João Pereira"));
        store.create_patient("Maria Souza", None).await.unwrap();

        let items = batch.run(files(&["a.pdf"]), &UploadOptions::default()).await;
        assert_eq!(items[0].status, QueueStatus::Completed);

        let patients = store.list_patients(None).unwrap();
        assert_eq!(patients.len(), 2);
        let created = patients.iter().find(|p| p.full_name == "João Pereira").unwrap();
        assert_eq!(items[0].patient_id, Some(created.id));
        let exam = store.get_exam(items[0].exam_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(exam.matching_kind, Some(MatchingKind::AutoCreated));
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_name_waits_for_confirmation() {
        let (store, batch, mut rx) = processor(MockStorageGateway::new(), extraction_for("Maria Souza"));
        let sousa = store.create_patient("Maria Sousa", None).await.unwrap();
        store.create_patient("Mario Souza", None).await.unwrap();

        let items = batch.run(files(&["a.pdf"]), &UploadOptions::default()).await;
        let item = &items[0];
        assert!(!item.is_terminal());
        let request = item.pending_match.as_ref().unwrap();
        assert_eq!(request.candidates.len(), 2);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, BatchEvent::MatchRequired { item_id, .. } if *item_id == item.id)));
        match events.last() {
            Some(BatchEvent::Finished { summary }) => assert_eq!(summary.awaiting_match, 1),
            other => panic!("expected finish event, got {other:?}"),
        }

        let exam_id = item.exam_id.unwrap();
        assert_eq!(batch.awaiting_match(), vec![exam_id]);
        let done = batch.confirm_match(exam_id, sousa.id).await.unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert_eq!(done.patient_id, Some(sousa.id));
        assert!(batch.awaiting_match().is_empty());

        let exam = store.get_exam(exam_id).await.unwrap().unwrap();
        assert_eq!(exam.matching_kind, Some(MatchingKind::Manual));
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_without_pending_match_fails() {
        let (_store, batch, _rx) = processor(MockStorageGateway::new(), extraction_for("Maria"));
        let err = batch.confirm_match(Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BatchError::NotAwaitingMatch(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_extracted_name_is_item_error() {
        let extraction = MockExtractionService::new().then(MockExtractionService::completed(json!({
            "exames": [{"nome": "Glicose", "resultado": "92"}]
        })));
        let (_store, batch, _rx) = processor(MockStorageGateway::new(), extraction);

        let items = batch.run(files(&["a.pdf"]), &UploadOptions::default()).await;
        assert_eq!(items[0].status, QueueStatus::Error);
        assert!(items[0].exam_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn soft_timeout_is_background_not_error() {
        let (_store, batch, mut rx) = processor(MockStorageGateway::new(), MockExtractionService::new());

        let items = batch.run(files(&["slow.pdf"]), &UploadOptions::default()).await;
        assert!(items[0].background);
        assert_eq!(items[0].status, QueueStatus::Processing);
        assert!(items[0].error.is_none());

        match drain(&mut rx).last() {
            Some(BatchEvent::Finished { summary }) => {
                assert_eq!(summary.background, 1);
                assert_eq!(summary.failed, 0);
            }
            other => panic!("expected finish event, got {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(BatchEvent::Finished {
            summary: BatchSummary::default(),
        })
        .unwrap();
        assert_eq!(json["type"], "finished");
    }
}
