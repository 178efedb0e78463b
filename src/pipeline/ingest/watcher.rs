//! Waits for an exam's extraction job to reach a terminal state.
//!
//! Three paths race in one `tokio::select!`:
//! - push: exam change notifications from the store
//! - poll: extraction status queries, only during the initial window
//! - progress: periodic estimates, and the hard ceiling
//!
//! The first path to finish wins and the others are dropped with their
//! receivers and timers. When the poll path wins, the payload it carried is
//! synchronized after the race.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::error::WatchError;
use super::synchronizer::ResultSynchronizer;
use super::traits::{ExamStore, ExtractionService};
use super::types::{CompletionPath, ProgressReporter, WatchOutcome};
use crate::models::{ExamRecord, ExtractionPayload, ExtractionResponse, JobStatus, ProcessingStatus};

/// Highest estimate the progress path reports before a terminal state.
pub const PROGRESS_CAP: u8 = 98;

#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    /// Polling runs only while elapsed time is below this.
    pub poll_window: Duration,
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    /// Past this the watch ends as timed out.
    pub ceiling: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_window: Duration::from_secs(20),
            poll_interval: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(300),
        }
    }
}

/// Progress estimate and phase label for the time spent waiting.
pub fn estimate_progress(elapsed: Duration) -> (u8, &'static str) {
    let e = elapsed.as_secs_f64();
    let (percent, phase) = if e < 10.0 {
        (50.0 + e, "Extracting text")
    } else if e < 30.0 {
        (60.0 + (e - 10.0), "Analyzing")
    } else if e < 90.0 {
        (80.0 + (e - 30.0) / 60.0 * 12.0, "Organizing biomarkers")
    } else {
        (92.0 + (e - 90.0) / 210.0 * 6.0, "Finalizing")
    };
    (percent.floor().min(f64::from(PROGRESS_CAP)) as u8, phase)
}

/// Which path ended the race.
enum Race {
    Pushed(ExamRecord),
    PushFailed,
    Polled(ExtractionResponse),
    PollFailed,
    Ceiling(Duration),
}

pub struct CompletionWatcher {
    store: Arc<dyn ExamStore>,
    extraction: Arc<dyn ExtractionService>,
    synchronizer: Arc<ResultSynchronizer>,
    config: WatchConfig,
}

impl CompletionWatcher {
    pub fn new(
        store: Arc<dyn ExamStore>,
        extraction: Arc<dyn ExtractionService>,
        synchronizer: Arc<ResultSynchronizer>,
        config: WatchConfig,
    ) -> Self {
        Self {
            store,
            extraction,
            synchronizer,
            config,
        }
    }

    /// Resolve once `exam` completes, fails, or the ceiling passes.
    ///
    /// `user_id` is the owner identity the storage key was issued for.
    pub async fn watch(
        &self,
        exam: &ExamRecord,
        user_id: &str,
        progress: &ProgressReporter,
    ) -> Result<WatchOutcome, WatchError> {
        // Subscribe first so an update landing before the first poll is kept.
        let changes = self.store.subscribe();

        if let Some(current) = self.store.get_exam(exam.id).await? {
            match current.processing_status {
                ProcessingStatus::Completed => return Ok(pushed(&current)),
                ProcessingStatus::Error => {
                    return Err(WatchError::ExtractionFailed {
                        via: CompletionPath::Push,
                    })
                }
                _ => {}
            }
        }

        let started = Instant::now();
        tracing::info!(exam_id = %exam.id, "Watching extraction");

        let race = tokio::select! {
            r = self.push_path(exam.id, changes) => r,
            r = self.poll_path(exam.id, &exam.storage_key, user_id, started) => r,
            r = self.progress_path(started, progress) => r,
        };

        match race {
            Race::Pushed(record) => {
                tracing::info!(exam_id = %exam.id, elapsed_secs = started.elapsed().as_secs(), "Completed via push");
                Ok(pushed(&record))
            }
            Race::PushFailed => Err(WatchError::ExtractionFailed {
                via: CompletionPath::Push,
            }),
            Race::Polled(response) => {
                tracing::info!(exam_id = %exam.id, elapsed_secs = started.elapsed().as_secs(), "Completed via poll");
                let outcome = self.synchronizer.sync(exam.id, &response).await?;
                tracing::debug!(exam_id = %exam.id, ?outcome, "Poll payload synchronized");
                let biomarkers = response
                    .data
                    .as_ref()
                    .and_then(|d| ExtractionPayload::from_value(d).ok())
                    .map(|p| p.biomarker_count())
                    .unwrap_or(0);
                Ok(WatchOutcome::Resolved {
                    via: CompletionPath::Poll,
                    biomarkers,
                    response: Some(response),
                })
            }
            Race::PollFailed => Err(WatchError::ExtractionFailed {
                via: CompletionPath::Poll,
            }),
            Race::Ceiling(elapsed) => {
                tracing::warn!(exam_id = %exam.id, elapsed_secs = elapsed.as_secs(), "Extraction still running at ceiling");
                Ok(WatchOutcome::TimedOut { elapsed })
            }
        }
    }

    async fn push_path(&self, exam_id: Uuid, mut changes: broadcast::Receiver<ExamRecord>) -> Race {
        loop {
            let record = match changes.recv().await {
                Ok(record) if record.id == exam_id => record,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(exam_id = %exam_id, skipped, "Notifications lagged, re-reading exam");
                    match self.store.get_exam(exam_id).await {
                        Ok(Some(record)) => record,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(exam_id = %exam_id, error = %e, "Exam re-read failed");
                            continue;
                        }
                    }
                }
                // Without notifications only polling and the ceiling remain.
                Err(RecvError::Closed) => return std::future::pending().await,
            };
            match record.processing_status {
                ProcessingStatus::Completed => return Race::Pushed(record),
                ProcessingStatus::Error => return Race::PushFailed,
                _ => {}
            }
        }
    }

    async fn poll_path(&self, exam_id: Uuid, storage_key: &str, user_id: &str, started: Instant) -> Race {
        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            ticker.tick().await;
            if started.elapsed() >= self.config.poll_window {
                tracing::debug!(exam_id = %exam_id, attempts, "Poll window over, relying on push");
                return std::future::pending().await;
            }

            attempts += 1;
            match self.extraction.query_status(user_id, storage_key).await {
                Ok(response) => match response.status {
                    JobStatus::Completed if response.data.is_some() => return Race::Polled(response),
                    JobStatus::Completed => {
                        tracing::warn!(exam_id = %exam_id, "Completed status without payload, polling on")
                    }
                    JobStatus::Failed => return Race::PollFailed,
                    JobStatus::Processing => {
                        tracing::debug!(exam_id = %exam_id, attempts, "Extraction still processing")
                    }
                },
                Err(e) => tracing::warn!(exam_id = %exam_id, attempts, error = %e, "Status query failed"),
            }
        }
    }

    async fn progress_path(&self, started: Instant, progress: &ProgressReporter) -> Race {
        let mut ticker = time::interval(self.config.tick_interval);
        ticker.tick().await;
        let mut last = 0u8;

        loop {
            ticker.tick().await;
            let elapsed = started.elapsed();
            if elapsed >= self.config.ceiling {
                return Race::Ceiling(elapsed);
            }
            let (percent, phase) = estimate_progress(elapsed);
            last = last.max(percent);
            progress.report(last, phase);
        }
    }
}

fn pushed(record: &ExamRecord) -> WatchOutcome {
    WatchOutcome::Resolved {
        via: CompletionPath::Push,
        biomarkers: record.total_biomarkers.unwrap_or(0),
        response: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionMetadata, NewExam};
    use crate::pipeline::ingest::gateway::MockExtractionService;
    use crate::pipeline::ingest::store::SqliteExamStore;
    use crate::pipeline::ingest::sync_lock::SyncLockRegistry;
    use serde_json::json;

    struct Fixture {
        store: SqliteExamStore,
        extraction: Arc<MockExtractionService>,
        watcher: CompletionWatcher,
        exam: ExamRecord,
    }

    async fn fixture(extraction: MockExtractionService) -> Fixture {
        let store = SqliteExamStore::open_in_memory().unwrap();
        let exam = store
            .create_exam(NewExam {
                storage_key: "uploads/exame.pdf".into(),
                storage_file_name: "exame.pdf".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store.set_status(exam.id, ProcessingStatus::Processing).await.unwrap();

        let extraction = Arc::new(extraction);
        let shared: Arc<dyn ExamStore> = Arc::new(store.clone());
        let synchronizer = Arc::new(ResultSynchronizer::new(shared.clone(), Arc::new(SyncLockRegistry::new())));
        let watcher = CompletionWatcher::new(shared, extraction.clone(), synchronizer, WatchConfig::default());
        Fixture {
            store,
            extraction,
            watcher,
            exam,
        }
    }

    fn payload() -> serde_json::Value {
        json!({
            "metadata": {"total_exames": 2},
            "exames": [
                {"nome": "Hemoglobina", "resultado": "14.2", "unidade": "g/dL"},
                {"nome": "Glicose", "resultado": "92", "unidade": "mg/dL"}
            ]
        })
    }

    fn metadata(total: u32) -> ExtractionMetadata {
        ExtractionMetadata {
            laboratory: None,
            patient_name: None,
            total_biomarkers: total,
            exam_date: None,
            processed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn progress_phases() {
        assert_eq!(estimate_progress(Duration::ZERO), (50, "Extracting text"));
        assert_eq!(estimate_progress(Duration::from_secs(9)), (59, "Extracting text"));
        assert_eq!(estimate_progress(Duration::from_secs(10)), (60, "Analyzing"));
        assert_eq!(estimate_progress(Duration::from_secs(30)), (80, "Organizing biomarkers"));
        assert_eq!(estimate_progress(Duration::from_secs(60)), (86, "Organizing biomarkers"));
        assert_eq!(estimate_progress(Duration::from_secs(90)), (92, "Finalizing"));
        assert_eq!(estimate_progress(Duration::from_secs(300)), (98, "Finalizing"));
        assert_eq!(estimate_progress(Duration::from_secs(10_000)).0, PROGRESS_CAP);
    }

    #[test]
    fn progress_is_monotone() {
        let mut last = 0;
        for s in 0..400 {
            let (p, _) = estimate_progress(Duration::from_millis(s * 750));
            assert!(p >= last, "regressed at {s}");
            last = p;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn push_resolves_and_tears_down() {
        let f = fixture(MockExtractionService::new()).await;
        let store = f.store.clone();
        let exam_id = f.exam.id;
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(40)).await;
            store.complete_exam(exam_id, metadata(7), json!({})).await.unwrap();
        });

        let outcome = f.watcher.watch(&f.exam, "pending", &ProgressReporter::disabled()).await.unwrap();
        assert_eq!(
            outcome,
            WatchOutcome::Resolved {
                via: CompletionPath::Push,
                biomarkers: 7,
                response: None
            }
        );
        assert_eq!(f.store.subscriber_count(), 0);

        // Polls at 0, 5, 10 and 15 seconds only.
        assert_eq!(f.extraction.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_resolves_and_synchronizes() {
        let extraction = MockExtractionService::new()
            .then(MockExtractionService::processing())
            .then(MockExtractionService::completed(payload()));
        let f = fixture(extraction).await;

        let outcome = f.watcher.watch(&f.exam, "pending", &ProgressReporter::disabled()).await.unwrap();
        match outcome {
            WatchOutcome::Resolved { via, biomarkers, response } => {
                assert_eq!(via, CompletionPath::Poll);
                assert_eq!(biomarkers, 2);
                assert!(response.is_some());
            }
            other => panic!("expected poll resolution, got {other:?}"),
        }

        let record = f.store.get_exam(f.exam.id).await.unwrap().unwrap();
        assert_eq!(record.processing_status, ProcessingStatus::Completed);
        assert_eq!(f.store.readings_for_exam(f.exam.id).await.unwrap().len(), 2);
        assert_eq!(f.store.subscriber_count(), 0);
        assert_eq!(f.extraction.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failure_rejects() {
        let f = fixture(MockExtractionService::new().then(MockExtractionService::failed())).await;
        let err = f.watcher.watch(&f.exam, "pending", &ProgressReporter::disabled()).await.unwrap_err();
        assert!(matches!(err, WatchError::ExtractionFailed { via: CompletionPath::Poll }));
    }

    #[tokio::test(start_paused = true)]
    async fn push_failure_rejects() {
        let f = fixture(MockExtractionService::new()).await;
        let store = f.store.clone();
        let exam_id = f.exam.id;
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(3)).await;
            store.set_status(exam_id, ProcessingStatus::Error).await.unwrap();
        });

        let err = f.watcher.watch(&f.exam, "pending", &ProgressReporter::disabled()).await.unwrap_err();
        assert!(matches!(err, WatchError::ExtractionFailed { via: CompletionPath::Push }));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_query_errors_keep_polling() {
        let extraction = MockExtractionService::new()
            .then_error(crate::pipeline::ingest::error::GatewayError::Timeout("proxy".into()))
            .then(MockExtractionService::completed(payload()));
        let f = fixture(extraction).await;

        let outcome = f.watcher.watch(&f.exam, "pending", &ProgressReporter::disabled()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Resolved { via: CompletionPath::Poll, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_times_out_without_error() {
        let f = fixture(MockExtractionService::new()).await;
        let (reporter, mut rx) = ProgressReporter::channel();

        let outcome = f.watcher.watch(&f.exam, "pending", &reporter).await.unwrap();
        match outcome {
            WatchOutcome::TimedOut { elapsed } => assert!(elapsed >= Duration::from_secs(300)),
            other => panic!("expected timeout, got {other:?}"),
        }

        let record = f.store.get_exam(f.exam.id).await.unwrap().unwrap();
        assert_eq!(record.processing_status, ProcessingStatus::Processing);
        assert_eq!(f.extraction.calls(), 4);

        let mut last = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(event.percent >= last);
            assert!(event.percent <= PROGRESS_CAP);
            last = event.percent;
        }
        assert!(last >= 97, "last estimate {last}");
    }

    #[tokio::test(start_paused = true)]
    async fn already_completed_resolves_immediately() {
        let f = fixture(MockExtractionService::new()).await;
        f.store.complete_exam(f.exam.id, metadata(3), json!({})).await.unwrap();

        let outcome = f.watcher.watch(&f.exam, "pending", &ProgressReporter::disabled()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Resolved { biomarkers: 3, .. }));
        assert_eq!(f.extraction.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_push_and_poll_resolve_once() {
        let extraction = MockExtractionService::new().then(MockExtractionService::completed(payload()));
        let f = fixture(extraction).await;
        // The push lands while the first poll is also answering completed.
        let store = f.store.clone();
        let exam_id = f.exam.id;
        tokio::spawn(async move {
            store.complete_exam(exam_id, metadata(2), payload()).await.unwrap();
        });

        let outcome = f.watcher.watch(&f.exam, "pending", &ProgressReporter::disabled()).await.unwrap();
        assert!(matches!(outcome, WatchOutcome::Resolved { biomarkers: 2, .. }));
        assert_eq!(f.store.subscriber_count(), 0);

        let polls = f.extraction.calls();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.extraction.calls(), polls);
    }
}
