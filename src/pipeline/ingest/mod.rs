//! Lab report ingestion
//!
//! Takes a scanned exam from upload to a canonical, deduplicated set of
//! biomarker readings.
//!
//! ```text
//! BatchProcessor → UploadOrchestrator → storage transfer → extraction (remote)
//!                                     → CompletionWatcher (push | poll)
//!                                     → ResultSynchronizer → ExamStore
//! ```
//!
//! The synchronizer is pure over its inputs apart from the store: dedup,
//! normalization, rescaling and derivation are plain functions.

pub mod error;
pub mod types;
pub mod traits;
pub mod text;
pub mod catalog;
pub mod normalize;
pub mod dedup;
pub mod derive;
pub mod filename;
pub mod matching;
pub mod sync_lock;
pub mod store;
pub mod gateway;
pub mod synchronizer;
pub mod watcher;
pub mod orchestrator;
pub mod batch;

pub use error::{BatchError, GatewayError, SyncError, UploadError, WatchError};
pub use types::*;
pub use traits::*;
pub use derive::DerivationWarning;
pub use store::SqliteExamStore;
pub use gateway::{HttpExtractionGateway, MockExtractionService, MockStorageGateway};
pub use sync_lock::{SyncLease, SyncLockRegistry};
pub use synchronizer::ResultSynchronizer;
pub use watcher::{estimate_progress, CompletionWatcher, WatchConfig};
pub use orchestrator::UploadOrchestrator;
pub use batch::{BatchEvent, BatchProcessor, BatchSummary};
