//! Shared state and wire types for the webhook API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{JobStatus, ProcessingStatus};
use crate::pipeline::ingest::{ExamStore, ResultSynchronizer, SyncOutcome};

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<dyn ExamStore>,
    pub synchronizer: Arc<ResultSynchronizer>,
    /// Expected `x-webhook-secret` header value; `None` accepts any caller.
    pub webhook_secret: Option<Arc<str>>,
}

impl ApiContext {
    pub fn new(store: Arc<dyn ExamStore>, synchronizer: Arc<ResultSynchronizer>) -> Self {
        Self {
            store,
            synchronizer,
            webhook_secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<Arc<str>>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}

/// Completion notification from the extraction service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionWebhook {
    #[serde(default)]
    pub exam_id: Option<Uuid>,
    #[serde(rename = "s3Key", default)]
    pub storage_key: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub exam_id: Uuid,
    pub status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
}
