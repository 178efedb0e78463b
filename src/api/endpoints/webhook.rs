//! `POST /webhooks/extraction`: completion notifications from the
//! extraction service.
//!
//! A `completed` notification runs the synchronizer, which persists the
//! readings and publishes the exam change that wakes any watcher. `failed`
//! marks the exam as errored.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ExtractionWebhook, WebhookAck};
use crate::models::{ExamRecord, JobStatus};

pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Constant-time check of the shared secret header.
fn secret_matches(expected: &str, headers: &HeaderMap) -> bool {
    let Some(given) = headers.get(SECRET_HEADER) else {
        return false;
    };
    expected.as_bytes().ct_eq(given.as_bytes()).unwrap_u8() == 1
}

pub async fn receive(
    State(ctx): State<ApiContext>,
    headers: HeaderMap,
    Json(payload): Json<ExtractionWebhook>,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    if let Some(expected) = &ctx.webhook_secret {
        if !secret_matches(expected, &headers) {
            return Err(ApiError::Unauthorized);
        }
    }

    let exam = resolve_exam(&ctx, &payload).await?;
    tracing::info!(exam_id = %exam.id, status = ?payload.status, "Extraction webhook received");

    let ack = match payload.status {
        JobStatus::Completed => {
            let data = payload
                .data
                .as_ref()
                .ok_or_else(|| ApiError::BadRequest("completed notification without data".into()))?;
            let outcome = ctx
                .synchronizer
                .sync_payload(exam.id, data, payload.processed_at)
                .await?;
            let current = ctx.store.get_exam(exam.id).await?.unwrap_or(exam);
            WebhookAck {
                exam_id: current.id,
                status: current.processing_status,
                sync: Some(outcome),
            }
        }
        JobStatus::Failed => {
            let record = ctx.synchronizer.fail(exam.id).await?;
            WebhookAck {
                exam_id: record.id,
                status: record.processing_status,
                sync: None,
            }
        }
        JobStatus::Processing => WebhookAck {
            exam_id: exam.id,
            status: exam.processing_status,
            sync: None,
        },
    };

    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn resolve_exam(ctx: &ApiContext, payload: &ExtractionWebhook) -> Result<ExamRecord, ApiError> {
    if let Some(id) = payload.exam_id {
        return ctx
            .store
            .get_exam(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("exam {id}")));
    }
    if let Some(key) = payload.storage_key.as_deref() {
        return ctx
            .store
            .find_exam_by_storage_key(key)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("exam for {key}")));
    }
    Err(ApiError::BadRequest("examId or s3Key is required".into()))
}
