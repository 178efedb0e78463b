//! Webhook router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.

use axum::routing::{get, post};
use axum::Router;

use crate::api::endpoints;
use crate::api::types::ApiContext;

pub fn webhook_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/webhooks/extraction", post(endpoints::webhook::receive))
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::models::{NewExam, ProcessingStatus};
    use crate::pipeline::ingest::{ExamStore, ResultSynchronizer, SqliteExamStore, SyncLockRegistry};

    async fn setup() -> (SqliteExamStore, ApiContext, uuid::Uuid) {
        let store = SqliteExamStore::open_in_memory().unwrap();
        let exam = store
            .create_exam(NewExam {
                storage_key: "uploads/pending/exame.pdf".into(),
                storage_file_name: "exame.pdf".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store.set_status(exam.id, ProcessingStatus::Processing).await.unwrap();

        let shared: Arc<dyn ExamStore> = Arc::new(store.clone());
        let synchronizer = Arc::new(ResultSynchronizer::new(shared.clone(), Arc::new(SyncLockRegistry::new())));
        (store, ApiContext::new(shared, synchronizer), exam.id)
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhooks/extraction")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn payload() -> Value {
        json!({
            "dados_basicos": {"paciente": "Maria Souza"},
            "metadata": {"total_exames": 1},
            "exames": [{"nome": "Glicose", "resultado": "92", "unidade": "mg/dL"}]
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_store, ctx, _) = setup().await;
        let response = webhook_router(ctx)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn completed_commits_and_notifies() {
        let (store, ctx, exam_id) = setup().await;
        let mut changes = store.subscribe();

        let response = webhook_router(ctx)
            .oneshot(post_json(json!({
                "examId": exam_id,
                "s3Key": "uploads/pending/exame.pdf",
                "status": "completed",
                "data": payload(),
                "processedAt": "2024-03-01T10:00:00Z"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let ack = read_json(response).await;
        assert_eq!(ack["status"], "completed");
        assert_eq!(ack["sync"]["outcome"], "committed");

        let pushed = changes.recv().await.unwrap();
        assert_eq!(pushed.id, exam_id);
        assert_eq!(pushed.processing_status, ProcessingStatus::Completed);
        assert_eq!(store.readings_for_exam(exam_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_key_identifies_the_exam() {
        let (store, ctx, exam_id) = setup().await;
        let response = webhook_router(ctx)
            .oneshot(post_json(json!({
                "s3Key": "uploads/pending/exame.pdf",
                "status": "failed"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(read_json(response).await["status"], "error");

        let exam = store.get_exam(exam_id).await.unwrap().unwrap();
        assert_eq!(exam.processing_status, ProcessingStatus::Error);
    }

    #[tokio::test]
    async fn unknown_exam_is_404() {
        let (_store, ctx, _) = setup().await;
        let response = webhook_router(ctx)
            .oneshot(post_json(json!({"examId": uuid::Uuid::new_v4(), "status": "failed"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(read_json(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn completed_without_data_is_400() {
        let (_store, ctx, exam_id) = setup().await;
        let response = webhook_router(ctx)
            .oneshot(post_json(json!({"examId": exam_id, "status": "completed"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn secret_is_enforced_when_configured() {
        let (_store, ctx, exam_id) = setup().await;
        let app = webhook_router(ctx.with_secret("s3cret"));

        let denied = app
            .clone()
            .oneshot(post_json(json!({"examId": exam_id, "status": "processing"})))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let mut request = post_json(json!({"examId": exam_id, "status": "processing"}));
        request
            .headers_mut()
            .insert(endpoints::webhook::SECRET_HEADER, "s3cret".parse().unwrap());
        let allowed = app.oneshot(request).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::ACCEPTED);
        assert_eq!(read_json(allowed).await["status"], "processing");
    }
}
