//! HTTP client for the upload proxy, plus in-memory doubles for tests.
//!
//! One proxy URL serves both contracts:
//! - `POST {proxy}` with `{action: "getUploadUrl", userId, fileName, contentType}`
//!   returns a presigned target, then the bytes are `PUT` to `uploadUrl`
//! - `GET {proxy}?userId=&s3Key=` returns the extraction job status

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::error::GatewayError;
use super::traits::{ExtractionService, StorageGateway};
use super::types::{UploadRequest, UploadTarget};
use crate::models::{ExtractionResponse, JobStatus};

const API_KEY_HEADER: &str = "apikey";

pub struct HttpExtractionGateway {
    proxy_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct UploadTargetRequest<'a> {
    action: &'static str,
    #[serde(flatten)]
    request: &'a UploadRequest,
}

impl HttpExtractionGateway {
    pub fn new(proxy_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        Ok(Self {
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            timeout_secs,
        })
    }

    fn with_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    fn send_error(&self, target: &str, e: reqwest::Error) -> GatewayError {
        if e.is_connect() {
            GatewayError::Connection(target.to_string())
        } else if e.is_timeout() {
            GatewayError::Timeout(format!("{target} after {}s", self.timeout_secs))
        } else {
            GatewayError::Http(e.to_string())
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl StorageGateway for HttpExtractionGateway {
    async fn request_upload_target(&self, request: &UploadRequest) -> Result<UploadTarget, GatewayError> {
        let body = UploadTargetRequest {
            action: "getUploadUrl",
            request,
        };
        let response = self
            .with_key(self.client.post(&self.proxy_url).json(&body))
            .send()
            .await
            .map_err(|e| self.send_error(&self.proxy_url, e))?;

        Self::check(response)
            .await?
            .json::<UploadTarget>()
            .await
            .map_err(|e| GatewayError::ResponseParsing(e.to_string()))
    }

    async fn transfer(
        &self,
        target: &UploadTarget,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let size = bytes.len();
        let response = self
            .client
            .put(&target.upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| self.send_error("storage", e))?;
        Self::check(response).await?;
        tracing::debug!(storage_key = %target.storage_key, size, "File transferred");
        Ok(())
    }
}

#[async_trait]
impl ExtractionService for HttpExtractionGateway {
    async fn query_status(&self, user_id: &str, storage_key: &str) -> Result<ExtractionResponse, GatewayError> {
        let response = self
            .with_key(
                self.client
                    .get(&self.proxy_url)
                    .query(&[("userId", user_id), ("s3Key", storage_key)]),
            )
            .send()
            .await
            .map_err(|e| self.send_error(&self.proxy_url, e))?;

        Self::check(response)
            .await?
            .json::<ExtractionResponse>()
            .await
            .map_err(|e| GatewayError::ResponseParsing(e.to_string()))
    }
}

/// Storage gateway double: grants `uploads/<fileName>` targets and records
/// every request. Transfers of files listed in `fail_transfers` fail.
#[derive(Default)]
pub struct MockStorageGateway {
    fail_transfers: Vec<String>,
    requests: Mutex<Vec<UploadRequest>>,
    transfers: Mutex<Vec<(String, String, usize)>>,
}

impl MockStorageGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, file_name_fragment: &str) -> Self {
        self.fail_transfers.push(file_name_fragment.to_string());
        self
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// `(storage_key, content_type, size)` of each successful transfer.
    pub fn transfers(&self) -> Vec<(String, String, usize)> {
        self.transfers.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageGateway for MockStorageGateway {
    async fn request_upload_target(&self, request: &UploadRequest) -> Result<UploadTarget, GatewayError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(UploadTarget {
            upload_url: format!("mock://bucket/{}", request.file_name),
            storage_key: format!("uploads/{}", request.file_name),
            content_type: Some(request.content_type.clone()),
        })
    }

    async fn transfer(
        &self,
        target: &UploadTarget,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), GatewayError> {
        if self.fail_transfers.iter().any(|f| target.storage_key.contains(f.as_str())) {
            return Err(GatewayError::Connection("mock://bucket".into()));
        }
        if let Ok(mut transfers) = self.transfers.lock() {
            transfers.push((target.storage_key.clone(), content_type.to_string(), bytes.len()));
        }
        Ok(())
    }
}

/// Extraction service double answering from a script. Once the script is
/// exhausted the last answer repeats; an empty script answers `processing`.
#[derive(Default)]
pub struct MockExtractionService {
    script: Mutex<VecDeque<Result<ExtractionResponse, GatewayError>>>,
    last: Mutex<Option<ExtractionResponse>>,
    calls: Mutex<usize>,
}

impl MockExtractionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, response: ExtractionResponse) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(response));
        }
        self
    }

    pub fn then_error(self, error: GatewayError) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn processing() -> ExtractionResponse {
        ExtractionResponse {
            status: JobStatus::Processing,
            data: None,
            processed_at: None,
            storage_key: None,
        }
    }

    pub fn completed(data: serde_json::Value) -> ExtractionResponse {
        ExtractionResponse {
            status: JobStatus::Completed,
            data: Some(data),
            processed_at: Some(chrono::Utc::now()),
            storage_key: None,
        }
    }

    pub fn failed() -> ExtractionResponse {
        ExtractionResponse {
            status: JobStatus::Failed,
            ..Self::processing()
        }
    }
}

#[async_trait]
impl ExtractionService for MockExtractionService {
    async fn query_status(&self, _user_id: &str, storage_key: &str) -> Result<ExtractionResponse, GatewayError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(mut response)) => {
                response.storage_key = Some(storage_key.to_string());
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(response.clone());
                }
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self
                .last
                .lock()
                .ok()
                .and_then(|l| l.clone())
                .unwrap_or_else(Self::processing)),
        }
    }
}
