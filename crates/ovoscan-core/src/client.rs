//! HTTP client for the detection service
//!
//! Implements the polling contract: upload once, poll `/status` at a fixed
//! interval up to a bounded number of attempts, then fetch `/result` exactly
//! once when the session is complete.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::service::{ResultReport, StatusReport};
use crate::session::{Phase, SessionId};
use crate::upload::ImageUpload;

/// Bounded polling schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two status polls
    pub interval: Duration,
    /// Number of status polls before giving up
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 120,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    session_id: SessionId,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    status: Option<String>,
}

/// Client for a running detection server
#[derive(Debug, Clone)]
pub struct DetectionClient {
    http: reqwest::Client,
    base_url: String,
}

impl DetectionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Upload a batch; returns the new session id
    pub async fn upload(&self, files: Vec<ImageUpload>) -> Result<SessionId> {
        let form = files.into_iter().fold(Form::new(), |form, file| {
            form.part(
                "files",
                Part::bytes(file.data.to_vec()).file_name(file.filename),
            )
        });

        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = Self::decode(response, "").await?;
        debug!(session_id = %body.session_id, "Batch uploaded");
        Ok(body.session_id)
    }

    /// Read files from disk and upload them under their file names
    pub async fn upload_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Result<SessionId> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let data = tokio::fs::read(path).await?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            files.push(ImageUpload::new(filename, data));
        }
        self.upload(files).await
    }

    pub async fn status(&self, session_id: &str) -> Result<StatusReport> {
        let response = self
            .http
            .get(format!("{}/status/{}", self.base_url, session_id))
            .send()
            .await?;
        Self::decode(response, session_id).await
    }

    pub async fn result(&self, session_id: &str) -> Result<ResultReport> {
        let response = self
            .http
            .get(format!("{}/result/{}", self.base_url, session_id))
            .send()
            .await?;
        Self::decode(response, session_id).await
    }

    /// Poll until the session finishes, then fetch its results once
    pub async fn wait_for_result(
        &self,
        session_id: &str,
        policy: PollPolicy,
    ) -> Result<ResultReport> {
        self.wait_for_result_with(session_id, policy, |_| {}).await
    }

    /// Like [`wait_for_result`](Self::wait_for_result), reporting every poll
    /// to `on_status`
    pub async fn wait_for_result_with<F>(
        &self,
        session_id: &str,
        policy: PollPolicy,
        mut on_status: F,
    ) -> Result<ResultReport>
    where
        F: FnMut(&StatusReport),
    {
        for attempt in 1..=policy.max_attempts {
            let status = self.status(session_id).await?;
            on_status(&status);

            match status.status {
                Phase::Complete => return self.result(session_id).await,
                Phase::Failed => {
                    return Err(Error::JobFailed(
                        status.error.unwrap_or_else(|| "unknown failure".to_string()),
                    ));
                }
                Phase::Pending | Phase::Running => {}
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(Error::PollTimeout {
            id: session_id.to_string(),
            attempts: policy.max_attempts,
        })
    }

    async fn decode<T>(response: Response, session_id: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await?;
        let (message, phase) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => (parsed.error, parsed.status),
            Err(_) => (body, None),
        };

        Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => Error::Validation(message),
            StatusCode::NOT_FOUND => Error::NotFound(session_id.to_string()),
            StatusCode::CONFLICT => Error::NotReady {
                id: session_id.to_string(),
                phase: phase.unwrap_or_else(|| "unknown".to_string()),
            },
            StatusCode::UNPROCESSABLE_ENTITY => Error::JobFailed(message),
            other => Error::Http(format!("{}: {}", other, message)),
        })
    }
}
