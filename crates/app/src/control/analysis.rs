//! Client side of the analysis service.
//!
//! The service receives the user's message, the active analysis prompt and
//! optionally the latest frame, and answers with what the detector should
//! look for plus a reply for the chat log.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, Serialize)]
pub(crate) struct AnalysisRequest {
    pub(crate) message: String,
    pub(crate) prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) image_jpeg_base64: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub(crate) struct AnalysisReply {
    #[serde(default)]
    pub(crate) detecting: bool,
    #[serde(default)]
    pub(crate) target_classes: Vec<String>,
    #[serde(default)]
    pub(crate) analysis_prompt: Option<String>,
    pub(crate) reply: String,
}

#[derive(Debug, Error)]
pub(crate) enum AnalysisError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service answered with status {0}")]
    Status(u16),
    #[error("malformed reply: {0}")]
    Decode(String),
}

#[async_trait]
pub(crate) trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Posts requests as JSON to a remote endpoint.
pub(crate) struct HttpAnalysisClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpAnalysisClient {
    pub(crate) fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError> {
        debug!(url = %self.url, with_image = request.image_jpeg_base64.is_some(), "posting analysis request");
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AnalysisError::Timeout(self.timeout)
                } else {
                    AnalysisError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Status(status.as_u16()));
        }

        response
            .json::<AnalysisReply>()
            .await
            .map_err(|err| AnalysisError::Decode(err.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Local stand-in used when no analysis service is configured. Acknowledges
/// the message and leaves detection off.
pub(crate) struct EchoAnalysisClient;

#[async_trait]
impl AnalysisClient for EchoAnalysisClient {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError> {
        Ok(AnalysisReply {
            detecting: false,
            target_classes: Vec::new(),
            analysis_prompt: None,
            reply: format!(
                "Recibí: '{}'. Contexto actualizado correctamente.",
                request.message
            ),
        })
    }

    fn name(&self) -> &str {
        "echo"
    }
}
