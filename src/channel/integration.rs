use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrationError {
    #[error("integration call timed out")]
    Timeout,
    #[error("integration returned HTTP {0}")]
    Status(u16),
    #[error("integration transport error: {0}")]
    Transport(String),
    #[error("invalid integration endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("integration response was not valid JSON: {0}")]
    Decode(String),
}

impl IntegrationError {
    pub fn is_transient(&self) -> bool {
        match self {
            IntegrationError::Timeout | IntegrationError::Transport(_) => true,
            IntegrationError::Status(code) => *code >= 500,
            IntegrationError::InvalidEndpoint(_) | IntegrationError::Decode(_) => false,
        }
    }
}

/// Outbound integration capability used by `apiCall` nodes: one JSON request
/// with a hard per-call timeout.
#[async_trait]
pub trait IntegrationClient: Send + Sync + Debug {
    async fn call(
        &self,
        endpoint: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, IntegrationError>;
}

/// Production client: POSTs the payload as JSON and decodes the JSON
/// response body.
#[derive(Debug, Clone, Default)]
pub struct HttpIntegrationClient {
    client: reqwest::Client,
}

impl HttpIntegrationClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntegrationClient for HttpIntegrationClient {
    async fn call(
        &self,
        endpoint: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, IntegrationError> {
        let url = Url::parse(endpoint)
            .map_err(|e| IntegrationError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IntegrationError::InvalidEndpoint(format!(
                "unsupported scheme `{}`",
                url.scheme()
            )));
        }

        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    IntegrationError::Timeout
                } else {
                    IntegrationError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IntegrationError::Status(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| IntegrationError::Decode(e.to_string()))
    }
}
