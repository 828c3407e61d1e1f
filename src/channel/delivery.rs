use crate::config::RetryPolicy;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use thiserror::Error;
use tracing::warn;

/// A tappable button offered alongside a quick-reply prompt. The `id` comes
/// back as the resume handle when the contact taps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Button {
    pub id: String,
    pub label: String,
}

/// Channel-agnostic outbound content. The transport adapter behind
/// `MessageDelivery` maps this onto whatever the provider supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(text: impl Into<String>, buttons: Vec<Button>) -> Self {
        Self {
            text: text.into(),
            buttons,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Timeouts, 5xx, connection drops. Retried by the engine's bounded
    /// backoff policy.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Provider rejected the message. Never retried.
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// The "deliver message" capability the engine calls. Implementations wrap
/// a real messaging provider, the console harness, or a test double.
#[async_trait]
pub trait MessageDelivery: Send + Sync + Debug {
    async fn deliver(
        &self,
        conversation_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError>;
}

/// Runs `op` up to `policy.max_attempts` times, sleeping an exponentially
/// growing, jittered delay between attempts. Non-transient errors abort
/// immediately.
pub async fn retry_with_backoff<T, E, Fut>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: impl FnMut() -> Fut,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < policy.max_attempts && is_transient(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
