//! In-process channel and integration implementations: a console channel for
//! interactive runs, plus recording and scripted doubles for tests.

use crate::channel::{DeliveryError, IntegrationClient, IntegrationError, MessageDelivery, OutboundMessage};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Prints outbound messages to stdout. Button rows are rendered as an
/// indented list so `/click <id>` replies can reference them.
#[derive(Debug, Default)]
pub struct ConsoleDelivery;

#[async_trait]
impl MessageDelivery for ConsoleDelivery {
    async fn deliver(
        &self,
        _conversation_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError> {
        println!("bot> {}", message.text);
        for button in &message.buttons {
            println!("       [{}] {}", button.id, button.label);
        }
        Ok(())
    }
}

/// Records every delivered message, optionally failing the first N attempts
/// with a transient error to exercise retry paths.
#[derive(Debug, Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingDelivery {
    /// Fails the first `n` deliveries with a transient error, then succeeds.
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageDelivery for RecordingDelivery {
    async fn deliver(
        &self,
        conversation_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeliveryError::Transient("simulated outage".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((conversation_id.to_string(), message.clone()));
        Ok(())
    }
}

/// Replays a scripted sequence of integration responses in order. Runs dry
/// into a non-transient error, so an unexpected extra call fails the test
/// instead of hanging in retries.
#[derive(Debug, Default)]
pub struct ScriptedIntegration {
    responses: Mutex<VecDeque<Result<Value, IntegrationError>>>,
    calls: AtomicUsize,
}

impl ScriptedIntegration {
    pub fn replying(responses: Vec<Result<Value, IntegrationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntegrationClient for ScriptedIntegration {
    async fn call(
        &self,
        endpoint: &str,
        _payload: &Value,
        _timeout: Duration,
    ) -> Result<Value, IntegrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(IntegrationError::InvalidEndpoint(format!(
                    "no scripted response for {endpoint}"
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recording_delivery_fails_then_records() {
        let delivery = RecordingDelivery::failing_first(1);
        let msg = OutboundMessage::text("hi");

        assert!(delivery.deliver("c1", &msg).await.is_err());
        delivery.deliver("c1", &msg).await.unwrap();

        assert_eq!(delivery.attempts(), 2);
        assert_eq!(delivery.sent().len(), 1);
        assert_eq!(delivery.sent()[0].0, "c1");
    }

    #[tokio::test]
    async fn test_scripted_integration_replays_in_order() {
        let integration = ScriptedIntegration::replying(vec![
            Ok(json!({"a": 1})),
            Err(IntegrationError::Timeout),
        ]);

        assert_eq!(
            integration.call("x", &json!({}), Duration::from_secs(1)).await.unwrap(),
            json!({"a": 1})
        );
        assert!(matches!(
            integration.call("x", &json!({}), Duration::from_secs(1)).await,
            Err(IntegrationError::Timeout)
        ));
        // script exhausted: non-transient, will not be retried
        let err = integration
            .call("x", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(integration.calls(), 3);
    }
}
