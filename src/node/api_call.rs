use crate::node::{Node, NodeError, NodeHandler, Outcome, TurnContext, parse_data};
use crate::state::{StateValue, variables_to_json};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ApiCallData {
    endpoint: String,
    /// Request body; defaults to a snapshot of the session variables.
    #[serde(default)]
    payload: Option<Value>,
    /// Variable key the response is merged under; defaults to the node id.
    #[serde(default)]
    result_key: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Calls the configured endpoint with timeout and bounded retries. The
/// response is merged into the session variables only after a confirmed
/// success, wholesale under one namespace key, so a failed call leaves no
/// partial mutation and a retried success merges identically to a
/// first-attempt success.
#[derive(Debug)]
pub struct ApiCallHandler;

#[async_trait]
impl NodeHandler for ApiCallHandler {
    fn type_name(&self) -> &'static str {
        "apiCall"
    }

    async fn handle(&self, node: &Node, ctx: &mut TurnContext) -> Result<Outcome, NodeError> {
        let data: ApiCallData = parse_data(node)?;
        let timeout = data
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| ctx.integration_timeout());
        let payload = data
            .payload
            .unwrap_or_else(|| variables_to_json(ctx.variables()));

        let response = ctx
            .call_integration(&data.endpoint, &payload, timeout)
            .await
            .map_err(|e| NodeError::Integration(format!("node `{}`: {e}", node.id)))?;

        let key = data.result_key.unwrap_or_else(|| node.id.clone());
        let value = StateValue::try_from(response).unwrap_or(StateValue::Null);
        info!(node_id = %node.id, result_key = %key, "merged integration result");
        ctx.set(key, value);
        Ok(Outcome::Advance(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::IntegrationError;
    use crate::harness::{RecordingDelivery, ScriptedIntegration};
    use crate::node::test_support::context_with;
    use serde_json::json;
    use std::sync::Arc;

    fn node(data: serde_json::Value) -> Node {
        Node {
            id: "api1".into(),
            node_type: "apiCall".into(),
            data,
        }
    }

    #[tokio::test]
    async fn test_success_merges_under_result_key() {
        let integration = Arc::new(ScriptedIntegration::replying(vec![Ok(
            json!({"status": "ok", "score": 7}),
        )]));
        let mut ctx = context_with(Arc::new(RecordingDelivery::default()), integration.clone());

        let outcome = ApiCallHandler
            .handle(
                &node(json!({"endpoint": "https://api.example.com/score", "result_key": "api"})),
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Advance(None));
        assert_eq!(ctx.get("api.status"), Some(&StateValue::String("ok".into())));
        assert_eq!(ctx.get("api.score"), Some(&StateValue::Number(7.0)));
        assert_eq!(integration.calls(), 1);
    }

    #[tokio::test]
    async fn test_retried_success_merges_like_first_attempt() {
        let integration = Arc::new(ScriptedIntegration::replying(vec![
            Err(IntegrationError::Status(503)),
            Err(IntegrationError::Timeout),
            Ok(json!({"status": "ok"})),
        ]));
        let mut ctx = context_with(Arc::new(RecordingDelivery::default()), integration.clone());

        ApiCallHandler
            .handle(
                &node(json!({"endpoint": "https://api.example.com/x", "result_key": "api"})),
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(integration.calls(), 3);
        assert_eq!(ctx.get("api.status"), Some(&StateValue::String("ok".into())));
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_no_partial_mutation() {
        let integration = Arc::new(ScriptedIntegration::replying(vec![
            Err(IntegrationError::Timeout),
            Err(IntegrationError::Timeout),
            Err(IntegrationError::Timeout),
        ]));
        let mut ctx = context_with(Arc::new(RecordingDelivery::default()), integration.clone());

        let err = ApiCallHandler
            .handle(
                &node(json!({"endpoint": "https://api.example.com/x", "result_key": "api"})),
                &mut ctx,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, NodeError::Integration(_)));
        assert_eq!(integration.calls(), 3);
        assert!(ctx.variables().is_empty());
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let integration = Arc::new(ScriptedIntegration::replying(vec![Err(
            IntegrationError::Status(404),
        )]));
        let mut ctx = context_with(Arc::new(RecordingDelivery::default()), integration.clone());

        let err = ApiCallHandler
            .handle(&node(json!({"endpoint": "https://api.example.com/x"})), &mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, NodeError::Integration(_)));
        assert_eq!(integration.calls(), 1);
    }

    #[tokio::test]
    async fn test_result_key_defaults_to_node_id() {
        let integration = Arc::new(ScriptedIntegration::replying(vec![Ok(json!({"n": 1}))]));
        let mut ctx = context_with(Arc::new(RecordingDelivery::default()), integration);

        ApiCallHandler
            .handle(&node(json!({"endpoint": "https://api.example.com/x"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get("api1.n"), Some(&StateValue::Number(1.0)));
    }
}
