pub mod api_call;
pub mod cond;
pub mod message;
pub mod quick_reply;
pub mod start;

pub use api_call::ApiCallHandler;
pub use cond::ConditionHandler;
pub use message::MessageHandler;
pub use quick_reply::QuickReplyHandler;
pub use start::StartHandler;

use crate::channel::{
    DeliveryError, IntegrationClient, IntegrationError, MessageDelivery, OutboundMessage,
    retry_with_backoff,
};
use crate::config::EngineConfig;
use crate::event::InboundEvent;
use crate::flow::CompiledFlow;
use crate::state::{StateValue, Variables, lookup_path, variables_to_json};
use async_trait::async_trait;
use handlebars::Handlebars;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use crate::flow::graph::Node;

/// Why a handler paused the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    /// Waiting for a button selection; the next inbound event's handle
    /// resumes traversal from this node.
    AwaitingChoice,
}

/// A handler's continuation instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum Outcome {
    /// Continue traversal immediately, optionally selecting a branch handle.
    Advance(Option<String>),
    /// Stop here; persist and wait for external input.
    Suspend(SuspendReason),
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum NodeError {
    #[error("node `{0}` has no outgoing edge where one is required")]
    NoOutgoingEdge(String),
    #[error("unknown node type `{0}`")]
    UnknownNodeType(String),
    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),
    #[error("message delivery failed: {0}")]
    Delivery(String),
    #[error("integration call failed: {0}")]
    Integration(String),
    #[error("turn exceeded the step limit of {0} nodes")]
    StepLimit(usize),
    #[error("previous turn was abandoned while running")]
    Aborted,
}

impl NodeError {
    /// Configuration errors are flow-authoring mistakes surfaced to the
    /// operator, as opposed to transient runtime failures.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NodeError::NoOutgoingEdge(_)
                | NodeError::UnknownNodeType(_)
                | NodeError::InvalidConfig(_)
                | NodeError::StepLimit(_)
        )
    }
}

/// Everything one turn's handlers may see and touch: the session's variables
/// (mutated in place, persisted only by the coordinator), the triggering
/// event, the compiled flow, and the external capabilities.
pub struct TurnContext {
    conversation_id: String,
    event: InboundEvent,
    flow: Arc<CompiledFlow>,
    variables: Variables,
    delivery: Arc<dyn MessageDelivery>,
    integrations: Arc<dyn IntegrationClient>,
    config: EngineConfig,
    renderer: Handlebars<'static>,
}

impl TurnContext {
    pub fn new(
        event: InboundEvent,
        flow: Arc<CompiledFlow>,
        variables: Variables,
        delivery: Arc<dyn MessageDelivery>,
        integrations: Arc<dyn IntegrationClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            conversation_id: event.conversation_id.clone(),
            event,
            flow,
            variables,
            delivery,
            integrations,
            config,
            renderer: Handlebars::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn event(&self) -> &InboundEvent {
        &self.event
    }

    pub fn flow(&self) -> &CompiledFlow {
        &self.flow
    }

    pub fn get(&self, path: &str) -> Option<&StateValue> {
        lookup_path(&self.variables, path)
    }

    pub fn set(&mut self, key: impl Into<String>, value: StateValue) {
        self.variables.insert(key.into(), value);
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn into_variables(self) -> Variables {
        self.variables
    }

    pub fn integration_timeout(&self) -> Duration {
        self.config.integration_timeout()
    }

    /// Renders a handlebars template against the session variables.
    pub fn render(&self, template: &str) -> Result<String, NodeError> {
        self.renderer
            .render_template(template, &variables_to_json(&self.variables))
            .map_err(|e| NodeError::InvalidConfig(format!("template render failed: {e}")))
    }

    /// Delivers with the configured bounded backoff. Blocks the turn for the
    /// retry duration; the claim lease is sized for that.
    pub async fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let delivery = self.delivery.clone();
        let conversation_id = self.conversation_id.clone();
        let message = message.clone();
        retry_with_backoff(&self.config.delivery_retry, DeliveryError::is_transient, move || {
            let delivery = delivery.clone();
            let conversation_id = conversation_id.clone();
            let message = message.clone();
            async move { delivery.deliver(&conversation_id, &message).await }
        })
        .await
    }

    /// One integration call with per-call timeout and bounded retries.
    pub async fn call_integration(
        &self,
        endpoint: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, IntegrationError> {
        let integrations = self.integrations.clone();
        let endpoint = endpoint.to_string();
        let payload = payload.clone();
        retry_with_backoff(
            &self.config.integration_retry,
            IntegrationError::is_transient,
            move || {
                let integrations = integrations.clone();
                let endpoint = endpoint.clone();
                let payload = payload.clone();
                async move { integrations.call(&endpoint, &payload, timeout).await }
            },
        )
        .await
    }
}

/// One handler per node type. Side effects happen inside `handle`, before
/// the continuation instruction is returned.
#[async_trait]
pub trait NodeHandler: Send + Sync + Debug {
    fn type_name(&self) -> &'static str;
    async fn handle(&self, node: &Node, ctx: &mut TurnContext) -> Result<Outcome, NodeError>;
}

/// Closed registry mapping node type to handler. Adding a node type means
/// registering a handler here, never editing a dispatch switch.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All built-in node types.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(StartHandler));
        registry.register(Arc::new(MessageHandler));
        registry.register(Arc::new(QuickReplyHandler));
        registry.register(Arc::new(ConditionHandler));
        registry.register(Arc::new(ApiCallHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.type_name().to_string(), handler);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }
}

pub(crate) fn parse_data<T: serde::de::DeserializeOwned>(node: &Node) -> Result<T, NodeError> {
    serde_json::from_value(node.data.clone()).map_err(|e| {
        NodeError::InvalidConfig(format!("node `{}` ({}): {e}", node.id, node.node_type))
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{RecordingDelivery, ScriptedIntegration};
    use test_support::context_with;

    #[test]
    fn test_registry_dispatch() {
        let registry = HandlerRegistry::builtin();
        assert!(registry.get("start").is_some());
        assert!(registry.get("message").is_some());
        assert!(registry.get("quickReply").is_some());
        assert!(registry.get("condition").is_some());
        assert!(registry.get("apiCall").is_some());
        assert!(registry.get("carrierPigeon").is_none());
    }

    #[test]
    fn test_render_uses_variables() {
        let mut ctx = context_with(
            Arc::new(RecordingDelivery::default()),
            Arc::new(ScriptedIntegration::default()),
        );
        ctx.set("name", StateValue::String("Ada".into()));
        assert_eq!(ctx.render("Hello {{name}}!").unwrap(), "Hello Ada!");
        // unknown variables render empty rather than failing the turn
        assert_eq!(ctx.render("Hi {{missing}}!").unwrap(), "Hi !");
    }

    #[test]
    fn test_render_reaches_nested_namespaces() {
        let mut ctx = context_with(
            Arc::new(RecordingDelivery::default()),
            Arc::new(ScriptedIntegration::default()),
        );
        ctx.set(
            "api",
            StateValue::try_from(serde_json::json!({"status": "ok", "body": {"region": "EU"}}))
                .unwrap(),
        );
        assert_eq!(ctx.render("status: {{api.status}}").unwrap(), "status: ok");
        assert_eq!(
            ctx.render("region: {{api.body.region}}").unwrap(),
            "region: EU"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(NodeError::UnknownNodeType("x".into()).is_configuration());
        assert!(NodeError::NoOutgoingEdge("n1".into()).is_configuration());
        assert!(NodeError::StepLimit(64).is_configuration());
        assert!(!NodeError::Delivery("timeout".into()).is_configuration());
        assert!(!NodeError::Integration("503".into()).is_configuration());
    }
}
