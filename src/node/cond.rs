use crate::flow::Condition;
use crate::node::{Node, NodeError, NodeHandler, Outcome, TurnContext, parse_data};
use async_trait::async_trait;
use serde::Deserialize;

/// Accepts both the editor's structured form and the compact text form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConditionSpec {
    Structured(Condition),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct ConditionData {
    condition: ConditionSpec,
}

/// Evaluates the declared expression against the session variables and
/// advances through the `"true"` or `"false"` branch. No side effects, never
/// suspends; evaluation is total, so a condition node cannot fail at
/// runtime, only at configuration.
#[derive(Debug)]
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    fn type_name(&self) -> &'static str {
        "condition"
    }

    async fn handle(&self, node: &Node, ctx: &mut TurnContext) -> Result<Outcome, NodeError> {
        let data: ConditionData = parse_data(node)?;
        let condition = match data.condition {
            ConditionSpec::Structured(c) => c,
            ConditionSpec::Text(expr) => Condition::parse(&expr).map_err(|e| {
                NodeError::InvalidConfig(format!("node `{}`: {e}", node.id))
            })?,
        };
        let branch = condition.evaluate(ctx.variables());
        Ok(Outcome::Advance(Some(branch.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{RecordingDelivery, ScriptedIntegration};
    use crate::node::test_support::context_with;
    use crate::state::StateValue;
    use serde_json::json;
    use std::sync::Arc;

    fn node(data: serde_json::Value) -> Node {
        Node {
            id: "c1".into(),
            node_type: "condition".into(),
            data,
        }
    }

    #[tokio::test]
    async fn test_text_form_branches() {
        let mut ctx = context_with(
            Arc::new(RecordingDelivery::default()),
            Arc::new(ScriptedIntegration::default()),
        );
        ctx.set("age", StateValue::Number(20.0));

        let outcome = ConditionHandler
            .handle(&node(json!({"condition": "age >= 18"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Advance(Some("true".into())));
    }

    #[tokio::test]
    async fn test_missing_variable_takes_false_branch() {
        let mut ctx = context_with(
            Arc::new(RecordingDelivery::default()),
            Arc::new(ScriptedIntegration::default()),
        );

        let outcome = ConditionHandler
            .handle(&node(json!({"condition": "age >= 18"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Advance(Some("false".into())));
    }

    #[tokio::test]
    async fn test_structured_form() {
        let mut ctx = context_with(
            Arc::new(RecordingDelivery::default()),
            Arc::new(ScriptedIntegration::default()),
        );
        ctx.set("plan", StateValue::String("pro".into()));

        let outcome = ConditionHandler
            .handle(
                &node(json!({"condition": {"variable": "plan", "op": "==", "value": "pro"}})),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Advance(Some("true".into())));
    }

    #[tokio::test]
    async fn test_unparsable_expression_is_a_config_error() {
        let mut ctx = context_with(
            Arc::new(RecordingDelivery::default()),
            Arc::new(ScriptedIntegration::default()),
        );

        let err = ConditionHandler
            .handle(&node(json!({"condition": "an expression this is not"})), &mut ctx)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
