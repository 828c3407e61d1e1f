use crate::channel::{Button, OutboundMessage};
use crate::node::{Node, NodeError, NodeHandler, Outcome, SuspendReason, TurnContext, parse_data};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct QuickReplyData {
    /// Handlebars template rendered against the session variables.
    body: String,
    #[serde(default)]
    buttons: Vec<Button>,
}

/// Delivers a prompt with buttons, then suspends. The next inbound event's
/// handle (a button id) selects the outgoing edge to resume through.
#[derive(Debug)]
pub struct QuickReplyHandler;

#[async_trait]
impl NodeHandler for QuickReplyHandler {
    fn type_name(&self) -> &'static str {
        "quickReply"
    }

    async fn handle(&self, node: &Node, ctx: &mut TurnContext) -> Result<Outcome, NodeError> {
        let data: QuickReplyData = parse_data(node)?;
        let body = ctx.render(&data.body)?;
        ctx.deliver(&OutboundMessage::with_buttons(body, data.buttons))
            .await
            .map_err(|e| NodeError::Delivery(e.to_string()))?;
        Ok(Outcome::Suspend(SuspendReason::AwaitingChoice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{RecordingDelivery, ScriptedIntegration};
    use crate::node::test_support::context_with;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_delivers_buttons_and_suspends() {
        let delivery = Arc::new(RecordingDelivery::default());
        let mut ctx = context_with(delivery.clone(), Arc::new(ScriptedIntegration::default()));

        let node = Node {
            id: "q1".into(),
            node_type: "quickReply".into(),
            data: json!({
                "body": "Are you over 18?",
                "buttons": [
                    {"id": "btn_yes", "label": "Yes"},
                    {"id": "btn_no", "label": "No"}
                ]
            }),
        };

        let outcome = QuickReplyHandler.handle(&node, &mut ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Suspend(SuspendReason::AwaitingChoice));

        let sent = delivery.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.text, "Are you over 18?");
        assert_eq!(
            sent[0].1.buttons,
            vec![
                Button { id: "btn_yes".into(), label: "Yes".into() },
                Button { id: "btn_no".into(), label: "No".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_buttons_are_optional() {
        let delivery = Arc::new(RecordingDelivery::default());
        let mut ctx = context_with(delivery.clone(), Arc::new(ScriptedIntegration::default()));

        let node = Node {
            id: "q1".into(),
            node_type: "quickReply".into(),
            data: json!({"body": "Type anything to continue"}),
        };

        let outcome = QuickReplyHandler.handle(&node, &mut ctx).await.unwrap();
        assert_eq!(outcome, Outcome::Suspend(SuspendReason::AwaitingChoice));
        assert!(delivery.sent()[0].1.buttons.is_empty());
    }
}
