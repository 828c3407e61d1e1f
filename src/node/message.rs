use crate::channel::OutboundMessage;
use crate::node::{Node, NodeError, NodeHandler, Outcome, TurnContext, parse_data};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct MessageData {
    /// Handlebars template rendered against the session variables.
    message: String,
}

/// Delivers a text message and continues. Delivery failures are retried by
/// the bounded backoff policy before failing the turn.
#[derive(Debug)]
pub struct MessageHandler;

#[async_trait]
impl NodeHandler for MessageHandler {
    fn type_name(&self) -> &'static str {
        "message"
    }

    async fn handle(&self, node: &Node, ctx: &mut TurnContext) -> Result<Outcome, NodeError> {
        let data: MessageData = parse_data(node)?;
        let text = ctx.render(&data.message)?;
        ctx.deliver(&OutboundMessage::text(text))
            .await
            .map_err(|e| NodeError::Delivery(e.to_string()))?;
        Ok(Outcome::Advance(None))
    }
}
