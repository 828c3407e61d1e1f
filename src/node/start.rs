use crate::node::{Node, NodeError, NodeHandler, Outcome, TurnContext};
use async_trait::async_trait;

/// Entry point of every flow. No side effects; advances to its single
/// outgoing edge. A start node without one is a flow-configuration error,
/// not a user-facing failure.
#[derive(Debug)]
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn type_name(&self) -> &'static str {
        "start"
    }

    async fn handle(&self, node: &Node, ctx: &mut TurnContext) -> Result<Outcome, NodeError> {
        if ctx.flow().next_node(&node.id, None).is_none() {
            return Err(NodeError::NoOutgoingEdge(node.id.clone()));
        }
        Ok(Outcome::Advance(None))
    }
}
