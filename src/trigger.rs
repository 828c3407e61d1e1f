//! Maps an inbound event with no active session to the flow that should
//! start. Resolution is deterministic: explicit flow id first, then keyword
//! match over the latest registered flow versions in id order.

use crate::event::InboundEvent;
use crate::flow::{CompiledFlow, FlowStore};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait TriggerResolver: Send + Sync + Debug {
    /// Picks the flow a fresh conversation turn should start, or `None` if
    /// nothing matches.
    async fn resolve(
        &self,
        event: &InboundEvent,
        flows: &dyn FlowStore,
    ) -> Option<Arc<CompiledFlow>>;
}

/// Case-insensitive substring matching against each flow's trigger keywords.
/// A flow with no keywords matches any message. Flows are scanned in id
/// order so resolution does not depend on registration order.
#[derive(Debug, Default)]
pub struct KeywordTrigger;

#[async_trait]
impl TriggerResolver for KeywordTrigger {
    async fn resolve(
        &self,
        event: &InboundEvent,
        flows: &dyn FlowStore,
    ) -> Option<Arc<CompiledFlow>> {
        if let Some(flow_id) = &event.flow_id {
            return flows.latest(flow_id).await;
        }

        let text = event.text.as_deref().unwrap_or("").to_lowercase();
        let mut candidates = flows.list_latest().await;
        candidates.sort_by(|a, b| a.id().cmp(b.id()));

        for flow in candidates {
            let keywords = &flow.definition().trigger_keywords;
            let matched = keywords.is_empty()
                || keywords.iter().any(|k| text.contains(&k.to_lowercase()));
            if matched {
                debug!(flow_id = %flow.id(), "trigger matched");
                return Some(flow);
            }
        }
        None
    }
}
