use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A normalized inbound event, produced by a channel adapter after
/// signature verification and payload normalization, or synthesized by the
/// console harness. This is the only shape the engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InboundEvent {
    /// External identity of the chat thread.
    pub conversation_id: String,
    /// Explicit flow selection, e.g. from a campaign deep link. Bypasses
    /// keyword matching when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    /// Free text typed by the contact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Button id selected by the contact, used as the resume handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_handle: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            flow_id: None,
            text: Some(text.into()),
            selected_handle: None,
            timestamp: Utc::now(),
        }
    }

    pub fn choice(conversation_id: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            flow_id: None,
            text: None,
            selected_handle: Some(handle.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_flow(mut self, flow_id: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self
    }

    /// The handle this event supplies for resuming a suspended node: an
    /// explicit button id wins, free text is the fallback so typed replies
    /// can still match a button edge.
    pub fn resume_handle(&self) -> Option<&str> {
        self.selected_handle.as_deref().or(self.text.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_handle_prefers_button() {
        let mut event = InboundEvent::text("c1", "yes please");
        assert_eq!(event.resume_handle(), Some("yes please"));

        event.selected_handle = Some("btn_yes".into());
        assert_eq!(event.resume_handle(), Some("btn_yes"));
    }

    #[test]
    fn test_builders() {
        let event = InboundEvent::choice("c1", "btn_no").with_flow("onboarding");
        assert_eq!(event.conversation_id, "c1");
        assert_eq!(event.flow_id.as_deref(), Some("onboarding"));
        assert!(event.text.is_none());
    }
}
