pub mod memory;

pub use memory::InMemorySessionStore;

use crate::state::Variables;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but no turn has run yet.
    Idle,
    /// A claimed turn is traversing the graph.
    Running,
    /// Suspended at a node awaiting the next inbound event.
    WaitingForInput,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Durable execution state of one flow run against one conversation. At most
/// one non-terminal session exists per conversation; terminal sessions are
/// retained for audit and never resumed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    pub id: String,
    pub flow_id: String,
    pub flow_version: u32,
    pub conversation_id: String,
    /// None means not yet started, or completed.
    pub current_node_id: Option<String>,
    pub variables: Variables,
    pub status: SessionStatus,
    /// Last terminal error, recorded for operator diagnosis.
    pub last_error: Option<String>,
    pub claim_token: Option<String>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// The state a finished turn persists atomically with releasing its claim.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub current_node_id: Option<String>,
    pub variables: Variables,
    pub status: SessionStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Another turn holds the claim. Not a session failure; the caller may
    /// retry delivery per its own at-least-once semantics.
    #[error("session `{session_id}` is claimed by another turn")]
    Busy { session_id: String },
    #[error("session `{0}` not found")]
    NotFound(String),
    /// The claim token no longer matches: the lease expired and someone
    /// else took over. The late writer must discard its work.
    #[error("stale claim on session `{session_id}`")]
    StaleClaim { session_id: String },
    #[error("session `{session_id}` is terminal and cannot be claimed")]
    Terminal { session_id: String },
    #[error("conversation `{conversation_id}` already has an active session")]
    ActiveSessionExists { conversation_id: String },
}

/// Durable session records plus the claim/lease primitive. Claiming is a
/// single atomic conditional update; a SQL implementation maps `claim` onto
/// one conditional UPDATE.
#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    /// The conversation's single non-terminal session, if any.
    async fn find_active(&self, conversation_id: &str) -> Option<Session>;

    /// Creates an idle session for the conversation.
    async fn create(
        &self,
        conversation_id: &str,
        flow_id: &str,
        flow_version: u32,
    ) -> Result<Session, SessionError>;

    /// Atomically installs `token` + lease and marks the session `running`,
    /// provided no live claim is held. Returns the pre-claim snapshot: a
    /// snapshot already in `running` means the previous claimant died
    /// mid-turn.
    async fn claim(
        &self,
        session_id: &str,
        token: &str,
        lease: Duration,
    ) -> Result<Session, SessionError>;

    /// Atomically applies the turn's result and releases the claim,
    /// rejecting writers whose token no longer matches.
    async fn persist_and_release(
        &self,
        session_id: &str,
        token: &str,
        update: SessionUpdate,
    ) -> Result<(), SessionError>;

    /// Read-only inspection, terminal sessions included.
    async fn get(&self, session_id: &str) -> Option<Session>;
}
