//! The execution coordinator: one inbound event in, one claimed turn out.
//! All graph traversal, claim handling, and persistence sequencing lives
//! here; node semantics live in the handlers.

use crate::channel::{IntegrationClient, MessageDelivery};
use crate::config::EngineConfig;
use crate::event::InboundEvent;
use crate::flow::{CompiledFlow, FlowStore};
use crate::node::{HandlerRegistry, NodeError, Outcome, TurnContext};
use crate::session::{Session, SessionError, SessionStatus, SessionStore, SessionUpdate};
use crate::trigger::{KeywordTrigger, TriggerResolver};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The session references a flow version the store no longer has. The
    /// claim is released unchanged so the session is not wedged.
    #[error("flow `{flow_id}` version {version} is not registered")]
    FlowNotFound { flow_id: String, version: u32 },
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One handler invocation, as recorded in the turn's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub result: Result<Outcome, NodeError>,
}

/// How a turn ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// No active session and no trigger matched; the event was dropped.
    NoMatch,
    /// Another turn holds the claim. The channel may redeliver later.
    Busy { session_id: String },
    Completed { session_id: String },
    WaitingForInput { session_id: String, node_id: String },
    Failed { session_id: String, error: NodeError },
}

#[derive(Debug)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub records: Vec<NodeRecord>,
    pub total: TimeDelta,
}

/// Drives flows against durable sessions. Stateless between turns; safe to
/// share across tasks and processes that point at the same stores.
#[derive(Debug)]
pub struct Engine {
    flows: Arc<dyn FlowStore>,
    sessions: Arc<dyn SessionStore>,
    registry: HandlerRegistry,
    trigger: Arc<dyn TriggerResolver>,
    delivery: Arc<dyn MessageDelivery>,
    integrations: Arc<dyn IntegrationClient>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        flows: Arc<dyn FlowStore>,
        sessions: Arc<dyn SessionStore>,
        delivery: Arc<dyn MessageDelivery>,
        integrations: Arc<dyn IntegrationClient>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Self::with_registry(
            flows,
            sessions,
            delivery,
            integrations,
            config,
            HandlerRegistry::builtin(),
            Arc::new(KeywordTrigger),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_registry(
        flows: Arc<dyn FlowStore>,
        sessions: Arc<dyn SessionStore>,
        delivery: Arc<dyn MessageDelivery>,
        integrations: Arc<dyn IntegrationClient>,
        config: EngineConfig,
        registry: HandlerRegistry,
        trigger: Arc<dyn TriggerResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            flows,
            sessions,
            registry,
            trigger,
            delivery,
            integrations,
            config,
        })
    }

    /// Processes one inbound event: finds or starts the conversation's
    /// session, claims it, traverses until the flow suspends, completes, or
    /// fails, and persists the result atomically with the claim release.
    /// Redelivered events are safe at every point: before the claim nothing
    /// has happened, during it they bounce off `Busy`, after it they resume
    /// from the persisted node.
    #[instrument(skip(self, event), fields(conversation_id = %event.conversation_id))]
    pub async fn start_or_resume(&self, event: InboundEvent) -> Result<TurnReport, EngineError> {
        let turn_started = Utc::now();
        let report = |outcome, records: Vec<NodeRecord>| TurnReport {
            outcome,
            records,
            total: Utc::now() - turn_started,
        };

        let session = loop {
            if let Some(session) = self.sessions.find_active(&event.conversation_id).await {
                break session;
            }
            let Some(flow) = self.trigger.resolve(&event, self.flows.as_ref()).await else {
                info!("no active session and no trigger matched");
                return Ok(report(TurnOutcome::NoMatch, Vec::new()));
            };
            match self
                .sessions
                .create(&event.conversation_id, flow.id(), flow.version())
                .await
            {
                Ok(session) => break session,
                // a concurrent duplicate event created the session first;
                // route to the winner's session and contend on its claim
                Err(SessionError::ActiveSessionExists { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        let token = Uuid::new_v4().to_string();
        let snapshot = match self
            .sessions
            .claim(&session.id, &token, self.config.claim_lease())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(SessionError::Busy { session_id }) => {
                info!(%session_id, "claim busy, dropping event");
                return Ok(report(TurnOutcome::Busy { session_id }, Vec::new()));
            }
            Err(e) => return Err(e.into()),
        };

        // A pre-claim snapshot already in `running` means the previous
        // claimant died mid-turn; its partial side effects are unknowable,
        // so the session fails rather than silently re-running them.
        if snapshot.status == SessionStatus::Running {
            warn!(session_id = %snapshot.id, "claimed an abandoned running turn");
            let error = NodeError::Aborted;
            self.sessions
                .persist_and_release(
                    &snapshot.id,
                    &token,
                    SessionUpdate {
                        current_node_id: snapshot.current_node_id.clone(),
                        variables: snapshot.variables.clone(),
                        status: SessionStatus::Failed,
                        last_error: Some(error.to_string()),
                    },
                )
                .await?;
            return Ok(report(
                TurnOutcome::Failed {
                    session_id: snapshot.id,
                    error,
                },
                Vec::new(),
            ));
        }

        let Some(flow) = self
            .flows
            .get(&snapshot.flow_id, snapshot.flow_version)
            .await
        else {
            self.sessions
                .persist_and_release(
                    &snapshot.id,
                    &token,
                    SessionUpdate {
                        current_node_id: snapshot.current_node_id.clone(),
                        variables: snapshot.variables.clone(),
                        status: snapshot.status,
                        last_error: snapshot.last_error.clone(),
                    },
                )
                .await?;
            return Err(EngineError::FlowNotFound {
                flow_id: snapshot.flow_id,
                version: snapshot.flow_version,
            });
        };

        let (update, outcome, records) = self.run_turn(&snapshot, flow, &event).await;
        self.sessions
            .persist_and_release(&snapshot.id, &token, update)
            .await?;
        info!(session_id = %snapshot.id, ?outcome, steps = records.len(), "turn finished");
        Ok(report(outcome, records))
    }

    /// Read-only session inspection, terminal sessions included.
    pub async fn session_state(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).await
    }

    async fn run_turn(
        &self,
        session: &Session,
        flow: Arc<CompiledFlow>,
        event: &InboundEvent,
    ) -> (SessionUpdate, TurnOutcome, Vec<NodeRecord>) {
        let mut ctx = TurnContext::new(
            event.clone(),
            flow.clone(),
            session.variables.clone(),
            self.delivery.clone(),
            self.integrations.clone(),
            self.config.clone(),
        );
        let mut records = Vec::new();

        // A fresh session enters at the start node and runs its handler. A
        // suspended session does not re-run the node it suspended at; the
        // event's handle selects the edge to leave it through, falling back
        // to the default edge, and no edge at all completes the flow.
        let mut current = match session.status {
            SessionStatus::Idle => Some(flow.start_node()),
            _ => session
                .current_node_id
                .as_deref()
                .and_then(|node_id| flow.next_node(node_id, event.resume_handle())),
        };

        let mut steps = 0usize;
        let (status, node_id, error) = loop {
            let Some(node) = current else {
                break (SessionStatus::Completed, None, None);
            };
            if steps >= self.config.max_steps_per_turn {
                break (
                    SessionStatus::Failed,
                    Some(node.id.clone()),
                    Some(NodeError::StepLimit(self.config.max_steps_per_turn)),
                );
            }
            steps += 1;

            let started = Utc::now();
            let result = match self.registry.get(&node.node_type) {
                Some(handler) => handler.handle(node, &mut ctx).await,
                None => Err(NodeError::UnknownNodeType(node.node_type.clone())),
            };
            records.push(NodeRecord {
                node_id: node.id.clone(),
                started,
                finished: Utc::now(),
                result: result.clone(),
            });

            match result {
                Ok(Outcome::Advance(handle)) => {
                    current = flow.next_node(&node.id, handle.as_deref());
                }
                Ok(Outcome::Suspend(_)) => {
                    break (SessionStatus::WaitingForInput, Some(node.id.clone()), None);
                }
                Err(e) => break (SessionStatus::Failed, Some(node.id.clone()), Some(e)),
            }
        };

        let update = SessionUpdate {
            current_node_id: node_id.clone(),
            variables: ctx.into_variables(),
            status,
            last_error: error.as_ref().map(|e| e.to_string()),
        };
        let outcome = match status {
            SessionStatus::WaitingForInput => TurnOutcome::WaitingForInput {
                session_id: session.id.clone(),
                node_id: node_id.unwrap_or_default(),
            },
            SessionStatus::Failed => TurnOutcome::Failed {
                session_id: session.id.clone(),
                error: error.unwrap_or(NodeError::Aborted),
            },
            _ => TurnOutcome::Completed {
                session_id: session.id.clone(),
            },
        };
        (update, outcome, records)
    }
}
