use crate::session::{Session, SessionError, SessionStatus, SessionStore, SessionUpdate};
use crate::state::Variables;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use moka::future::Cache;
use moka::notification::RemovalCause;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// In-process session store. Sessions live in a `DashMap` whose entry guard
/// makes claim/persist atomic; the conversation->session route lives in a
/// second `DashMap` whose entry guard makes creation atomic at conversation
/// granularity, so duplicate concurrent events cannot fan out into two
/// sessions. A moka cache with a time-to-idle tracks conversation activity:
/// when a conversation idles past the TTL its session is abandoned (marked
/// `failed`) and the route dropped so the next inbound event starts fresh.
///
/// Terminal sessions stay in the session map for audit/inspection; only
/// their route entry is dropped.
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
    routes: Arc<DashMap<String, String>>,
    idle: Cache<String, String>,
    ttl: TimeDelta,
}

impl InMemorySessionStore {
    /// `ttl_secs` bounds how long an untouched conversation keeps routing to
    /// its session before it is abandoned.
    pub fn new(ttl_secs: u64) -> Arc<Self> {
        let sessions: Arc<DashMap<String, Session>> = Arc::new(DashMap::new());
        let routes: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
        let ttl = TimeDelta::seconds(ttl_secs as i64);
        let idle = Cache::builder()
            .time_to_idle(Duration::from_secs(ttl_secs))
            .eviction_listener({
                let sessions = sessions.clone();
                let routes = routes.clone();
                move |conversation_id: Arc<String>, _session_id: String, cause| {
                    if cause == RemovalCause::Expired {
                        abandon_if_stale(&sessions, &routes, &conversation_id, ttl);
                    }
                }
            })
            .build();
        Arc::new(Self {
            sessions,
            routes,
            idle,
            ttl,
        })
    }
}

/// Fails the conversation's routed session if it has been untouched for at
/// least the TTL and drops the route. Stale-checked so a late expiry
/// notification cannot abandon a freshly created session.
fn abandon_if_stale(
    sessions: &DashMap<String, Session>,
    routes: &DashMap<String, String>,
    conversation_id: &str,
    ttl: TimeDelta,
) {
    let now = Utc::now();
    let stale_id = routes.get(conversation_id).and_then(|routed| {
        let session = sessions.get(routed.value())?;
        let stale = !session.status.is_terminal() && now - session.updated_at >= ttl;
        stale.then(|| routed.value().clone())
    });
    let Some(session_id) = stale_id else { return };

    routes.remove_if(conversation_id, |_, routed| routed == &session_id);
    if let Some(mut entry) = sessions.get_mut(&session_id) {
        let session = entry.value_mut();
        if !session.status.is_terminal() {
            session.status = SessionStatus::Failed;
            session.last_error = Some("conversation idle timeout".to_string());
            session.claim_token = None;
            session.claimed_until = None;
            session.updated_at = now;
            warn!(%session_id, conversation_id, "abandoned idle session");
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_active(&self, conversation_id: &str) -> Option<Session> {
        let session_id = self.routes.get(conversation_id).map(|e| e.value().clone())?;
        if self.idle.get(conversation_id).await.is_none() {
            // the conversation idled past the TTL; its session is abandoned
            abandon_if_stale(&self.sessions, &self.routes, conversation_id, self.ttl);
            if !self.routes.contains_key(conversation_id) {
                return None;
            }
            self.idle
                .insert(conversation_id.to_string(), session_id.clone())
                .await;
        }

        let session = self.sessions.get(&session_id).map(|e| e.value().clone());
        match session {
            Some(s) if !s.status.is_terminal() => Some(s),
            _ => {
                self.routes
                    .remove_if(conversation_id, |_, routed| routed == &session_id);
                self.idle.invalidate(conversation_id).await;
                None
            }
        }
    }

    async fn create(
        &self,
        conversation_id: &str,
        flow_id: &str,
        flow_version: u32,
    ) -> Result<Session, SessionError> {
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            flow_version,
            conversation_id: conversation_id.to_string(),
            current_node_id: None,
            variables: Variables::new(),
            status: SessionStatus::Idle,
            last_error: None,
            claim_token: None,
            claimed_until: None,
            updated_at: Utc::now(),
        };

        // the idle tracker is touched before the route exists, so a reader
        // that sees the route always finds a live idle entry
        self.idle
            .insert(conversation_id.to_string(), session.id.clone())
            .await;

        // the route entry guard makes check-and-create atomic: of two racing
        // duplicate events exactly one creates, the other resolves to the
        // winner's session via find_active
        match self.routes.entry(conversation_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = self
                    .sessions
                    .get(occupied.get())
                    .is_some_and(|s| !s.status.is_terminal());
                if live {
                    return Err(SessionError::ActiveSessionExists {
                        conversation_id: conversation_id.to_string(),
                    });
                }
                self.sessions.insert(session.id.clone(), session.clone());
                occupied.insert(session.id.clone());
            }
            Entry::Vacant(vacant) => {
                self.sessions.insert(session.id.clone(), session.clone());
                vacant.insert(session.id.clone());
            }
        }

        info!(session_id = %session.id, conversation_id, flow_id, "created session");
        Ok(session)
    }

    async fn claim(
        &self,
        session_id: &str,
        token: &str,
        lease: Duration,
    ) -> Result<Session, SessionError> {
        let now = Utc::now();
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let session = entry.value_mut();

        if session.status.is_terminal() {
            return Err(SessionError::Terminal {
                session_id: session_id.to_string(),
            });
        }
        let lease_live = session
            .claimed_until
            .is_some_and(|until| session.claim_token.is_some() && until > now);
        if lease_live {
            return Err(SessionError::Busy {
                session_id: session_id.to_string(),
            });
        }

        let snapshot = session.clone();
        session.claim_token = Some(token.to_string());
        session.claimed_until =
            Some(now + TimeDelta::from_std(lease).unwrap_or_else(|_| TimeDelta::seconds(3600)));
        session.status = SessionStatus::Running;
        session.updated_at = now;
        Ok(snapshot)
    }

    async fn persist_and_release(
        &self,
        session_id: &str,
        token: &str,
        update: SessionUpdate,
    ) -> Result<(), SessionError> {
        let conversation_id;
        let terminal;
        {
            let mut entry = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            let session = entry.value_mut();

            if session.claim_token.as_deref() != Some(token) {
                return Err(SessionError::StaleClaim {
                    session_id: session_id.to_string(),
                });
            }

            session.current_node_id = update.current_node_id;
            session.variables = update.variables;
            session.status = update.status;
            session.last_error = update.last_error;
            session.claim_token = None;
            session.claimed_until = None;
            session.updated_at = Utc::now();
            conversation_id = session.conversation_id.clone();
            terminal = session.status.is_terminal();
        }
        // drop the entry guard before touching the route and the async cache
        if terminal {
            self.routes
                .remove_if(&conversation_id, |_, routed| routed.as_str() == session_id);
            self.idle.invalidate(&conversation_id).await;
        }
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|e| e.value().clone())
    }
}
