//! botflow drives operator-authored conversational flows: directed graphs of
//! message, decision, and integration nodes executed one claimed turn at a
//! time against durable per-conversation sessions.
//!
//! The pieces compose left to right: a channel adapter normalizes inbound
//! traffic into [`event::InboundEvent`]s, the [`engine::Engine`] claims the
//! conversation's session and traverses the compiled flow, and node handlers
//! in [`node`] perform the per-step work through the [`channel`] traits.

pub mod channel;
pub mod config;
pub mod engine;
pub mod event;
pub mod flow;
pub mod harness;
pub mod node;
pub mod session;
pub mod state;
pub mod trigger;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, TurnOutcome, TurnReport};
pub use event::InboundEvent;
pub use flow::{CompiledFlow, FlowDefinition, FlowStore, InMemoryFlowStore};
pub use session::{Session, SessionStatus, SessionStore};
pub use state::{StateValue, Variables};
