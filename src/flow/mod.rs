pub mod condition;
pub mod graph;
pub mod store;

pub use condition::{CmpOp, Condition, ConditionParseError};
pub use graph::{CompiledFlow, Edge, FlowDefinition, FlowError, Node, ValidationWarning};
pub use store::{FlowStore, InMemoryFlowStore};
