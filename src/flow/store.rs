use crate::flow::graph::{CompiledFlow, FlowDefinition, FlowError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::fs;
use std::sync::Arc;
use tracing::info;

/// Read-only flow lookup as the engine sees it. The authoring side registers
/// new versions; running sessions always resolve the exact version they
/// started with.
#[async_trait]
pub trait FlowStore: Send + Sync + Debug {
    async fn get(&self, flow_id: &str, version: u32) -> Option<Arc<CompiledFlow>>;
    async fn latest(&self, flow_id: &str) -> Option<Arc<CompiledFlow>>;
    /// Latest version of every registered flow, for trigger resolution.
    async fn list_latest(&self) -> Vec<Arc<CompiledFlow>>;
}

#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<(String, u32), Arc<CompiledFlow>>,
    latest: DashMap<String, u32>,
}

impl InMemoryFlowStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Compiles and publishes a flow version. Re-registering an existing
    /// (id, version) replaces it; in-flight sessions are unaffected because
    /// they hold the Arc they resolved at claim time.
    pub fn register(&self, def: FlowDefinition) -> Result<Arc<CompiledFlow>, FlowError> {
        let compiled = Arc::new(def.compile()?);
        let id = compiled.id().to_string();
        let version = compiled.version();
        self.flows.insert((id.clone(), version), compiled.clone());
        self.latest
            .entry(id.clone())
            .and_modify(|v| *v = (*v).max(version))
            .or_insert(version);
        info!(flow_id = %id, version, warnings = compiled.warnings().len(), "registered flow");
        Ok(compiled)
    }

    pub fn remove(&self, flow_id: &str) {
        self.flows.retain(|(id, _), _| id != flow_id);
        self.latest.remove(flow_id);
        info!(flow_id, "removed flow");
    }

    pub fn load_flow_from_file(path: &str) -> Result<FlowDefinition, FlowError> {
        let json = fs::read_to_string(path).map_err(|e| FlowError::Io(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| FlowError::Parse(e.to_string()))
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn get(&self, flow_id: &str, version: u32) -> Option<Arc<CompiledFlow>> {
        self.flows
            .get(&(flow_id.to_string(), version))
            .map(|e| e.value().clone())
    }

    async fn latest(&self, flow_id: &str) -> Option<Arc<CompiledFlow>> {
        let version = *self.latest.get(flow_id)?.value();
        self.get(flow_id, version).await
    }

    async fn list_latest(&self) -> Vec<Arc<CompiledFlow>> {
        let mut flows = Vec::with_capacity(self.latest.len());
        for entry in self.latest.iter() {
            if let Some(flow) = self.flows.get(&(entry.key().clone(), *entry.value())) {
                flows.push(flow.value().clone());
            }
        }
        flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn def(id: &str, version: u32) -> FlowDefinition {
        serde_json::from_value(json!({
            "id": id,
            "version": version,
            "nodes": [
                {"id": "n1", "type": "start"},
                {"id": "n2", "type": "message", "data": {"message": "Hi"}}
            ],
            "edges": [{"source": "n1", "target": "n2"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_versioned_lookup() {
        let store = InMemoryFlowStore::new();
        store.register(def("f1", 1)).unwrap();
        store.register(def("f1", 2)).unwrap();

        assert_eq!(store.get("f1", 1).await.unwrap().version(), 1);
        assert_eq!(store.latest("f1").await.unwrap().version(), 2);
        assert!(store.get("f1", 3).await.is_none());
    }

    #[tokio::test]
    async fn test_latest_does_not_regress() {
        let store = InMemoryFlowStore::new();
        store.register(def("f1", 2)).unwrap();
        store.register(def("f1", 1)).unwrap();
        assert_eq!(store.latest("f1").await.unwrap().version(), 2);
    }

    #[tokio::test]
    async fn test_list_latest_and_remove() {
        let store = InMemoryFlowStore::new();
        store.register(def("a", 1)).unwrap();
        store.register(def("b", 1)).unwrap();
        assert_eq!(store.list_latest().await.len(), 2);

        store.remove("a");
        assert!(store.latest("a").await.is_none());
        assert_eq!(store.list_latest().await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            json!({
                "id": "f1",
                "nodes": [{"id": "n1", "type": "start"}]
            })
        )
        .unwrap();

        let def = InMemoryFlowStore::load_flow_from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(def.id, "f1");

        assert!(matches!(
            InMemoryFlowStore::load_flow_from_file("/nonexistent/flow.json"),
            Err(FlowError::Io(_))
        ));
    }
}
