//! Node type registry port.
//!
//! The runtime never owns node implementations: it asks a [`Registry`] for a
//! factory and the declared interface of each node type it compiles. The
//! registry is read-only from the runtime's point of view.

use std::collections::BTreeMap;
use std::sync::Arc;

use weft_types::interface::NodeInterface;
use weft_types::workflow::NodeDefinition;

use super::node::{Node, NodeDyn, NodeError};

/// Builds a node instance for one definition.
pub type NodeFactory =
    Arc<dyn Fn(&NodeDefinition) -> Result<Arc<dyn NodeDyn>, NodeError> + Send + Sync>;

/// A registered node type.
#[derive(Clone)]
pub struct RegistryEntry {
    pub interface: NodeInterface,
    pub factory: NodeFactory,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Lookup from node type name to implementation and interface.
pub trait Registry: Send + Sync {
    fn lookup(&self, node_type: &str) -> Option<&RegistryEntry>;

    /// Registered type names, sorted.
    fn node_types(&self) -> Vec<String>;
}

/// Map-backed registry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type with an explicit factory.
    pub fn register(&mut self, node_type: impl Into<String>, entry: RegistryEntry) -> &mut Self {
        self.entries.insert(node_type.into(), entry);
        self
    }

    /// Register a stateless node type that shares one instance across nodes.
    pub fn register_shared<N: Node + 'static>(
        &mut self,
        node_type: impl Into<String>,
        interface: NodeInterface,
        node: N,
    ) -> &mut Self {
        let shared: Arc<dyn NodeDyn> = Arc::new(node);
        let factory: NodeFactory = Arc::new(move |_: &NodeDefinition| Ok::<_, NodeError>(shared.clone()));
        self.register(node_type, RegistryEntry { interface, factory })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Registry for InMemoryRegistry {
    fn lookup(&self, node_type: &str) -> Option<&RegistryEntry> {
        self.entries.get(node_type)
    }

    fn node_types(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::EchoNode;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = InMemoryRegistry::new();
        registry
            .register_shared("echo", NodeInterface::default().with_param("text", "str"), EchoNode)
            .register_shared("echo2", NodeInterface::default(), EchoNode);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.node_types(), vec!["echo", "echo2"]);
        let entry = registry.lookup("echo").unwrap();
        assert!(entry.interface.params.contains_key("text"));
        assert!((entry.factory)(&NodeDefinition::new("a", "echo")).is_ok());
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_factory_can_reject_definition() {
        let mut registry = InMemoryRegistry::new();
        let factory: NodeFactory = Arc::new(|def: &NodeDefinition| {
            if def.params.contains_key("url") {
                Ok(Arc::new(EchoNode) as Arc<dyn NodeDyn>)
            } else {
                Err(NodeError::Configuration(format!("node '{}' needs a url", def.id)))
            }
        });
        registry.register(
            "fetch",
            RegistryEntry {
                interface: NodeInterface::default(),
                factory,
            },
        );

        let entry = registry.lookup("fetch").unwrap();
        let err = (entry.factory)(&NodeDefinition::new("f", "fetch")).err().unwrap();
        assert_eq!(err.to_string(), "configuration error: node 'f' needs a url");
    }
}
