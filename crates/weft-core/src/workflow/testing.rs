//! Node fixtures shared by the runtime's tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{Value, json};
use weft_types::interface::{FieldSpec, NodeInterface};
use weft_types::workflow::DEFAULT_ACTION;

use super::node::{Node, NodeError, write_output};
use super::registry::InMemoryRegistry;
use super::store::Store;

/// Writes its params back out unchanged.
pub struct EchoNode;

impl Node for EchoNode {
    async fn exec(&self, input: &Value) -> Result<Value, NodeError> {
        Ok(input.clone())
    }
}

/// Always fails.
pub struct FailingNode;

impl Node for FailingNode {
    async fn exec(&self, _input: &Value) -> Result<Value, NodeError> {
        Err(NodeError::execution("deliberate failure"))
    }
}

/// Reports the `route` param as its action label.
pub struct RouterNode;

impl Node for RouterNode {
    async fn exec(&self, input: &Value) -> Result<Value, NodeError> {
        Ok(input.clone())
    }

    fn post(&self, store: &mut dyn Store, _input: &Value, output: Value) -> Result<String, NodeError> {
        let action = output["route"].as_str().unwrap_or(DEFAULT_ACTION).to_string();
        write_output(store, output);
        Ok(action)
    }
}

/// Fails the first `fail_times` calls, then echoes.
pub struct FlakyNode {
    pub fail_times: u32,
    pub calls: Arc<AtomicU32>,
}

impl Node for FlakyNode {
    async fn exec(&self, input: &Value) -> Result<Value, NodeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_times {
            Err(NodeError::execution(format!("flake {}", n + 1)))
        } else {
            Ok(input.clone())
        }
    }
}

/// Never finishes within a test's patience.
pub struct SlowNode;

impl Node for SlowNode {
    async fn exec(&self, _input: &Value) -> Result<Value, NodeError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(json!({}))
    }
}

/// A search-like interface with nested structure.
pub fn search_interface() -> NodeInterface {
    NodeInterface {
        description: "Searches and returns structured hits".into(),
        ..NodeInterface::default()
    }
    .with_param("query", "str")
    .with_output(
        "hits",
        FieldSpec::of("list[dict]")
            .with_field("title", FieldSpec::of("str"))
            .with_field("score", FieldSpec::of("float")),
    )
    .with_output(
        "meta",
        FieldSpec::of("dict")
            .with_field("total", FieldSpec::of("int"))
            .with_field("engine", FieldSpec::of("str")),
    )
}

/// Registry with the fixtures above plus typed variants for type checking.
pub fn test_registry() -> InMemoryRegistry {
    let mut registry = InMemoryRegistry::new();
    registry
        .register_shared("echo", NodeInterface::default(), EchoNode)
        .register_shared("fail", NodeInterface::default(), FailingNode)
        .register_shared("router", NodeInterface::default(), RouterNode)
        .register_shared("slow", NodeInterface::default(), SlowNode)
        .register_shared("search", search_interface(), EchoNode)
        .register_shared(
            "summarize",
            NodeInterface::default()
                .with_param("text", "str")
                .with_output("summary", FieldSpec::of("str")),
            EchoNode,
        )
        .register_shared(
            "count",
            NodeInterface::default()
                .with_param("items", "list")
                .with_param("limit", "float")
                .with_output("total", FieldSpec::of("int")),
            EchoNode,
        );
    registry
}
