//! Outermost layer: tracing spans, timing, and `__execution__` bookkeeping.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::Instrument;
use uuid::Uuid;

use super::node::{Executable, NodeError};
use super::store::{EXECUTION_KEY, Store};

/// Write a fresh `__execution__` record for a run.
pub fn init_execution(store: &mut dyn Store, run_id: Uuid, started_at: DateTime<Utc>) {
    store.set(
        EXECUTION_KEY,
        json!({
            "run_id": run_id.to_string(),
            "started_at": started_at.to_rfc3339(),
            "completed_nodes": [],
            "node_actions": {},
            "node_durations_ms": {},
            "failed_node": null,
        }),
    );
}

fn update_execution(store: &mut dyn Store, update: impl FnOnce(&mut Map<String, Value>)) {
    let mut record = match store.remove(EXECUTION_KEY) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    update(&mut record);
    store.set(EXECUTION_KEY, Value::Object(record));
}

fn insert_field(record: &mut Map<String, Value>, key: &str, field: &str, value: Value) {
    let slot = record
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Some(map) = slot.as_object_mut() {
        map.insert(field.to_string(), value);
    }
}

fn record_completion(store: &mut dyn Store, node_id: &str, action: &str, elapsed_ms: u64) {
    update_execution(store, |record| {
        match record
            .entry("completed_nodes")
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(done) => done.push(json!(node_id)),
            other => *other = json!([node_id]),
        }
        insert_field(record, "node_actions", node_id, json!(action));
        insert_field(record, "node_durations_ms", node_id, json!(elapsed_ms));
    });
}

fn record_failure(store: &mut dyn Store, node_id: &str, elapsed_ms: u64) {
    update_execution(store, |record| {
        record.insert("failed_node".to_string(), json!(node_id));
        insert_field(record, "node_durations_ms", node_id, json!(elapsed_ms));
    });
}

/// Wraps a composed chain with a span and execution metadata.
pub struct InstrumentedNode {
    node_id: String,
    node_type: String,
    inner: Box<dyn Executable>,
}

impl InstrumentedNode {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>, inner: Box<dyn Executable>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            inner,
        }
    }
}

impl Executable for InstrumentedNode {
    fn run<'a>(&'a self, store: &'a mut dyn Store) -> BoxFuture<'a, Result<String, NodeError>> {
        let span = tracing::info_span!("node", node_id = %self.node_id, node_type = %self.node_type);
        Box::pin(
            async move {
                let started = Instant::now();
                let result = self.inner.run(&mut *store).await;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(action) => {
                        tracing::debug!(action = %action, elapsed_ms, "node completed");
                        record_completion(store, &self.node_id, action, elapsed_ms);
                    }
                    Err(err) => {
                        tracing::warn!(elapsed_ms, error = %err, "node failed");
                        record_failure(store, &self.node_id, elapsed_ms);
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}
