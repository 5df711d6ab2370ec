//! Batch iteration: run one node once per item of a resolved list.
//!
//! Every item executes against its own fork of the run state: the node's own
//! namespace is cleared and the item is injected at the root under the
//! configured alias. The real store is written exactly once, after all items
//! finished, with the aggregate `{results, count, success_count, error_count,
//! errors?}`. Forks share the run ledger, so accounting still aggregates.
//!
//! Items run sequentially by default. In parallel mode an ordered bounded
//! stream dispatches them concurrently; results keep input order either way.

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream;
use serde_json::{Map, Value, json};
use weft_types::workflow::{DEFAULT_ACTION, ErrorHandling};

use super::node::{Executable, NodeError};
use super::store::{SharedStore, Store};
use super::template::{TemplateError, TemplatePath};
use super::typecheck::describe_value;

/// Batch settings after compile-time validation.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub items: TemplatePath,
    pub alias: String,
    pub error_handling: ErrorHandling,
    /// `Some(n)` runs up to `n` items concurrently.
    pub concurrency: Option<usize>,
}

pub struct BatchNode {
    node_id: String,
    settings: BatchSettings,
    inner: Box<dyn Executable>,
}

struct ItemOutcome {
    index: usize,
    item: Value,
    result: Result<Value, NodeError>,
}

impl BatchNode {
    pub fn new(node_id: impl Into<String>, settings: BatchSettings, inner: Box<dyn Executable>) -> Self {
        Self {
            node_id: node_id.into(),
            settings,
            inner,
        }
    }

    fn resolve_items(&self, store: &dyn Store) -> Result<Vec<Value>, NodeError> {
        let resolved = self.settings.items.resolve(store).ok_or_else(|| NodeError::Template {
            param: "batch.items".to_string(),
            source: TemplateError::Unresolved {
                reference: self.settings.items.to_string(),
                template: format!("${{{}}}", self.settings.items),
            },
        })?;
        match resolved.into_owned() {
            Value::Array(items) => Ok(items),
            other => Err(NodeError::BatchItemsNotList {
                actual: describe_value(&other),
            }),
        }
    }

    /// Isolated state for one item.
    fn prepare_fork(&self, store: &dyn Store, item: &Value) -> SharedStore {
        let mut fork = store.fork();
        fork.remove(&self.node_id);
        fork.set(&self.settings.alias, item.clone());
        fork
    }

    async fn run_item(&self, index: usize, item: Value, mut fork: SharedStore) -> ItemOutcome {
        let result = match self.inner.run(&mut fork).await {
            Ok(_) => {
                let output = fork.remove(&self.node_id).unwrap_or(Value::Null);
                match signaled_error(&output) {
                    Some(message) => Err(NodeError::Execution(message)),
                    None => Ok(output),
                }
            }
            Err(err) => Err(err),
        };
        ItemOutcome { index, item, result }
    }

    async fn run_items(&self, store: &dyn Store, items: Vec<Value>) -> Result<Aggregate, NodeError> {
        let total = items.len();
        let mut aggregate = Aggregate::with_len(total);
        let fail_fast = self.settings.error_handling == ErrorHandling::FailFast;

        // Forks are made as items are dispatched, so at most `limit` exist.
        let limit = self.settings.concurrency.unwrap_or(1).max(1);
        let mut outcomes = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let fork = self.prepare_fork(store, &item);
                self.run_item(index, item, fork)
            })
            .buffered(limit);

        while let Some(outcome) = outcomes.next().await {
            match outcome.result {
                Ok(output) => aggregate.succeed(outcome.index, output),
                Err(err) if fail_fast => {
                    return Err(NodeError::BatchItem {
                        index: outcome.index,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        index = outcome.index,
                        error = %err,
                        "batch item failed, continuing"
                    );
                    aggregate.fail(outcome.index, outcome.item, &err);
                }
            }
        }
        Ok(aggregate)
    }
}

impl Executable for BatchNode {
    fn run<'a>(&'a self, store: &'a mut dyn Store) -> BoxFuture<'a, Result<String, NodeError>> {
        Box::pin(async move {
            let items = self.resolve_items(&*store)?;
            tracing::debug!(
                node_id = %self.node_id,
                items = items.len(),
                concurrency = self.settings.concurrency.unwrap_or(1),
                "starting batch"
            );
            let aggregate = self.run_items(&*store, items).await?;
            tracing::debug!(
                node_id = %self.node_id,
                success_count = aggregate.success_count,
                error_count = aggregate.errors.len(),
                "batch finished"
            );
            store.set(&self.node_id, aggregate.into_value());
            Ok(DEFAULT_ACTION.to_string())
        })
    }
}

/// The message of a result that reports failure through a truthy `error` field.
///
/// A null or absent result is a legitimate value, not an error.
fn signaled_error(output: &Value) -> Option<String> {
    let error = output.as_object()?.get("error")?;
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("item reported an error".to_string()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

struct Aggregate {
    results: Vec<Value>,
    success_count: usize,
    errors: Vec<Value>,
}

impl Aggregate {
    fn with_len(len: usize) -> Self {
        Self {
            results: vec![Value::Null; len],
            success_count: 0,
            errors: Vec::new(),
        }
    }

    fn succeed(&mut self, index: usize, output: Value) {
        self.results[index] = output;
        self.success_count += 1;
    }

    fn fail(&mut self, index: usize, item: Value, err: &NodeError) {
        self.errors.push(json!({
            "index": index,
            "item": item,
            "error": err.to_string(),
        }));
    }

    fn into_value(self) -> Value {
        let mut map = Map::new();
        map.insert("count".into(), json!(self.results.len()));
        map.insert("success_count".into(), json!(self.success_count));
        map.insert("error_count".into(), json!(self.errors.len()));
        map.insert("results".into(), Value::Array(self.results));
        if !self.errors.is_empty() {
            map.insert("errors".into(), Value::Array(self.errors));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::workflow::namespace::NamespacedNode;
    use crate::workflow::node::{Node, NodeDyn, NodeRunner, Params};
    use crate::workflow::params::{CompiledParams, TemplatedNode};
    use crate::workflow::store::LLM_CALLS_KEY;
    use crate::workflow::testing::EchoNode;
    use weft_types::config::ResolutionMode;

    /// Doubles `n`; fails on `n == 2`; flags an error field on `n == 3`.
    struct Doubler {
        calls: AtomicUsize,
    }

    impl Node for Doubler {
        async fn exec(&self, input: &Value) -> Result<Value, NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = input["n"].as_i64().unwrap_or_default();
            match n {
                2 => Err(NodeError::execution("two is not allowed")),
                3 => Ok(json!({"error": "three is unlucky"})),
                _ => Ok(json!({"doubled": n * 2})),
            }
        }
    }

    /// Sleeps inversely to its index so later items finish first.
    struct Sleepy;

    impl Node for Sleepy {
        fn prep(&self, params: &Params, store: &dyn Store) -> Result<Value, NodeError> {
            store.ledger().record_llm_call(json!({"n": params["n"].clone()}));
            Ok(Value::Object(params.clone()))
        }

        async fn exec(&self, input: &Value) -> Result<Value, NodeError> {
            let n = input["n"].as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(40 - n * 10)).await;
            Ok(json!({"n": n}))
        }
    }

    /// Reports how many stores share the run ledger while it runs.
    struct ForkCounter;

    impl Node for ForkCounter {
        fn prep(&self, _params: &Params, store: &dyn Store) -> Result<Value, NodeError> {
            Ok(json!({"live": Arc::strong_count(store.ledger())}))
        }

        async fn exec(&self, input: &Value) -> Result<Value, NodeError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(input.clone())
        }
    }

    fn chain(node_id: &str, node: Arc<dyn NodeDyn>, params: Value) -> Box<dyn Executable> {
        let params = CompiledParams::compile(
            node_id,
            params.as_object().unwrap(),
            ResolutionMode::Strict,
        );
        Box::new(NamespacedNode::new(
            node_id,
            Box::new(TemplatedNode::new(params, NodeRunner::new(node_id, node))),
        ))
    }

    fn settings(items: &str, error_handling: ErrorHandling) -> BatchSettings {
        BatchSettings {
            items: TemplatePath::parse(items).unwrap(),
            alias: "item".into(),
            error_handling,
            concurrency: None,
        }
    }

    fn doubler_batch(error_handling: ErrorHandling) -> (BatchNode, Arc<Doubler>) {
        let node = Arc::new(Doubler {
            calls: AtomicUsize::new(0),
        });
        let batch = BatchNode::new(
            "double",
            settings("src.numbers", error_handling),
            chain("double", node.clone(), json!({"n": "${item}"})),
        );
        (batch, node)
    }

    fn store_with(numbers: Value) -> SharedStore {
        let mut store = SharedStore::new();
        store.set("src", json!({"numbers": numbers}));
        store
    }

    #[tokio::test]
    async fn test_empty_list() {
        let (batch, _) = doubler_batch(ErrorHandling::FailFast);
        let mut store = store_with(json!([]));
        batch.run(&mut store).await.unwrap();
        assert_eq!(
            store.get("double").unwrap().as_ref(),
            &json!({"results": [], "count": 0, "success_count": 0, "error_count": 0})
        );
    }

    #[tokio::test]
    async fn test_all_succeed_in_order() {
        let (batch, _) = doubler_batch(ErrorHandling::FailFast);
        let mut store = store_with(json!([1, 4, 5]));
        batch.run(&mut store).await.unwrap();
        let out = store.get("double").unwrap().into_owned();
        assert_eq!(
            out["results"],
            json!([{"doubled": 2}, {"doubled": 8}, {"doubled": 10}])
        );
        assert_eq!(out["success_count"], 3);
        assert!(out.get("errors").is_none());
    }

    #[tokio::test]
    async fn test_continue_records_failures() {
        let (batch, _) = doubler_batch(ErrorHandling::Continue);
        let mut store = store_with(json!([1, 2, 5]));
        batch.run(&mut store).await.unwrap();
        let out = store.get("double").unwrap().into_owned();
        assert_eq!(out["results"].as_array().unwrap().len(), 3);
        assert_eq!(out["results"][1], Value::Null);
        assert_eq!(out["count"], 3);
        assert_eq!(out["success_count"], 2);
        assert_eq!(out["error_count"], 1);
        assert_eq!(out["errors"][0]["index"], 1);
        assert_eq!(out["errors"][0]["item"], 2);
        assert!(out["errors"][0]["error"].as_str().unwrap().contains("two is not allowed"));
    }

    #[tokio::test]
    async fn test_continue_treats_error_field_as_failure() {
        let (batch, _) = doubler_batch(ErrorHandling::Continue);
        let mut store = store_with(json!([3, 1]));
        batch.run(&mut store).await.unwrap();
        let out = store.get("double").unwrap().into_owned();
        assert_eq!(out["results"], json!([null, {"doubled": 2}]));
        assert_eq!(out["errors"][0]["error"], "execution failed: three is unlucky");
    }

    #[tokio::test]
    async fn test_fail_fast_stops_and_leaves_state_untouched() {
        let (batch, node) = doubler_batch(ErrorHandling::FailFast);
        let mut store = store_with(json!([1, 2, 5]));
        let before = store.to_value();

        let err = batch.run(&mut store).await.unwrap_err();
        assert!(matches!(err, NodeError::BatchItem { index: 1, .. }));
        assert_eq!(node.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.to_value(), before);
    }

    #[tokio::test]
    async fn test_non_list_items_name_actual_type() {
        let (batch, _) = doubler_batch(ErrorHandling::FailFast);
        let mut store = store_with(json!({"not": "a list"}));
        let err = batch.run(&mut store).await.unwrap_err();
        assert!(matches!(&err, NodeError::BatchItemsNotList { actual } if actual == "dict"));
        assert_eq!(err.to_string(), "batch items must resolve to a list, got dict");
    }

    #[tokio::test]
    async fn test_items_auto_parse_from_string() {
        let (batch, _) = doubler_batch(ErrorHandling::FailFast);
        let mut store = SharedStore::new();
        store.set("src", json!("{\"numbers\": [5]}"));
        batch.run(&mut store).await.unwrap();
        assert_eq!(store.get("double").unwrap()["results"], json!([{"doubled": 10}]));
    }

    #[tokio::test]
    async fn test_items_isolated_from_each_other_and_prior_namespace() {
        let batch = BatchNode::new(
            "echo",
            settings("src.names", ErrorHandling::FailFast),
            chain("echo", Arc::new(EchoNode), json!({"name": "${item}"})),
        );
        let mut store = SharedStore::new();
        store.set("src", json!({"names": ["a", "b"]}));
        store.set("echo", json!({"stale": true}));

        batch.run(&mut store).await.unwrap();
        assert_eq!(
            store.get("echo").unwrap()["results"],
            json!([{"name": "a"}, {"name": "b"}])
        );
        assert!(store.get("item").is_none());
    }

    #[tokio::test]
    async fn test_parallel_keeps_input_order_and_shares_ledger() {
        let mut s = settings("src.numbers", ErrorHandling::FailFast);
        s.concurrency = Some(4);
        let batch = BatchNode::new(
            "sleepy",
            s,
            chain("sleepy", Arc::new(Sleepy), json!({"n": "${item}"})),
        );
        let mut store = store_with(json!([0, 1, 2, 3]));
        batch.run(&mut store).await.unwrap();

        assert_eq!(
            store.get("sleepy").unwrap()["results"],
            json!([{"n": 0}, {"n": 1}, {"n": 2}, {"n": 3}])
        );
        assert_eq!(store.get(LLM_CALLS_KEY).unwrap().as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_forks_are_created_as_items_run() {
        let items: Vec<Value> = (0..8).map(|n| json!(n)).collect();
        for (concurrency, max_live) in [(None, 2), (Some(3), 4)] {
            let mut s = settings("src.numbers", ErrorHandling::FailFast);
            s.concurrency = concurrency;
            let batch = BatchNode::new(
                "count",
                s,
                chain("count", Arc::new(ForkCounter), json!({})),
            );
            let mut store = store_with(Value::Array(items.clone()));
            batch.run(&mut store).await.unwrap();

            let out = store.get("count").unwrap().into_owned();
            let live: Vec<u64> = out["results"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r["live"].as_u64().unwrap())
                .collect();
            assert_eq!(live.len(), 8);
            assert!(live.iter().all(|&n| n <= max_live), "{concurrency:?}: {live:?}");
            assert_eq!(Arc::strong_count(store.ledger()), 1);
        }
    }

    #[test]
    fn test_signaled_error() {
        assert_eq!(signaled_error(&json!(null)), None);
        assert_eq!(signaled_error(&json!({"error": null})), None);
        assert_eq!(signaled_error(&json!({"error": false})), None);
        assert_eq!(signaled_error(&json!({"error": ""})), None);
        assert_eq!(signaled_error(&json!({"error": "bad"})), Some("bad".into()));
        assert!(signaled_error(&json!({"error": {"code": 3}})).is_some());
    }
}
