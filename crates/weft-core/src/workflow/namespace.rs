//! Write-scoping proxy over a store.
//!
//! A `NamespacedStore` routes ordinary writes from node `s` into `state[s]`,
//! while reserved keys go straight to the root. Reads are not scoped: the
//! node's own namespace is consulted first, then the root, so templates can
//! reach any earlier node's output as `${node_id.field}`.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::node::{Executable, NodeError};
use super::store::{Ledger, SharedStore, Store, is_reserved_key};

pub struct NamespacedStore<'a> {
    backing: &'a mut dyn Store,
    namespace: String,
}

impl<'a> NamespacedStore<'a> {
    pub fn new(backing: &'a mut dyn Store, namespace: impl Into<String>) -> Self {
        Self {
            backing,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn own(&self) -> Option<Cow<'_, Value>> {
        self.backing.get(&self.namespace)
    }
}

impl Store for NamespacedStore<'_> {
    fn get(&self, key: &str) -> Option<Cow<'_, Value>> {
        if is_reserved_key(key) {
            return self.backing.get(key);
        }
        let scoped = match self.own() {
            Some(Cow::Borrowed(ns)) => ns.get(key).map(Cow::Borrowed),
            Some(Cow::Owned(ns)) => ns.get(key).cloned().map(Cow::Owned),
            None => None,
        };
        scoped.or_else(|| self.backing.get(key))
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        if is_reserved_key(key) {
            return self.backing.get_mut(key);
        }
        self.backing
            .get_mut(&self.namespace)
            .and_then(|ns| ns.get_mut(key))
    }

    fn set(&mut self, key: &str, value: Value) {
        if is_reserved_key(key) {
            self.backing.set(key, value);
            return;
        }
        match self.backing.get_mut(&self.namespace) {
            Some(Value::Object(ns)) => {
                ns.insert(key.to_string(), value);
            }
            _ => {
                let mut ns = Map::new();
                ns.insert(key.to_string(), value);
                self.backing.set(&self.namespace, Value::Object(ns));
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        if is_reserved_key(key) {
            return self.backing.remove(key);
        }
        match self.backing.get_mut(&self.namespace) {
            Some(Value::Object(ns)) => ns.remove(key),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.backing.keys().into_iter().collect();
        if let Some(ns) = self.own() {
            if let Some(fields) = ns.as_object() {
                keys.extend(fields.keys().cloned());
            }
        }
        keys.into_iter().collect()
    }

    fn fork(&self) -> SharedStore {
        self.backing.fork()
    }

    fn ledger(&self) -> &Arc<Ledger> {
        self.backing.ledger()
    }
}

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// Runs the inner layer against a proxy scoped to `node_id`.
pub struct NamespacedNode {
    node_id: String,
    inner: Box<dyn Executable>,
}

impl NamespacedNode {
    pub fn new(node_id: impl Into<String>, inner: Box<dyn Executable>) -> Self {
        Self {
            node_id: node_id.into(),
            inner,
        }
    }
}

impl Executable for NamespacedNode {
    fn run<'a>(&'a self, store: &'a mut dyn Store) -> BoxFuture<'a, Result<String, NodeError>> {
        Box::pin(async move {
            let mut scoped = NamespacedStore::new(store, self.node_id.as_str());
            self.inner.run(&mut scoped).await
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::workflow::store::WARNINGS_KEY;

    #[test]
    fn test_writes_land_in_namespace() {
        let mut root = SharedStore::new();
        {
            let mut ns = NamespacedStore::new(&mut root, "s");
            ns.set("x", json!(1));
            ns.set("y", json!("two"));
        }
        assert_eq!(root.get("s").unwrap().as_ref(), &json!({"x": 1, "y": "two"}));
        assert!(root.get("x").is_none());
    }

    #[test]
    fn test_reserved_keys_bypass_namespace() {
        let mut root = SharedStore::new();
        {
            let mut ns = NamespacedStore::new(&mut root, "s");
            ns.set("__meta__", json!({"k": 1}));
            assert_eq!(ns.get("__meta__").unwrap().as_ref(), &json!({"k": 1}));
        }
        assert_eq!(root.get("__meta__").unwrap().as_ref(), &json!({"k": 1}));
        assert!(root.get("s").is_none());
    }

    #[test]
    fn test_reads_see_own_namespace_then_root() {
        let mut root = SharedStore::new();
        root.set("other", json!({"out": 5}));
        root.set("x", json!("root-x"));
        root.set("s", json!({"x": "own-x"}));

        let ns = NamespacedStore::new(&mut root, "s");
        assert_eq!(ns.get("x").unwrap().as_ref(), &json!("own-x"));
        assert_eq!(ns.get("other").unwrap().as_ref(), &json!({"out": 5}));
        assert!(ns.get("missing").is_none());
    }

    #[test]
    fn test_keys_union_own_and_root() {
        let mut root = SharedStore::new();
        root.set("a", json!(1));
        root.set("s", json!({"b": 2}));
        let ns = NamespacedStore::new(&mut root, "s");
        assert_eq!(ns.keys(), vec!["a", "b", "s"]);
    }

    #[test]
    fn test_remove_only_touches_namespace() {
        let mut root = SharedStore::new();
        root.set("x", json!("root"));
        root.set("s", json!({"x": "own"}));
        {
            let mut ns = NamespacedStore::new(&mut root, "s");
            assert_eq!(ns.remove("x"), Some(json!("own")));
            assert_eq!(ns.remove("x"), None);
        }
        assert_eq!(root.get("x").unwrap().as_ref(), &json!("root"));
    }

    #[test]
    fn test_non_object_namespace_is_replaced() {
        let mut root = SharedStore::new();
        root.set("s", json!("input value"));
        {
            let mut ns = NamespacedStore::new(&mut root, "s");
            ns.set("x", json!(1));
        }
        assert_eq!(root.get("s").unwrap().as_ref(), &json!({"x": 1}));
    }

    #[test]
    fn test_ledger_shared_through_proxy() {
        let mut root = SharedStore::new();
        let ns = NamespacedStore::new(&mut root, "s");
        ns.ledger().push_warning(&weft_types::diagnostic::Diagnostic::warning(
            weft_types::diagnostic::DiagnosticKind::UnresolvedReference,
            "missing",
        ));
        assert!(ns.get(WARNINGS_KEY).is_some());
        drop(ns);
        assert!(root.get(WARNINGS_KEY).is_some());
    }

    #[test]
    fn test_nested_proxy_writes_through() {
        let mut root = SharedStore::new();
        {
            let mut outer = NamespacedStore::new(&mut root, "s");
            outer.set("a", json!(1));
            let mut fork = outer.fork();
            fork.set("untouched", json!(true));
        }
        assert_eq!(root.keys(), vec!["s"]);
    }
}
