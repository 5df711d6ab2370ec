//! Run-scoped shared state.
//!
//! A `SharedStore` is created fresh for every run and passed by reference
//! through every layer. Keys of the form `__name__` are reserved: they always
//! live at the root and are never namespaced. Two of them, `__llm_calls__` and
//! `__warnings__`, are appenders backed by a [`Ledger`] that every fork of the
//! store shares, so accounting written inside an isolated batch item still
//! aggregates into the run.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use weft_types::diagnostic::Diagnostic;

/// Execution metadata maintained by the instrumentation layer.
pub const EXECUTION_KEY: &str = "__execution__";

/// Usage-accounting records appended by nodes.
pub const LLM_CALLS_KEY: &str = "__llm_calls__";

/// Run-time warnings.
pub const WARNINGS_KEY: &str = "__warnings__";

/// Whether `key` is a reserved, never-namespaced key (`__name__`).
pub fn is_reserved_key(key: &str) -> bool {
    key.len() > 4 && key.starts_with("__") && key.ends_with("__")
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Append-only accounting shared by a store and all of its forks.
#[derive(Debug, Default)]
pub struct Ledger {
    llm_calls: Mutex<Vec<Value>>,
    warnings: Mutex<Vec<Value>>,
}

impl Ledger {
    pub fn record_llm_call(&self, record: Value) {
        self.llm_calls.lock().push(record);
    }

    pub fn push_warning(&self, diagnostic: &Diagnostic) {
        let record = serde_json::to_value(diagnostic)
            .unwrap_or_else(|_| Value::String(diagnostic.to_string()));
        self.warnings.lock().push(record);
    }

    pub fn llm_calls(&self) -> Vec<Value> {
        self.llm_calls.lock().clone()
    }

    pub fn warnings(&self) -> Vec<Value> {
        self.warnings.lock().clone()
    }

    fn slot(&self, key: &str) -> Option<&Mutex<Vec<Value>>> {
        match key {
            LLM_CALLS_KEY => Some(&self.llm_calls),
            WARNINGS_KEY => Some(&self.warnings),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Key-value contract shared by the root store and namespace proxies.
///
/// Every layer and node sees state only through this trait, so a node runs
/// identically against the real store, a namespace proxy, or a batch fork.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Option<Cow<'_, Value>>;

    /// Mutable access to a stored value. Ledger-backed keys return `None`.
    fn get_mut(&mut self, key: &str) -> Option<&mut Value>;

    fn set(&mut self, key: &str, value: Value);

    fn remove(&mut self, key: &str) -> Option<Value>;

    fn keys(&self) -> Vec<String>;

    /// Isolated copy of the whole run state sharing this store's ledger.
    fn fork(&self) -> SharedStore;

    fn ledger(&self) -> &Arc<Ledger>;

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

// ---------------------------------------------------------------------------
// SharedStore
// ---------------------------------------------------------------------------

/// The root state container for one run.
///
/// Root values sit behind `Arc`, so cloning is shallow: a fork shares every
/// value until it writes one, and a write copies only that key. The ledger is
/// shared by all clones.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    values: BTreeMap<String, Arc<Value>>,
    ledger: Arc<Ledger>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from an object's fields.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut store = Self::new();
        for (key, value) in map {
            store.set(&key, value);
        }
        store
    }

    /// Snapshot of the whole state, ledger keys included when non-empty.
    pub fn to_value(&self) -> Value {
        let mut map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), Value::clone(v)))
            .collect();
        for key in [LLM_CALLS_KEY, WARNINGS_KEY] {
            if let Some(value) = self.ledger_value(key) {
                map.insert(key.to_string(), value);
            }
        }
        Value::Object(map)
    }

    fn ledger_value(&self, key: &str) -> Option<Value> {
        let slot = self.ledger.slot(key)?;
        let entries = slot.lock();
        if entries.is_empty() {
            None
        } else {
            Some(Value::Array(entries.clone()))
        }
    }
}

impl Store for SharedStore {
    fn get(&self, key: &str) -> Option<Cow<'_, Value>> {
        if self.ledger.slot(key).is_some() {
            return self.ledger_value(key).map(Cow::Owned);
        }
        self.values.get(key).map(|value| Cow::Borrowed(value.as_ref()))
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.values.get_mut(key).map(Arc::make_mut)
    }

    fn set(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.ledger.slot(key) {
            let mut entries = slot.lock();
            entries.clear();
            match value {
                Value::Array(items) => entries.extend(items),
                Value::Null => {}
                other => entries.push(other),
            }
            return;
        }
        self.values.insert(key.to_string(), Arc::new(value));
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        if let Some(slot) = self.ledger.slot(key) {
            let entries = std::mem::take(&mut *slot.lock());
            return (!entries.is_empty()).then_some(Value::Array(entries));
        }
        self.values.remove(key).map(Arc::unwrap_or_clone)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.values.keys().cloned().collect();
        for key in [LLM_CALLS_KEY, WARNINGS_KEY] {
            if self.ledger_value(key).is_some() {
                keys.insert(key.to_string());
            }
        }
        keys.into_iter().collect()
    }

    fn fork(&self) -> SharedStore {
        self.clone()
    }

    fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Read-only root lookup used by template resolution.
pub trait Lookup {
    fn lookup(&self, key: &str) -> Option<Cow<'_, Value>>;
}

impl<S: Store + ?Sized> Lookup for S {
    fn lookup(&self, key: &str) -> Option<Cow<'_, Value>> {
        self.get(key)
    }
}

impl Lookup for Map<String, Value> {
    fn lookup(&self, key: &str) -> Option<Cow<'_, Value>> {
        self.get(key).map(Cow::Borrowed)
    }
}
