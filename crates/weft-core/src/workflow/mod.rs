//! Workflow runtime: compilation and execution of node graphs.
//!
//! - `store` -- run-scoped shared state and the shared accounting ledger
//! - `namespace` -- write-scoping proxy that gives each node its own slot
//! - `template` -- `${...}` reference parsing and resolution
//! - `params` -- compiled parameter templates and the template layer
//! - `typecheck` -- type compatibility, inference and path suggestions
//! - `validator` -- compile-time reference and type validation
//! - `node` -- node lifecycle contract and the retrying execution core
//! - `retry` -- retry policy
//! - `batch` -- per-item iteration with isolated state copies
//! - `instrument` -- tracing spans and execution metadata
//! - `registry` -- node type lookup port
//! - `definition` -- IR parsing and schema validation
//! - `dag` -- graph analysis (cycles, reachability)
//! - `compiler` -- validation plus layer composition
//! - `executor` -- routing loop with timeout and cancellation

pub mod batch;
pub mod compiler;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod instrument;
pub mod namespace;
pub mod node;
pub mod params;
pub mod registry;
pub mod retry;
pub mod store;
pub mod template;
pub mod typecheck;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;
