//! Shared domain types for weft.
//!
//! This crate contains the serializable vocabulary used across the runtime:
//! the workflow IR, node interface metadata, type descriptors, diagnostics,
//! and runtime configuration.
//!
//! Zero infrastructure dependencies -- only serde, thiserror, schemars.

pub mod config;
pub mod diagnostic;
pub mod interface;
pub mod workflow;
