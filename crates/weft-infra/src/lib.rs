//! Infrastructure layer for weft.
//!
//! Filesystem adapters around the runtime in `weft-core`: loading the runtime
//! configuration from `weft.toml` and reading/writing workflow documents in
//! JSON or YAML.

pub mod config;
pub mod workflow_file;
