//! Core runtime for weft.
//!
//! Everything needed to turn a workflow IR into a running graph lives under
//! [`workflow`]. This crate performs no filesystem or network I/O of its own;
//! node implementations bring their own.

pub mod workflow;
