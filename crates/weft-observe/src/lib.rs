//! Observability setup for Weft: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
