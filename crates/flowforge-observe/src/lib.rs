//! Observability setup for flowforge binaries.

pub mod tracing_setup;
