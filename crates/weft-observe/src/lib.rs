//! Observability setup for Weft.

pub mod tracing_setup;
