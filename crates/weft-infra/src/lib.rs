//! Infrastructure implementations for Weft.
//!
//! Concrete backends for the ports defined in `weft-core`: a durable
//! SQLite checkpoint store, an in-memory checkpoint store, an HTTP agent
//! runtime, a config-backed project registry, and the configuration
//! loader.

pub mod config;
pub mod memory;
pub mod runtime;
pub mod sqlite;
pub mod store;
