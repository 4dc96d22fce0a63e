//! Workflow execution core for Weft.
//!
//! This crate defines the "ports" (the checkpoint store and agent runtime
//! traits) that the infrastructure layer implements, plus the execution
//! machinery itself: definition parsing and DAG validation, the dependency
//! scheduler, template resolution, the live thread registry, the per-thread
//! event hub, and the thread executor. It depends only on `weft-types` --
//! never on `weft-infra` or any database/IO crate.

pub mod event;
pub mod registry;
pub mod repository;
pub mod runtime;
pub mod workflow;
