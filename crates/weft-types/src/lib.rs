//! Shared domain types for Weft.
//!
//! This crate contains the core domain types used across the Weft workflow
//! coordinator: workflow definitions, thread execution state, checkpoints,
//! and the thread event stream.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod thread;
pub mod workflow;
