//! Workflow parsing, scheduling, and execution.

pub mod executor;
pub mod parser;
pub mod resolver;
pub mod scheduler;
pub mod session;

pub use executor::{ConcurrencyLimits, ExecutorError, ThreadExecutor};
pub use parser::ValidationError;
