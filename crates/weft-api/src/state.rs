//! Application state wiring all components together.
//!
//! AppState holds the concrete executor and its collaborators, used by
//! both CLI commands and REST API handlers. The executor is generic over
//! the store/runtime/registry ports; AppState pins it to the concrete
//! infra implementations.

use std::path::PathBuf;
use std::sync::Arc;

use weft_core::event::ThreadEventHub;
use weft_core::registry::ThreadRegistry;
use weft_core::workflow::{ConcurrencyLimits, ThreadExecutor};
use weft_infra::config::{data_dir, load_config};
use weft_infra::runtime::{ConfigProjectRegistry, HttpAgentRuntime};
use weft_infra::store::CheckpointBackend;
use weft_types::config::WeftConfig;

/// Concrete executor type pinned to the infra implementations.
pub type ConcreteExecutor =
    ThreadExecutor<CheckpointBackend, HttpAgentRuntime, ConfigProjectRegistry>;

/// Shared application state.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<ConcreteExecutor>,
    pub registry: Arc<ThreadRegistry>,
    pub store: Arc<CheckpointBackend>,
    pub hub: Arc<ThreadEventHub>,
    pub config: WeftConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, open the checkpoint
    /// store, wire the executor.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_config(&data_dir).await;

        let store = Arc::new(CheckpointBackend::from_config(&config).await?);
        let registry = Arc::new(ThreadRegistry::new());
        let hub = Arc::new(ThreadEventHub::new());
        let runtime = Arc::new(HttpAgentRuntime::new(config.runtime.base_url.clone()));
        let projects = Arc::new(ConfigProjectRegistry::new(&config));
        let limits = ConcurrencyLimits {
            per_thread: config.limits.per_thread,
            global: config.limits.global,
        };

        let executor = Arc::new(ThreadExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&hub),
            runtime,
            projects,
            limits,
        ));

        Ok(Self {
            executor,
            registry,
            store,
            hub,
            config,
            data_dir,
        })
    }
}
