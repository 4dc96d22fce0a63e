//! Global configuration shape.
//!
//! Deserialized from `config.toml` in the data directory by the loader in
//! weft-infra. Every section has defaults so a missing or partial file
//! still yields a usable configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeftConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub runtime: RuntimeConfig,
    /// Global agent table: agent reference -> runtime identity.
    pub agents: HashMap<String, String>,
    /// Per-project agent tables, consulted before the global one.
    pub projects: HashMap<String, ProjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Override for the SQLite database URL; defaults to
    /// `sqlite://{data_dir}/weft.db` when unset.
    pub database_url: Option<String>,
}

/// Which checkpoint store backs the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Durable store; threads survive process restarts.
    #[default]
    Sqlite,
    /// Ephemeral store for tests and throwaway runs.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max in-flight steps per thread.
    pub per_thread: usize,
    /// Max in-flight steps across all threads.
    pub global: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_thread: 4,
            global: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base URL of the agent runtime service.
    pub base_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8700".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Agent reference -> runtime identity within this project.
    pub agents: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = WeftConfig::default();
        assert_eq!(config.server.port, 8600);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.limits.per_thread, 4);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: WeftConfig = toml::from_str(
            r#"
[server]
port = 9000

[storage]
backend = "memory"

[agents]
calc = "calc-v2"
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.agents["calc"], "calc-v2");
        assert_eq!(config.limits.global, 16);
    }
}
