use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How a catch-up stream's `upperLimit` is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpperLimitPolicy {
    /// Re-evaluate `now()` as the stream progresses; new pushes during the stream are included.
    Now,
    /// Snapshot `now()` once at request start so the stream has a fixed, reproducible bound.
    FrozenAtStart,
}

/// Recognized options of §6, with the stated defaults. Loadable from a TOML file and overridable
/// by `THOUGHTSPACE_RELAY_*` environment variables via the `config` crate, then by CLI flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub max_ancestor_walk_depth: usize,
    pub hydration_row_batch: usize,
    pub pull_chunk_size: usize,
    pub relay_upper_limit_policy: UpperLimitPolicy,
    pub bind_addr: String,
    pub database_path: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_ancestor_walk_depth: 100,
            hydration_row_batch: 5000,
            pull_chunk_size: 1000,
            relay_upper_limit_policy: UpperLimitPolicy::Now,
            bind_addr: "127.0.0.1:4531".to_string(),
            database_path: None,
        }
    }
}

impl RelayConfig {
    /// Load defaults, then an optional TOML file, then `THOUGHTSPACE_RELAY_*` environment
    /// variables, in ascending priority.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&RelayConfig::default())?);
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("THOUGHTSPACE_RELAY").separator("__"),
        );
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn engine_config(&self) -> thoughtspace_core::EngineConfig {
        thoughtspace_core::EngineConfig {
            max_ancestor_walk_depth: self.max_ancestor_walk_depth,
        }
    }
}
