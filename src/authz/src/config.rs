//! Engine configuration
//!
//! Environment variables read by [`GroupsConfig::from_env`]:
//! - `GROUPS_DATABASE_URL` - PostgreSQL connection string (default: unset, in-memory store)
//! - `GROUPS_REBUILD_MODE` - `on_update` or `manual` (default: on_update)
//! - `GROUPS_MAX_CONNECTIONS` - Pool size (default: 10)
//! - `GROUPS_STATEMENT_TIMEOUT_MS` - Timeout for closure rebuild statements (default: 30000)

use crate::error::{GroupError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// When the closure table is rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildMode {
    /// Rebuild synchronously whenever an update changes child groups
    #[default]
    OnUpdate,
    /// Only rebuild when explicitly requested
    Manual,
}

impl FromStr for RebuildMode {
    type Err = GroupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on_update" | "eager" => Ok(RebuildMode::OnUpdate),
            "manual" => Ok(RebuildMode::Manual),
            other => Err(GroupError::Config(format!("Unknown rebuild mode: {}", other))),
        }
    }
}

/// Group engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsConfig {
    /// PostgreSQL connection string; `None` selects the in-memory store
    pub database_url: Option<String>,

    /// Closure rebuild trigger
    pub rebuild_mode: RebuildMode,

    /// Maximum pool connections
    pub max_connections: u32,

    /// Statement timeout applied inside the closure rebuild transaction
    pub statement_timeout: Duration,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            rebuild_mode: RebuildMode::OnUpdate,
            max_connections: 10,
            statement_timeout: Duration::from_secs(30),
        }
    }
}

impl GroupsConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("GROUPS_DATABASE_URL").filter(|u| !u.is_empty()) {
            config.database_url = Some(url);
        }

        if let Some(mode) = lookup("GROUPS_REBUILD_MODE") {
            config.rebuild_mode = mode.parse()?;
        }

        if let Some(max) = lookup("GROUPS_MAX_CONNECTIONS") {
            config.max_connections = max.parse().map_err(|e| {
                GroupError::Config(format!("Invalid GROUPS_MAX_CONNECTIONS '{}': {}", max, e))
            })?;
        }

        if let Some(ms) = lookup("GROUPS_STATEMENT_TIMEOUT_MS") {
            let millis: u64 = ms.parse().map_err(|e| {
                GroupError::Config(format!("Invalid GROUPS_STATEMENT_TIMEOUT_MS '{}': {}", ms, e))
            })?;
            config.statement_timeout = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_rebuild_mode(mut self, mode: RebuildMode) -> Self {
        self.rebuild_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(GroupError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.statement_timeout.is_zero() {
            return Err(GroupError::Config(
                "statement_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
