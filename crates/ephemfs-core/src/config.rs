// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for ephemfs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Staleness reaper schedule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperPolicy {
    /// Delay between two sweeps
    pub interval_ms: u64,
    /// Files not modified for at least this long are removed
    pub threshold_ms: u64,
}

impl ReaperPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

impl Default for ReaperPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            threshold_ms: 10_000,
        }
    }
}

/// Kernel cache TTLs for FUSE replies
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1_000,
            entry_ttl_ms: 1_000,
        }
    }
}

/// Fixed permission bits reported for every node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModePolicy {
    pub file_mode: u32,
    pub dir_mode: u32,
}

impl Default for ModePolicy {
    fn default() -> Self {
        Self {
            file_mode: 0o664,
            dir_mode: 0o775,
        }
    }
}

/// Top-level filesystem configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub reaper: ReaperPolicy,
    pub cache: CachePolicy,
    pub modes: ModePolicy,
}

impl FsConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// A zero sweep interval would spin the reaper without pause.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reaper.interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "reaper.interval_ms",
            });
        }
        Ok(())
    }
}
