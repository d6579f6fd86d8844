// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Prefix for generated request ids (helpful for log correlation)
    #[serde(default = "default_request_id_prefix")]
    pub request_id_prefix: String,

    /// Path to the credentials file, e.g. "./creds.txt"
    #[serde(default)]
    pub auth_file: Option<String>,

    #[serde(default)]
    pub action: ActionConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Knobs shared by every Action.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    /// Skip the authentication step for every action
    #[serde(default)]
    pub auth_disabled: bool,
    /// Consult the shutdown flag before each step dispatch
    #[serde(default = "default_check_shutdown_signal")]
    pub check_shutdown_signal: bool,
    /// Per-request client read timeout in seconds
    #[serde(default = "default_client_read_timeout_secs")]
    pub client_read_timeout_secs: u64,
    /// Value of the Retry-After header sent with ServiceUnavailable
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u32,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            auth_disabled: false,
            check_shutdown_signal: default_check_shutdown_signal(),
            client_read_timeout_secs: default_client_read_timeout_secs(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl ActionConfig {
    pub fn client_read_timeout(&self) -> Duration {
        Duration::from_secs(self.client_read_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Salted retries allowed after the first create reports "already exists"
    #[serde(default = "default_max_collision_retry_count")]
    pub max_collision_retry_count: u16,
    /// Inserted between the base index name and the attempt number
    #[serde(default = "default_collision_salt")]
    pub collision_salt: String,
    /// Region recorded for buckets created without a location constraint
    #[serde(default = "default_location_constraint")]
    pub default_location_constraint: String,
    /// Mirror global/bucket rows into their replica indexes (best effort)
    #[serde(default = "default_replicate_indexes")]
    pub replicate_indexes: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_collision_retry_count: default_max_collision_retry_count(),
            collision_salt: default_collision_salt(),
            default_location_constraint: default_location_constraint(),
            replicate_indexes: default_replicate_indexes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Time in-flight actions get to finish after shutdown is requested
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_id_prefix: default_request_id_prefix(),
            auth_file: None,
            action: ActionConfig::default(),
            metadata: MetadataConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(s)?;
        Ok(cfg)
    }
}

fn default_request_id_prefix() -> String {
    "req-".to_string()
}

fn default_check_shutdown_signal() -> bool {
    true
}

fn default_client_read_timeout_secs() -> u64 {
    30
}

fn default_retry_after_secs() -> u32 {
    1
}

fn default_max_collision_retry_count() -> u16 {
    20
}

fn default_collision_salt() -> String {
    "index_salt_".to_string()
}

fn default_location_constraint() -> String {
    "us-west-2".to_string()
}

fn default_replicate_indexes() -> bool {
    true
}

fn default_grace_period_secs() -> u64 {
    10 // 10 seconds
}
