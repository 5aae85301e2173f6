/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Configuration for the Interlink runtime.
///
/// Loaded from `interlink/config.toml` in the XDG configuration directories.
/// Every section falls back to its defaults when absent, so a file only needs
/// to name the values it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterlinkConfig {
    /// Capacity limits for mailboxes and argument queues
    pub limits: LimitsConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Manager broker settings
    pub broker: BrokerConfig,
}

/// Capacity limits applied when interfaces create their mailboxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Mailbox capacity of a required interface that owns a mailbox
    pub mailbox_size: usize,
    /// Pending invocations allowed per queued command
    pub argument_queue_size: usize,
    /// Mailbox capacity of each end-user provided interface
    pub end_user_mailbox_size: usize,
}

/// Timeout-related configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a blocking function call waits for its completion signal
    pub blocking_command_ms: u64,
    /// How long a component waits for its task to finish when killed
    pub component_shutdown_ms: u64,
}

/// Names and tuning for the manager component client/server pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Round trips used per process when estimating clock offsets
    pub time_sync_trials: usize,
    /// Component name of the manager component server
    pub manager_server_name: String,
    /// Suffix appended to a process name to name its manager component client
    pub manager_client_suffix: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            mailbox_size: 64,
            argument_queue_size: 64,
            end_user_mailbox_size: 64,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            blocking_command_ms: 5_000,
            component_shutdown_ms: 2_000,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            time_sync_trials: 10,
            manager_server_name: "MCS".to_string(),
            manager_client_suffix: "_MCC".to_string(),
        }
    }
}

impl InterlinkConfig {
    /// Deadline applied to blocking function calls.
    pub const fn blocking_command_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.blocking_command_ms)
    }

    /// Deadline applied when joining a killed component's task.
    pub const fn component_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.component_shutdown_ms)
    }

    /// Load configuration from XDG-compliant locations
    ///
    /// Looks for `interlink/config.toml` under `$XDG_CONFIG_HOME` and the
    /// other XDG configuration directories.
    ///
    /// If no configuration file is found, returns the default configuration.
    /// If a configuration file exists but is malformed, logs an error and uses defaults.
    pub fn load() -> Self {
        use tracing::{error, info};

        let xdg_dirs = match xdg::BaseDirectories::with_prefix("interlink") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        let Some(path) = xdg_dirs.find_config_file("config.toml") else {
            info!("No configuration file found, using defaults");
            return Self::default();
        };

        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(config_str) => match toml::from_str::<Self>(&config_str) {
                Ok(config) => {
                    info!("Successfully loaded configuration");
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

lazy_static! {
    /// Global configuration instance loaded from XDG-compliant locations
    pub static ref CONFIG: InterlinkConfig = InterlinkConfig::load();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: InterlinkConfig = toml::from_str(
            r#"
            [limits]
            mailbox_size = 8
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.limits.mailbox_size, 8);
        assert_eq!(config.limits.argument_queue_size, 64);
        assert_eq!(config.broker.time_sync_trials, 10);
        assert_eq!(config.blocking_command_timeout(), Duration::from_secs(5));
    }
}
