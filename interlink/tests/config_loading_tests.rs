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

use std::fs;
use std::time::Duration;

use interlink::prelude::*;
use tempfile::TempDir;

// Kept in one test: XDG_CONFIG_HOME is process-wide.
#[test]
fn test_configuration_loading_from_xdg_home() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    std::env::set_var("XDG_CONFIG_HOME", temp_dir.path());

    // No file yet
    let config = InterlinkConfig::load();
    assert_eq!(config.limits.end_user_mailbox_size, 64);
    assert_eq!(config.broker.manager_server_name, "MCS");

    let config_dir = temp_dir.path().join("interlink");
    fs::create_dir_all(&config_dir)?;
    fs::write(
        config_dir.join("config.toml"),
        r#"
        [timeouts]
        blocking_command_ms = 250

        [broker]
        time_sync_trials = 3
        manager_client_suffix = "-client"
        "#,
    )?;
    let config = InterlinkConfig::load();
    assert_eq!(config.blocking_command_timeout(), Duration::from_millis(250));
    assert_eq!(config.component_shutdown_timeout(), Duration::from_secs(2));
    assert_eq!(config.broker.time_sync_trials, 3);
    assert_eq!(config.broker.manager_client_suffix, "-client");
    assert_eq!(config.broker.manager_server_name, "MCS");
    assert_eq!(config.limits.mailbox_size, 64);

    fs::write(config_dir.join("config.toml"), "[limits\nmailbox_size = ")?;
    let config = InterlinkConfig::load();
    assert_eq!(config.timeouts.blocking_command_ms, 5_000);
    assert_eq!(config.broker.time_sync_trials, 10);

    temp_dir.close()?;
    Ok(())
}
