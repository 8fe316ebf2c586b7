//! YAML configuration, hot-reloadable exactly like the teacher's
//! `GameConfig.json` loader, but for the session server's own settings
//! rather than a per-game player cap table.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

const CONFIG_PATH: &str = "config.yaml";

/// Server configuration. Every field has a default so a missing file can be
/// synthesized on first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_ip: String,
    pub port: u16,
    pub room_max_players: u16,
    pub monitors: Vec<i32>,
    pub cycle_voting: bool,
    pub identity_base_url: String,
    pub heartbeat_timeout_secs: u64,
    pub heartbeat_poll_secs: u64,
    pub dangle_grace_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_ip: "::".to_owned(),
            port: 12346,
            room_max_players: 8,
            monitors: Vec::new(),
            cycle_voting: false,
            identity_base_url: "http://127.0.0.1:8090".to_owned(),
            heartbeat_timeout_secs: 10,
            heartbeat_poll_secs: 1,
            dangle_grace_secs: 10,
            http_timeout_secs: 5,
        }
    }
}

/// Loads the configuration file, creating it with defaults if absent.
pub async fn load() -> anyhow::Result<Config> {
    load_from(CONFIG_PATH).await
}

async fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if !fs::try_exists(path).await.unwrap_or(false) {
        let defaults = Config::default();
        let yaml = serde_yaml::to_string(&defaults)?;
        fs::write(path, yaml).await?;
        tracing::info!(?path, "Config file missing, wrote defaults.");
        return Ok(defaults);
    }

    let raw = fs::read_to_string(path).await?;
    let config: Config = serde_yaml::from_str(&raw)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_defaults_when_missing() {
        let dir = std::env::temp_dir().join(format!(
            "session-server-config-test-{:?}",
            std::thread::current().id()
        ));
        let _ = fs::create_dir_all(&dir).await;
        let path = dir.join("config.yaml");
        let _ = fs::remove_file(&path).await;

        let config = load_from(&path).await.unwrap();
        assert_eq!(config.port, 12346);
        assert!(fs::try_exists(&path).await.unwrap());

        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn round_trips_custom_values() {
        let dir = std::env::temp_dir().join(format!(
            "session-server-config-test2-{:?}",
            std::thread::current().id()
        ));
        let _ = fs::create_dir_all(&dir).await;
        let path = dir.join("config.yaml");
        fs::write(
            &path,
            "bind_ip: \"0.0.0.0\"\nport: 9000\nroom_max_players: 4\nmonitors: [1, 2]\n",
        )
        .await
        .unwrap();

        let config = load_from(&path).await.unwrap();
        assert_eq!(config.bind_ip, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.room_max_players, 4);
        assert_eq!(config.monitors, vec![1, 2]);
        // Field absent from the YAML picks up its default.
        assert!(!config.cycle_voting);

        let _ = fs::remove_file(&path).await;
    }
}
