use std::path::Path;

use serde::{Deserialize, Serialize};

/// Bridge configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Audio node endpoints and credentials.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    /// Control websocket url, e.g. `ws://localhost:2333`.
    pub ws_url: String,
    /// REST base url, e.g. `http://localhost:2333`.
    pub rest_url: String,
    pub password: String,
}

/// Poll intervals and recovery pacing, all in milliseconds.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    /// Shard liveness sampling interval.
    pub health_poll_ms: u64,
    /// `wait_until_ready` poll interval.
    pub ready_poll_ms: u64,
    /// Settle period after a shard recovers, covering the platform's own
    /// session-resume handshake.
    pub resync_settle_ms: u64,
    /// Delay between successive per-guild reconnects during a resync.
    pub resync_pace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            health_poll_ms: 100,
            ready_poll_ms: 10,
            resync_settle_ms: 5000,
            resync_pace_ms: 500,
        }
    }
}

impl Config {
    pub fn new(
        ws_url: impl Into<String>,
        rest_url: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            node: NodeConfig {
                ws_url: ws_url.into(),
                rest_url: rest_url.into(),
                password: password.into(),
            },
            timing: TimingConfig::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_str = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_section_is_optional() {
        let config: Config = toml::from_str(
            r#"
            [node]
            ws_url = "ws://localhost:2333"
            rest_url = "http://localhost:2333"
            password = "youshallnotpass"
            "#,
        )
        .unwrap();
        assert_eq!(config.timing.health_poll_ms, 100);
        assert_eq!(config.timing.resync_settle_ms, 5000);
    }

    #[test]
    fn timing_overrides_apply() {
        let config: Config = toml::from_str(
            r#"
            [node]
            ws_url = "ws://localhost:2333"
            rest_url = "http://localhost:2333"
            password = ""

            [timing]
            resync_pace_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.timing.resync_pace_ms, 250);
        assert_eq!(config.timing.ready_poll_ms, 10);
    }
}
