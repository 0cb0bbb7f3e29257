use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Bound of the channel between the broker event loop and the
    /// ingestion consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id() -> String {
    "helio-totals".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

impl MqttConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            channel_capacity: default_channel_capacity(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}
