use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "daily_totals".to_string()
}

fn default_command_timeout_ms() -> u64 {
    2000
}

fn default_scan_count() -> usize {
    100
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            key_prefix: default_key_prefix(),
            command_timeout_ms: default_command_timeout_ms(),
            scan_count: default_scan_count(),
        }
    }
}
