use config::{Config, ConfigError, Environment};
use helio_domain::{DecoderConfig, DedupConfig, TotalsServiceConfig};
use helio_mqtt::MqttConfig;
use helio_postgres::PostgresConfig;
use helio_redis::RedisConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // MQTT
    #[serde(default = "default_mqtt_url")]
    pub mqtt_url: String,
    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,
    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,
    /// Bound of the channel between broker event loop and ingestion consumer
    #[serde(default = "default_mqtt_channel_capacity")]
    pub mqtt_channel_capacity: usize,

    // Redis
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub redis_key_prefix: String,
    #[serde(default = "default_redis_command_timeout_ms")]
    pub redis_command_timeout_ms: u64,

    // PostgreSQL
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,
    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,
    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,
    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,
    #[serde(default)]
    pub postgres_password: String,
    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // Deduplication
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    // Telemetry decoding
    #[serde(default = "default_min_telemetry_fields")]
    pub min_telemetry_fields: usize,
    /// Sanity bound on a single day's totalA
    #[serde(default = "default_max_total_a")]
    pub max_total_a: u64,
    /// Sanity bound on a single day's totalA2
    #[serde(default = "default_max_total_a2")]
    pub max_total_a2: u64,

    // Write-back and rollover
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_flush_batch_size")]
    pub flush_batch_size: usize,
    #[serde(default = "default_flush_batch_delay_ms")]
    pub flush_batch_delay_ms: u64,
    #[serde(default = "default_rollover_check_secs")]
    pub rollover_check_secs: u64,
    #[serde(default = "default_cache_retention_secs")]
    pub cache_retention_secs: u64,
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,

    /// Startup timeout for initial connectivity checks in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mqtt_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "helio-totals".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_channel_capacity() -> usize {
    1024
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_key_prefix() -> String {
    "daily_totals".to_string()
}

fn default_redis_command_timeout_ms() -> u64 {
    2000
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "helio".to_string()
}

fn default_postgres_username() -> String {
    "postgres".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

fn default_dedup_window_secs() -> u64 {
    5
}

fn default_dedup_capacity() -> usize {
    1024
}

fn default_min_telemetry_fields() -> usize {
    10
}

fn default_max_total_a() -> u64 {
    15_000
}

fn default_max_total_a2() -> u64 {
    8_000
}

fn default_flush_interval_secs() -> u64 {
    300
}

fn default_flush_batch_size() -> usize {
    5
}

fn default_flush_batch_delay_ms() -> u64 {
    50
}

fn default_rollover_check_secs() -> u64 {
    600
}

fn default_cache_retention_secs() -> u64 {
    7 * 24 * 3600
}

fn default_fallback_timeout_ms() -> u64 {
    3000
}

fn default_startup_timeout_secs() -> u64 {
    30
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("HELIO"))
            .build()?
            .try_deserialize()
    }

    pub fn mqtt(&self) -> MqttConfig {
        MqttConfig {
            url: self.mqtt_url.clone(),
            client_id: self.mqtt_client_id.clone(),
            keep_alive_secs: self.mqtt_keep_alive_secs,
            channel_capacity: self.mqtt_channel_capacity,
            ..MqttConfig::default()
        }
    }

    pub fn redis(&self) -> RedisConfig {
        RedisConfig {
            url: self.redis_url.clone(),
            key_prefix: self.redis_key_prefix.clone(),
            command_timeout_ms: self.redis_command_timeout_ms,
            ..RedisConfig::default()
        }
    }

    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn totals(&self) -> TotalsServiceConfig {
        TotalsServiceConfig {
            cache_retention: Duration::from_secs(self.cache_retention_secs),
            fallback_timeout: Duration::from_millis(self.fallback_timeout_ms),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            flush_batch_size: self.flush_batch_size,
            flush_batch_delay: Duration::from_millis(self.flush_batch_delay_ms),
            rollover_check_interval: Duration::from_secs(self.rollover_check_secs),
        }
    }

    pub fn decoder(&self) -> DecoderConfig {
        DecoderConfig {
            min_fields: self.min_telemetry_fields,
            max_total_a: Decimal::from(self.max_total_a),
            max_total_a2: Decimal::from(self.max_total_a2),
        }
    }

    pub fn dedup(&self) -> DedupConfig {
        DedupConfig {
            window: Duration::from_secs(self.dedup_window_secs),
            capacity: self.dedup_capacity,
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}
