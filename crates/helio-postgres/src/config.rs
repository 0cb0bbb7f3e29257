use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "helio".to_string()
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_max_pool_size() -> usize {
    10
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            username: default_username(),
            password: String::new(),
            max_pool_size: default_max_pool_size(),
        }
    }
}
