pub mod cache;
pub mod config;

pub use cache::RedisTotalsCache;
pub use config::RedisConfig;
