pub mod client;
pub mod config;
pub mod daily_totals_repository;
pub mod models;

pub use client::PostgresClient;
pub use config::PostgresConfig;
pub use daily_totals_repository::PostgresDailyTotalsRepository;
