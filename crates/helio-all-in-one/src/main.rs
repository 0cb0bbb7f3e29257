mod config;

use async_trait::async_trait;
use helio_domain::{
    run_flush_loop, run_ingest_loop, run_rollover_loop, DailyTotalsRepository, DailyTotalsService,
    DomainResult, IngestService, TotalsCache, TotalsNotifier,
};
use helio_mqtt::run_mqtt_subscriber;
use helio_postgres::{PostgresClient, PostgresDailyTotalsRepository};
use helio_redis::RedisTotalsCache;
use helio_runner::Runner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Final flush at shutdown gets this long before connections drop
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = match config::ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("starting helio-all-in-one service");

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "service exited with error");
        std::process::exit(1);
    }
}

async fn run(config: config::ServiceConfig) -> anyhow::Result<()> {
    let cache = Arc::new(RedisTotalsCache::new(&config.redis())?);
    let postgres = PostgresClient::new(&config.postgres())?;
    let repository = Arc::new(PostgresDailyTotalsRepository::new(postgres));

    check_connectivity(cache.as_ref(), repository.as_ref(), config.startup_timeout()).await;

    let service = Arc::new(DailyTotalsService::new(
        cache,
        repository,
        config.totals(),
    )?);
    let ingest = Arc::new(IngestService::new(
        service.clone(),
        Arc::new(LoggingNotifier),
        config.decoder(),
        config.dedup(),
    ));

    let (tx, rx) = mpsc::channel(config.mqtt_channel_capacity);
    let mqtt_config = config.mqtt();

    let runner = Runner::new()
        .with_app_process({
            let tx = tx.clone();
            move |token| run_mqtt_subscriber(mqtt_config, tx, token)
        })
        .with_app_process({
            let ingest = ingest.clone();
            move |token| run_ingest_loop(rx, ingest, token)
        })
        .with_app_process({
            let service = service.clone();
            move |token| run_flush_loop(service, token)
        })
        .with_app_process({
            let service = service.clone();
            move |token| run_rollover_loop(service, token)
        })
        .with_closer({
            let service = service.clone();
            move || async move {
                info!("running final flush before shutdown");
                match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, service.force_flush()).await {
                    Ok(Ok(outcome)) => {
                        info!(flushed = outcome.flushed, failed = outcome.failed, "final flush done");
                    }
                    Ok(Err(e)) => warn!(error = %e, "final flush failed"),
                    Err(_) => warn!("final flush timed out"),
                }
                Ok(())
            }
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await
}

/// Ping both backends with a bounded wait. Failures are warnings: the
/// service starts in durable-store-only degraded mode when the cache is
/// down, and increments fall back further to zero totals when the store is
/// also unreachable.
async fn check_connectivity(
    cache: &dyn TotalsCache,
    repository: &dyn DailyTotalsRepository,
    startup_timeout: Duration,
) {
    match tokio::time::timeout(startup_timeout, cache.is_available()).await {
        Ok(true) => info!("cache backend reachable"),
        Ok(false) => warn!("cache backend unreachable, starting in degraded mode"),
        Err(_) => warn!("cache connectivity check timed out, starting in degraded mode"),
    }

    match tokio::time::timeout(startup_timeout, repository.ping()).await {
        Ok(Ok(())) => info!("durable store reachable"),
        Ok(Err(e)) => warn!(error = %e, "durable store unreachable at startup"),
        Err(_) => warn!("durable store connectivity check timed out"),
    }
}

/// Default sink for device identity announcements: log and move on.
struct LoggingNotifier;

#[async_trait]
impl TotalsNotifier for LoggingNotifier {
    async fn device_identity_seen(
        &self,
        owner_id: &str,
        device_id: &str,
        name: &str,
    ) -> DomainResult<()> {
        info!(owner_id = %owner_id, device_id = %device_id, name = %name, "device identity seen");
        Ok(())
    }
}
