//! Minimal runner demo: two concurrent processes with a cleanup step.
//!
//! Run with: cargo run --example basic_runner

use helio_runner::Runner;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("press Ctrl+C to trigger graceful shutdown");

    Runner::new()
        .with_app_process(|ctx| async move {
            let mut ticks = 0u64;
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        tracing::info!(ticks, "ticker stopping");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        ticks += 1;
                        tracing::info!(ticks, "tick");
                    }
                }
            }
            Ok(())
        })
        .with_app_process(|ctx| async move {
            ctx.cancelled().await;
            tracing::info!("watcher stopping");
            Ok(())
        })
        .with_closer(|| async move {
            tracing::info!("flushing state before exit");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(5))
        .run()
        .await
}
