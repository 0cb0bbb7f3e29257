//! Write-back flusher.
//!
//! Periodically drains the dirty set: each dirty key's cached totals are
//! upserted into the durable store as absolute values, and the key leaves
//! the dirty set only after the upsert succeeds. Re-flushing an unchanged
//! key is an idempotent no-op upsert.

use crate::error::DomainResult;
use crate::service::DailyTotalsService;
use crate::types::{AccumulatorKey, NewDailyTotals};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one flush cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub flushed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DailyTotalsService {
    /// Run one flush cycle: snapshot the dirty set, persist in small
    /// batches with a pause between them, and leave failed keys dirty for
    /// the next cycle.
    pub async fn flush_dirty(&self) -> DomainResult<FlushOutcome> {
        if !self.cache.is_available().await {
            debug!("cache unreachable, nothing to flush");
            return Ok(FlushOutcome::default());
        }

        let dirty = self.cache.dirty_keys().await?;
        if dirty.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let mut outcome = FlushOutcome::default();
        let batches: Vec<&[AccumulatorKey]> =
            dirty.chunks(self.config.flush_batch_size).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            for key in batch {
                match self.flush_key(key).await {
                    Ok(true) => outcome.flushed += 1,
                    Ok(false) => outcome.skipped += 1,
                    Err(e) => {
                        warn!(key = %key, error = %e, "flush failed, key stays dirty");
                        outcome.failed += 1;
                    }
                }
            }
            if index + 1 < batch_count {
                tokio::time::sleep(self.config.flush_batch_delay).await;
            }
        }

        debug!(
            flushed = outcome.flushed,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "flush cycle complete"
        );
        Ok(outcome)
    }

    /// Manual trigger for immediate persistence
    pub async fn force_flush(&self) -> DomainResult<FlushOutcome> {
        self.flush_dirty().await
    }

    /// Persist one dirty key. Returns false when the cache no longer holds
    /// totals for it (expired or already migrated); the dirty marker is
    /// kept in that case rather than silently dropped.
    async fn flush_key(&self, key: &AccumulatorKey) -> DomainResult<bool> {
        let Some(totals) = self.cache.read_totals(key).await? else {
            return Ok(false);
        };
        self.repository
            .upsert_absolute(NewDailyTotals::from_key(key, totals))
            .await?;
        self.cache.clear_dirty(key).await?;
        Ok(true)
    }
}

/// Background loop running flush cycles on a fixed interval.
pub async fn run_flush_loop(
    service: Arc<DailyTotalsService>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let interval = service.config().flush_interval;
    info!(interval_secs = interval.as_secs(), "starting write-back flush loop");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("flush loop stopping");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = service.flush_dirty().await {
                    warn!(error = %e, "flush cycle failed");
                }
            }
        }
    }

    Ok(())
}
