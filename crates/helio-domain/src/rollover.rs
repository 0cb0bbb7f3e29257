//! Day rollover management.
//!
//! One piece of process-wide state, the live day, is owned by the service's
//! day-state mutex. A periodic check (and the check at the top of every
//! increment, which keeps the lock for its whole write) detects the
//! fixed-offset day boundary, migrates the closing day's accumulators to
//! the durable store, deletes the cache entries and swaps the live day.

use crate::day;
use crate::error::DomainResult;
use crate::service::{DailyTotalsService, DayState};
use crate::types::NewDailyTotals;
use chrono::NaiveDate;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cache deletions are issued in bounded chunks during migration
const DELETE_BATCH_SIZE: usize = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub migrated: usize,
    pub failed: usize,
}

impl DailyTotalsService {
    /// Boundary check for callers that do not already hold the day-state
    /// lock.
    pub(crate) async fn ensure_current_day(&self) -> NaiveDate {
        let mut state = self.day_state.lock().await;
        self.advance_day(&mut state).await
    }

    /// Boundary check against an already-held day-state guard. Increments
    /// pass the guard they keep for the rest of their write, so a migration
    /// can never run between this check and the write-back.
    pub(crate) async fn advance_day(&self, state: &mut DayState) -> NaiveDate {
        let today = day::today();
        if state.current != today {
            let outgoing = state.current;
            info!(
                outgoing = %day::day_string(outgoing),
                incoming = %day::day_string(today),
                "day boundary crossed"
            );
            match self.migrate_day(outgoing).await {
                Ok(outcome) if outcome.failed == 0 => {
                    state.pending_migration = None;
                }
                Ok(outcome) => {
                    warn!(
                        day = %day::day_string(outgoing),
                        failed = outcome.failed,
                        "day migration left keys behind, will retry"
                    );
                    state.pending_migration = Some(outgoing);
                }
                Err(e) => {
                    warn!(
                        day = %day::day_string(outgoing),
                        error = %e,
                        "day migration failed, will retry"
                    );
                    state.pending_migration = Some(outgoing);
                }
            }
            state.current = today;
        }
        state.current
    }

    /// Periodic check: advances the live day when the boundary has been
    /// crossed and retries any migration that previously left keys behind.
    /// Invoking this twice for the same transition is a no-op the second
    /// time.
    pub async fn check_for_new_day(&self) -> DomainResult<bool> {
        let rolled = {
            let state = self.day_state.lock().await;
            state.current != day::today()
        };
        if rolled {
            self.ensure_current_day().await;
            return Ok(true);
        }

        // No boundary crossed; retry an incomplete migration if one exists
        let pending = { self.day_state.lock().await.pending_migration };
        if let Some(pending_day) = pending {
            let outcome = self.migrate_day(pending_day).await?;
            if outcome.failed == 0 {
                self.day_state.lock().await.pending_migration = None;
                info!(day = %day::day_string(pending_day), "pending migration completed");
            }
        }
        Ok(false)
    }

    /// Administrative rollover for operational recovery: migrate an explicit
    /// previous day and reset the live day, reusing the normal
    /// migrate-then-reset logic.
    pub async fn force_rollover(&self, previous_day: NaiveDate) -> DomainResult<MigrationOutcome> {
        let mut state = self.day_state.lock().await;
        let outcome = self.migrate_day(previous_day).await?;
        if state.pending_migration == Some(previous_day) && outcome.failed == 0 {
            state.pending_migration = None;
        }
        state.current = day::today();
        info!(
            day = %day::day_string(previous_day),
            migrated = outcome.migrated,
            failed = outcome.failed,
            "manual rollover complete"
        );
        Ok(outcome)
    }

    /// Persist every cached bucket of `outgoing` to the durable store, then
    /// delete the cache entries and their dirty markers. Only migrated keys
    /// leave the dirty set; markers belonging to other days stay so their
    /// unflushed totals are still picked up by the flusher. Keys that fail
    /// to persist stay in the cache for a later retry. Scanning an already
    /// migrated day finds nothing and changes nothing.
    pub(crate) async fn migrate_day(&self, outgoing: NaiveDate) -> DomainResult<MigrationOutcome> {
        let keys = self.cache.scan_day(outgoing).await?;
        if keys.is_empty() {
            debug!(day = %day::day_string(outgoing), "no cached keys to migrate");
            return Ok(MigrationOutcome::default());
        }

        let mut migrated = Vec::with_capacity(keys.len());
        let mut failed = 0;
        for key in keys {
            match self.persist_cached_key(&key).await {
                Ok(()) => migrated.push(key),
                Err(e) => {
                    error!(key = %key, error = %e, "failed to persist bucket, leaving in cache");
                    failed += 1;
                }
            }
        }

        for chunk in migrated.chunks(DELETE_BATCH_SIZE) {
            self.cache.delete_keys(chunk).await?;
        }
        for key in &migrated {
            self.cache.clear_dirty(key).await?;
        }

        info!(
            day = %day::day_string(outgoing),
            migrated = migrated.len(),
            failed,
            "day migration finished"
        );
        Ok(MigrationOutcome {
            migrated: migrated.len(),
            failed,
        })
    }

    async fn persist_cached_key(&self, key: &crate::types::AccumulatorKey) -> DomainResult<()> {
        if let Some(totals) = self.cache.read_totals(key).await? {
            self.repository
                .upsert_absolute(NewDailyTotals::from_key(key, totals))
                .await?;
        }
        Ok(())
    }
}

/// Background loop running the periodic day-boundary check.
pub async fn run_rollover_loop(
    service: Arc<DailyTotalsService>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let interval = service.config().rollover_check_interval;
    info!(interval_secs = interval.as_secs(), "starting rollover check loop");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("rollover check loop stopping");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                match service.check_for_new_day().await {
                    Ok(true) => info!("rollover applied"),
                    Ok(false) => debug!("no day boundary crossed"),
                    Err(e) => warn!(error = %e, "rollover check failed"),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MockTotalsCache;
    use crate::repository::MockDailyTotalsRepository;
    use crate::service::TotalsServiceConfig;
    use crate::types::{AccumulatorKey, DailyTotalsRecord, DayTotals};
    use crate::DomainError;
    use rust_decimal::Decimal;

    fn service(
        cache: MockTotalsCache,
        repository: MockDailyTotalsRepository,
    ) -> DailyTotalsService {
        DailyTotalsService::new(
            Arc::new(cache),
            Arc::new(repository),
            TotalsServiceConfig::default(),
        )
        .unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_migrate_day_persists_and_deletes() {
        let mut cache = MockTotalsCache::new();
        let mut repository = MockDailyTotalsRepository::new();
        let outgoing = day(2024, 1, 1);

        cache.expect_scan_day().times(1).returning(move |day| {
            Ok(vec![
                AccumulatorKey::new("u1", "d1", day),
                AccumulatorKey::new("u1", "d2", day),
            ])
        });
        cache
            .expect_read_totals()
            .times(2)
            .returning(|_| Ok(Some(DayTotals::new(Decimal::from(3), Decimal::from(1)))));
        repository
            .expect_upsert_absolute()
            .times(2)
            .returning(|input| {
                Ok(DailyTotalsRecord {
                    owner_id: input.owner_id,
                    device_id: input.device_id,
                    day: input.day,
                    totals: input.totals,
                    created_at: None,
                    updated_at: None,
                })
            });
        cache
            .expect_delete_keys()
            .withf(|keys: &[AccumulatorKey]| keys.len() == 2)
            .times(1)
            .returning(|_| Ok(()));
        cache.expect_clear_dirty().times(2).returning(|_| Ok(()));

        let service = service(cache, repository);
        let outcome = service.migrate_day(outgoing).await.unwrap();
        assert_eq!(outcome.migrated, 2);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_migrate_day_empty_is_noop() {
        let mut cache = MockTotalsCache::new();
        let repository = MockDailyTotalsRepository::new();

        cache.expect_scan_day().times(1).returning(|_| Ok(vec![]));
        // No deletes, no dirty-marker clears, no upserts

        let service = service(cache, repository);
        let outcome = service.migrate_day(day(2024, 1, 1)).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::default());
    }

    #[tokio::test]
    async fn test_migrate_day_keeps_failed_keys() {
        let mut cache = MockTotalsCache::new();
        let mut repository = MockDailyTotalsRepository::new();

        cache.expect_scan_day().times(1).returning(move |day| {
            Ok(vec![
                AccumulatorKey::new("u1", "good", day),
                AccumulatorKey::new("u1", "bad", day),
            ])
        });
        cache
            .expect_read_totals()
            .times(2)
            .returning(|_| Ok(Some(DayTotals::new(Decimal::ONE, Decimal::ONE))));
        repository
            .expect_upsert_absolute()
            .times(2)
            .returning(|input| {
                if input.device_id == "bad" {
                    Err(DomainError::RepositoryError(anyhow::anyhow!("timeout")))
                } else {
                    Ok(DailyTotalsRecord {
                        owner_id: input.owner_id,
                        device_id: input.device_id,
                        day: input.day,
                        totals: input.totals,
                        created_at: None,
                        updated_at: None,
                    })
                }
            });
        // Only the successfully persisted key is deleted
        cache
            .expect_delete_keys()
            .withf(|keys: &[AccumulatorKey]| keys.len() == 1 && keys[0].device_id == "good")
            .times(1)
            .returning(|_| Ok(()));
        // Only the migrated key's dirty marker is removed; "bad" stays dirty
        cache
            .expect_clear_dirty()
            .withf(|k: &AccumulatorKey| k.device_id == "good")
            .times(1)
            .returning(|_| Ok(()));

        let service = service(cache, repository);
        let outcome = service.migrate_day(day(2024, 1, 1)).await.unwrap();
        assert_eq!(outcome.migrated, 1);
        assert_eq!(outcome.failed, 1);
    }

    #[tokio::test]
    async fn test_check_for_new_day_migrates_stale_day() {
        let mut cache = MockTotalsCache::new();
        let mut repository = MockDailyTotalsRepository::new();
        let stale = day(2024, 1, 1);

        cache.expect_scan_day().times(1).returning(move |day| {
            assert_eq!(day, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
            Ok(vec![AccumulatorKey::new("u1", "d1", day)])
        });
        cache
            .expect_read_totals()
            .times(1)
            .returning(|_| Ok(Some(DayTotals::new(Decimal::TWO, Decimal::ONE))));
        repository
            .expect_upsert_absolute()
            .times(1)
            .returning(|input| {
                Ok(DailyTotalsRecord {
                    owner_id: input.owner_id,
                    device_id: input.device_id,
                    day: input.day,
                    totals: input.totals,
                    created_at: None,
                    updated_at: None,
                })
            });
        cache.expect_delete_keys().times(1).returning(|_| Ok(()));
        cache.expect_clear_dirty().times(1).returning(|_| Ok(()));

        let service = service(cache, repository);
        // Pretend the process has been alive since an earlier day
        service.day_state.lock().await.current = stale;

        let rolled = service.check_for_new_day().await.unwrap();
        assert!(rolled);
        assert_eq!(service.day_state.lock().await.current, day::today());
    }

    #[tokio::test]
    async fn test_pending_retry_only_clears_migrated_day_markers() {
        let mut cache = MockTotalsCache::new();
        let mut repository = MockDailyTotalsRepository::new();
        let stale = day::previous_day(day::today());

        cache.expect_scan_day().times(1).returning(move |day| {
            Ok(vec![AccumulatorKey::new("u1", "d1", day)])
        });
        cache
            .expect_read_totals()
            .times(1)
            .returning(|_| Ok(Some(DayTotals::new(Decimal::from(3), Decimal::from(3)))));
        repository
            .expect_upsert_absolute()
            .times(1)
            .returning(|input| {
                Ok(DailyTotalsRecord {
                    owner_id: input.owner_id,
                    device_id: input.device_id,
                    day: input.day,
                    totals: input.totals,
                    created_at: None,
                    updated_at: None,
                })
            });
        cache.expect_delete_keys().times(1).returning(|_| Ok(()));
        // The retry removes exactly the retried day's marker; a live-day key
        // dirtied in the meantime must stay dirty for the flusher
        cache
            .expect_clear_dirty()
            .withf(move |k: &AccumulatorKey| k.day == stale)
            .times(1)
            .returning(|_| Ok(()));

        let service = service(cache, repository);
        service.day_state.lock().await.pending_migration = Some(stale);

        let rolled = service.check_for_new_day().await.unwrap();
        assert!(!rolled);
        assert_eq!(service.day_state.lock().await.pending_migration, None);
    }

    #[tokio::test]
    async fn test_second_rollover_is_noop() {
        let mut cache = MockTotalsCache::new();
        let repository = MockDailyTotalsRepository::new();

        // First forced rollover migrates nothing (cache already empty), and
        // the repeat scan also finds nothing: no upserts, no deletes
        cache.expect_scan_day().times(2).returning(|_| Ok(vec![]));

        let service = service(cache, repository);
        let previous = day::previous_day(day::today());

        let first = service.force_rollover(previous).await.unwrap();
        let second = service.force_rollover(previous).await.unwrap();
        assert_eq!(first, MigrationOutcome::default());
        assert_eq!(second, MigrationOutcome::default());

        // Periodic check sees no boundary and no pending work
        assert!(!service.check_for_new_day().await.unwrap());
    }
}
