use chrono::NaiveDate;
use helio_domain::{
    day, AccumulatorKey, DailyTotalsService, DayTotals, TotalsServiceConfig,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

// In-memory implementations for integration testing
mod fakes {
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use helio_domain::{
        AccumulatorKey, DailyTotalsRecord, DailyTotalsRepository, DayTotals, DomainError,
        DomainResult, NewDailyTotals, RangeQuery, RangeTotals, TotalsCache,
    };
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub struct InMemoryCache {
        entries: Mutex<HashMap<AccumulatorKey, DayTotals>>,
        dirty: Mutex<HashSet<AccumulatorKey>>,
        down: AtomicBool,
        read_delay_ms: AtomicU64,
    }

    impl InMemoryCache {
        pub fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        /// Slow down reads to widen the window between a reader's lookup
        /// and its write-back
        pub fn set_read_delay_ms(&self, millis: u64) {
            self.read_delay_ms.store(millis, Ordering::SeqCst);
        }

        pub fn insert(&self, key: AccumulatorKey, totals: DayTotals) {
            self.entries.lock().unwrap().insert(key.clone(), totals);
            self.dirty.lock().unwrap().insert(key);
        }

        pub fn contains(&self, key: &AccumulatorKey) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }

        pub fn is_dirty(&self, key: &AccumulatorKey) -> bool {
            self.dirty.lock().unwrap().contains(key)
        }

        fn check_up(&self) -> DomainResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(DomainError::CacheUnavailable("backend down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TotalsCache for InMemoryCache {
        async fn is_available(&self) -> bool {
            !self.down.load(Ordering::SeqCst)
        }

        async fn read_totals(&self, key: &AccumulatorKey) -> DomainResult<Option<DayTotals>> {
            self.check_up()?;
            let delay = self.read_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Ok(self.entries.lock().unwrap().get(key).copied())
        }

        async fn write_totals(
            &self,
            key: &AccumulatorKey,
            totals: DayTotals,
            _retention: Duration,
            mark_dirty: bool,
        ) -> DomainResult<()> {
            self.check_up()?;
            self.entries.lock().unwrap().insert(key.clone(), totals);
            if mark_dirty {
                self.dirty.lock().unwrap().insert(key.clone());
            }
            Ok(())
        }

        async fn dirty_keys(&self) -> DomainResult<Vec<AccumulatorKey>> {
            self.check_up()?;
            Ok(self.dirty.lock().unwrap().iter().cloned().collect())
        }

        async fn clear_dirty(&self, key: &AccumulatorKey) -> DomainResult<()> {
            self.check_up()?;
            self.dirty.lock().unwrap().remove(key);
            Ok(())
        }

        async fn dirty_count(&self) -> DomainResult<u64> {
            self.check_up()?;
            Ok(self.dirty.lock().unwrap().len() as u64)
        }

        async fn scan_day(&self, day: NaiveDate) -> DomainResult<Vec<AccumulatorKey>> {
            self.check_up()?;
            Ok(self
                .entries
                .lock()
                .unwrap()
                .keys()
                .filter(|key| key.day == day)
                .cloned()
                .collect())
        }

        async fn scan_owner_day(
            &self,
            owner_id: &str,
            day: NaiveDate,
        ) -> DomainResult<Vec<AccumulatorKey>> {
            self.check_up()?;
            Ok(self
                .entries
                .lock()
                .unwrap()
                .keys()
                .filter(|key| key.owner_id == owner_id && key.day == day)
                .cloned()
                .collect())
        }

        async fn delete_keys(&self, keys: &[AccumulatorKey]) -> DomainResult<()> {
            self.check_up()?;
            let mut entries = self.entries.lock().unwrap();
            for key in keys {
                entries.remove(key);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct InMemoryRepository {
        rows: Mutex<HashMap<(String, String, NaiveDate), DayTotals>>,
    }

    impl InMemoryRepository {
        pub fn get(&self, owner: &str, device: &str, day: NaiveDate) -> Option<DayTotals> {
            self.rows
                .lock()
                .unwrap()
                .get(&(owner.to_string(), device.to_string(), day))
                .copied()
        }

        fn record(
            owner_id: String,
            device_id: String,
            day: NaiveDate,
            totals: DayTotals,
        ) -> DailyTotalsRecord {
            DailyTotalsRecord {
                owner_id,
                device_id,
                day,
                totals,
                created_at: None,
                updated_at: None,
            }
        }
    }

    #[async_trait]
    impl DailyTotalsRepository for InMemoryRepository {
        async fn upsert_absolute(&self, input: NewDailyTotals) -> DomainResult<DailyTotalsRecord> {
            let key = (input.owner_id.clone(), input.device_id.clone(), input.day);
            self.rows.lock().unwrap().insert(key, input.totals);
            Ok(Self::record(
                input.owner_id,
                input.device_id,
                input.day,
                input.totals,
            ))
        }

        async fn increment_atomic(&self, delta: NewDailyTotals) -> DomainResult<DailyTotalsRecord> {
            let key = (delta.owner_id.clone(), delta.device_id.clone(), delta.day);
            let mut rows = self.rows.lock().unwrap();
            let totals = rows
                .get(&key)
                .copied()
                .unwrap_or_default()
                .plus(&delta.totals);
            rows.insert(key, totals);
            Ok(Self::record(
                delta.owner_id,
                delta.device_id,
                delta.day,
                totals,
            ))
        }

        async fn find_one(
            &self,
            owner_id: &str,
            device_id: &str,
            day: NaiveDate,
        ) -> DomainResult<Option<DailyTotalsRecord>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&(owner_id.to_string(), device_id.to_string(), day))
                .map(|totals| {
                    Self::record(owner_id.to_string(), device_id.to_string(), day, *totals)
                }))
        }

        async fn range_totals(&self, query: RangeQuery) -> DomainResult<RangeTotals> {
            let rows = self.rows.lock().unwrap();
            let mut result = RangeTotals::default();
            for ((owner, device, day), totals) in rows.iter() {
                if owner != &query.owner_id {
                    continue;
                }
                if let Some(wanted) = &query.device_id {
                    if device != wanted {
                        continue;
                    }
                }
                if let Some(start) = query.start {
                    if *day < start {
                        continue;
                    }
                }
                if let Some(end) = query.end {
                    if *day > end {
                        continue;
                    }
                }
                result.total_a += totals.total_a;
                result.total_a2 += totals.total_a2;
                result.count += 1;
            }
            Ok(result)
        }

        async fn ping(&self) -> DomainResult<()> {
            Ok(())
        }
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn totals(a: &str, a2: &str) -> DayTotals {
    DayTotals::new(dec(a), dec(a2))
}

fn build() -> (Arc<fakes::InMemoryCache>, Arc<fakes::InMemoryRepository>, DailyTotalsService) {
    let cache = Arc::new(fakes::InMemoryCache::default());
    let repository = Arc::new(fakes::InMemoryRepository::default());
    let service = DailyTotalsService::new(
        cache.clone(),
        repository.clone(),
        TotalsServiceConfig::default(),
    )
    .unwrap();
    (cache, repository, service)
}

#[tokio::test]
async fn test_repeated_increments_accumulate_exactly() {
    let (_cache, _repository, service) = build();

    let first = service
        .increment("u1", "d1", totals("1.0", "0.5"))
        .await
        .unwrap();
    assert_eq!(first, totals("1.0", "0.5"));

    let second = service
        .increment("u1", "d1", totals("1.0", "0.5"))
        .await
        .unwrap();
    assert_eq!(second, totals("2.0", "1.0"));

    // Many small deltas stay exact; 0.1 is not representable in binary
    for _ in 0..100 {
        service
            .increment("u1", "drift", totals("0.1", "0.000001"))
            .await
            .unwrap();
    }
    let drifted = service.read("u1", "drift", None).await.unwrap().unwrap();
    assert_eq!(drifted, totals("10.0", "0.000100"));
}

#[tokio::test]
async fn test_flush_persists_cached_totals_and_clears_dirty() {
    let (cache, repository, service) = build();
    let today = day::today();
    let key = AccumulatorKey::new("u1", "d1", today);

    service
        .increment("u1", "d1", totals("1.0", "0.5"))
        .await
        .unwrap();
    service
        .increment("u1", "d1", totals("1.0", "0.5"))
        .await
        .unwrap();
    assert!(cache.is_dirty(&key));

    let outcome = service.force_flush().await.unwrap();
    assert_eq!(outcome.flushed, 1);
    assert!(!cache.is_dirty(&key));
    assert_eq!(repository.get("u1", "d1", today), Some(totals("2.0", "1.0")));

    // Re-flushing with nothing dirty is a no-op
    let again = service.force_flush().await.unwrap();
    assert_eq!(again.flushed, 0);
    assert_eq!(repository.get("u1", "d1", today), Some(totals("2.0", "1.0")));
}

#[tokio::test]
async fn test_rollover_migrates_previous_day_and_resets() {
    let (cache, repository, service) = build();
    let today = day::today();
    let yesterday = day::previous_day(today);
    let old_key = AccumulatorKey::new("u1", "d1", yesterday);

    // Bucket left over from the closing day
    cache.insert(old_key.clone(), totals("7.5", "3.25"));

    let outcome = service.force_rollover(yesterday).await.unwrap();
    assert_eq!(outcome.migrated, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(
        repository.get("u1", "d1", yesterday),
        Some(totals("7.5", "3.25"))
    );
    assert!(!cache.contains(&old_key));
    assert!(!cache.is_dirty(&old_key));

    // Second rollover for the same transition: nothing left, nothing done
    let repeat = service.force_rollover(yesterday).await.unwrap();
    assert_eq!(repeat.migrated, 0);

    // A new increment starts today's bucket from zero
    let fresh = service
        .increment("u1", "d1", totals("0.5", "0.5"))
        .await
        .unwrap();
    assert_eq!(fresh, totals("0.5", "0.5"));
    assert!(cache.contains(&AccumulatorKey::new("u1", "d1", today)));
}

#[tokio::test]
async fn test_increment_racing_a_rollover_is_not_lost() {
    let (cache, repository, service) = build();
    let service = Arc::new(service);
    let today = day::today();

    // Seed today's bucket at 5/5 and persist it
    for _ in 0..5 {
        service.increment("u1", "d1", totals("1", "1")).await.unwrap();
    }
    service.force_flush().await.unwrap();
    assert_eq!(repository.get("u1", "d1", today), Some(totals("5", "5")));

    // Start an increment whose cache lookup is slow, then trigger a manual
    // rollover for the same day while that increment is still in flight.
    // The rollover must wait for the increment to finish, so the migrated
    // value includes the sixth unit instead of overwriting it.
    cache.set_read_delay_ms(500);
    let in_flight = {
        let service = service.clone();
        tokio::spawn(async move { service.increment("u1", "d1", totals("1", "1")).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let outcome = service.force_rollover(today).await.unwrap();
    cache.set_read_delay_ms(0);
    assert_eq!(outcome.migrated, 1);
    assert_eq!(in_flight.await.unwrap().unwrap(), totals("6", "6"));

    service.force_flush().await.unwrap();
    assert_eq!(repository.get("u1", "d1", today), Some(totals("6", "6")));
}

#[tokio::test]
async fn test_rollover_of_past_day_keeps_live_day_flushable() {
    let (cache, repository, service) = build();
    let today = day::today();
    let yesterday = day::previous_day(today);
    let live_key = AccumulatorKey::new("u1", "live", today);

    // A stale bucket from yesterday plus unflushed totals for today
    cache.insert(AccumulatorKey::new("u1", "d1", yesterday), totals("7", "7"));
    service.increment("u1", "live", totals("3", "3")).await.unwrap();
    assert!(cache.is_dirty(&live_key));

    let outcome = service.force_rollover(yesterday).await.unwrap();
    assert_eq!(outcome.migrated, 1);

    // Migrating yesterday must not discard today's dirty marker
    assert!(cache.is_dirty(&live_key));
    let flushed = service.force_flush().await.unwrap();
    assert_eq!(flushed.flushed, 1);
    assert_eq!(repository.get("u1", "live", today), Some(totals("3", "3")));
}

#[tokio::test]
async fn test_cache_outage_degrades_to_durable_store() {
    let (cache, repository, service) = build();
    let today = day::today();

    cache.set_down(true);

    let first = service
        .increment("u1", "d1", totals("1.5", "0.5"))
        .await
        .unwrap();
    assert_eq!(first, totals("1.5", "0.5"));
    let second = service
        .increment("u1", "d1", totals("0.5", "0.5"))
        .await
        .unwrap();
    assert_eq!(second, totals("2.0", "1.0"));

    // The store took the writes directly
    assert_eq!(repository.get("u1", "d1", today), Some(totals("2.0", "1.0")));

    // Reads also fall back while the cache is down
    let read = service.read("u1", "d1", None).await.unwrap();
    assert_eq!(read, Some(totals("2.0", "1.0")));

    // Cache recovers: reads warm it again
    cache.set_down(false);
    let warmed = service.read("u1", "d1", None).await.unwrap();
    assert_eq!(warmed, Some(totals("2.0", "1.0")));
    assert!(cache.contains(&AccumulatorKey::new("u1", "d1", today)));
}

#[tokio::test]
async fn test_read_miss_everywhere_is_none() {
    let (_cache, _repository, service) = build();
    let missing = service
        .read("u1", "unknown", Some(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn test_todays_totals_lists_devices_for_owner() {
    let (_cache, _repository, service) = build();

    service
        .increment("u1", "d1", totals("1.0", "0.5"))
        .await
        .unwrap();
    service
        .increment("u1", "d2", totals("2.0", "0.5"))
        .await
        .unwrap();
    service
        .increment("u2", "other", totals("9.0", "9.0"))
        .await
        .unwrap();

    let mut listing = service.todays_totals("u1", None).await.unwrap();
    listing.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].device_id, "d1");
    assert_eq!(listing[0].totals, totals("1.0", "0.5"));
    assert_eq!(listing[1].device_id, "d2");

    let single = service.todays_totals("u1", Some("d2")).await.unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].totals, totals("2.0", "0.5"));
}

#[tokio::test]
async fn test_info_reports_dirty_backlog() {
    let (cache, _repository, service) = build();

    service
        .increment("u1", "d1", totals("1.0", "0.0"))
        .await
        .unwrap();
    let info = service.info().await;
    assert!(info.cache_reachable);
    assert_eq!(info.pending_dirty_keys, 1);
    assert_eq!(info.current_day, day::today());

    cache.set_down(true);
    let degraded = service.info().await;
    assert!(!degraded.cache_reachable);
    assert_eq!(degraded.pending_dirty_keys, 0);
}
