use crate::cache::TotalsCache;
use crate::day;
use crate::error::{DomainError, DomainResult};
use crate::repository::DailyTotalsRepository;
use crate::types::{
    AccumulatorKey, DayTotals, DeviceTotals, NewDailyTotals, RangeQuery, RangeTotals, ServiceInfo,
};
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Tunables for the accumulator, flusher and rollover manager.
#[derive(Debug, Clone)]
pub struct TotalsServiceConfig {
    /// Retention expiry refreshed on every cached write; safety net
    /// against orphaned keys
    pub cache_retention: Duration,
    /// Bound on durable-store calls taken on the synchronous fallback path
    pub fallback_timeout: Duration,
    /// Interval between write-back flush cycles
    pub flush_interval: Duration,
    /// Keys persisted per flush batch
    pub flush_batch_size: usize,
    /// Pause between flush batches to smooth store load
    pub flush_batch_delay: Duration,
    /// Interval between day-boundary checks
    pub rollover_check_interval: Duration,
}

impl Default for TotalsServiceConfig {
    fn default() -> Self {
        Self {
            cache_retention: Duration::from_secs(7 * 24 * 3600),
            fallback_timeout: Duration::from_secs(3),
            flush_interval: Duration::from_secs(300),
            flush_batch_size: 5,
            flush_batch_delay: Duration::from_millis(50),
            rollover_check_interval: Duration::from_secs(600),
        }
    }
}

impl TotalsServiceConfig {
    /// Retention must outlive both background intervals or dirty data can
    /// expire before it is ever persisted.
    pub fn validate(&self) -> DomainResult<()> {
        if self.flush_batch_size == 0 {
            return Err(DomainError::InvalidConfig(
                "flush_batch_size must be at least 1".to_string(),
            ));
        }
        if self.cache_retention <= self.flush_interval {
            return Err(DomainError::InvalidConfig(format!(
                "cache retention {:?} must exceed the flush interval {:?}",
                self.cache_retention, self.flush_interval
            )));
        }
        if self.cache_retention <= self.rollover_check_interval {
            return Err(DomainError::InvalidConfig(format!(
                "cache retention {:?} must exceed the rollover check interval {:?}",
                self.cache_retention, self.rollover_check_interval
            )));
        }
        Ok(())
    }
}

pub(crate) struct DayState {
    pub(crate) current: NaiveDate,
    /// Day whose migration had per-key failures, retried on the next check
    pub(crate) pending_migration: Option<NaiveDate>,
}

/// Write-back accumulator for per-device daily totals.
///
/// Increments are applied to the cache with exact decimal arithmetic and
/// persisted asynchronously by the flusher. When the cache backend is
/// unreachable the service degrades to atomic durable-store operations with
/// the same external contract.
///
/// Linearizability per key comes from a single-writer model: all increments
/// flow through one ingestion consumer task, and each increment holds the
/// day-state mutex from its boundary check through its write-back, so
/// rollover migration is mutually exclusive with the whole increment.
pub struct DailyTotalsService {
    pub(crate) cache: Arc<dyn TotalsCache>,
    pub(crate) repository: Arc<dyn DailyTotalsRepository>,
    pub(crate) config: TotalsServiceConfig,
    pub(crate) day_state: Mutex<DayState>,
    cache_online: AtomicBool,
}

impl DailyTotalsService {
    pub fn new(
        cache: Arc<dyn TotalsCache>,
        repository: Arc<dyn DailyTotalsRepository>,
        config: TotalsServiceConfig,
    ) -> DomainResult<Self> {
        config.validate()?;
        Ok(Self {
            cache,
            repository,
            config,
            day_state: Mutex::new(DayState {
                current: day::today(),
                pending_migration: None,
            }),
            cache_online: AtomicBool::new(true),
        })
    }

    pub fn config(&self) -> &TotalsServiceConfig {
        &self.config
    }

    /// Apply one increment and return the new totals. The only legal way to
    /// grow a bucket.
    ///
    /// The day-state lock is held for the entire operation, not just the
    /// boundary check: a migration running concurrently could otherwise
    /// delete the bucket between the check and the write-back, and the
    /// delta would later be flushed over the migrated total.
    pub async fn increment(
        &self,
        owner_id: &str,
        device_id: &str,
        delta: DayTotals,
    ) -> DomainResult<DayTotals> {
        let mut state = self.day_state.lock().await;
        let day = self.advance_day(&mut state).await;
        let key = AccumulatorKey::new(owner_id, device_id, day);

        if self.cache.is_available().await {
            match self.increment_in_cache(&key, delta).await {
                Ok(totals) => {
                    self.note_cache_state(true);
                    return Ok(totals);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "cache increment failed, using durable store");
                    self.note_cache_state(false);
                }
            }
        } else {
            self.note_cache_state(false);
        }

        self.increment_in_store(&key, delta).await
    }

    async fn increment_in_cache(
        &self,
        key: &AccumulatorKey,
        delta: DayTotals,
    ) -> DomainResult<DayTotals> {
        let current = self.cache.read_totals(key).await?.unwrap_or_default();
        let next = current.plus(&delta);
        // Absolute write-back, never a native float increment
        self.cache
            .write_totals(key, next, self.config.cache_retention, true)
            .await?;
        Ok(next)
    }

    async fn increment_in_store(
        &self,
        key: &AccumulatorKey,
        delta: DayTotals,
    ) -> DomainResult<DayTotals> {
        let input = NewDailyTotals::from_key(key, delta);
        match timeout(
            self.config.fallback_timeout,
            self.repository.increment_atomic(input),
        )
        .await
        {
            Ok(Ok(record)) => Ok(record.totals),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "fallback increment failed");
                Ok(DayTotals::default())
            }
            Err(_) => {
                warn!(
                    key = %key,
                    timeout_ms = self.config.fallback_timeout.as_millis() as u64,
                    "fallback increment timed out"
                );
                Ok(DayTotals::default())
            }
        }
    }

    /// Read totals for one bucket, defaulting to the live day. Cache misses
    /// fall through to the durable store and warm the cache.
    pub async fn read(
        &self,
        owner_id: &str,
        device_id: &str,
        day: Option<NaiveDate>,
    ) -> DomainResult<Option<DayTotals>> {
        let day = day.unwrap_or_else(day::today);
        let key = AccumulatorKey::new(owner_id, device_id, day);

        if self.cache.is_available().await {
            match self.read_through_cache(&key).await {
                Ok(found) => {
                    self.note_cache_state(true);
                    return Ok(found);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "cache read failed, using durable store");
                    self.note_cache_state(false);
                }
            }
        } else {
            self.note_cache_state(false);
        }

        self.read_from_store(&key).await
    }

    async fn read_through_cache(&self, key: &AccumulatorKey) -> DomainResult<Option<DayTotals>> {
        if let Some(totals) = self.cache.read_totals(key).await? {
            return Ok(Some(totals));
        }
        match self.read_from_store(key).await? {
            Some(totals) => {
                if let Err(e) = self
                    .cache
                    .write_totals(key, totals, self.config.cache_retention, false)
                    .await
                {
                    warn!(key = %key, error = %e, "failed to warm cache");
                }
                Ok(Some(totals))
            }
            None => Ok(None),
        }
    }

    async fn read_from_store(&self, key: &AccumulatorKey) -> DomainResult<Option<DayTotals>> {
        match timeout(
            self.config.fallback_timeout,
            self.repository
                .find_one(&key.owner_id, &key.device_id, key.day),
        )
        .await
        {
            Ok(Ok(record)) => Ok(record.map(|r| r.totals)),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "durable read failed");
                Ok(None)
            }
            Err(_) => {
                warn!(key = %key, "durable read timed out");
                Ok(None)
            }
        }
    }

    /// List the live day's totals for one owner, optionally narrowed to a
    /// single device. Served from the cache; an unreachable cache yields an
    /// empty listing rather than an error.
    pub async fn todays_totals(
        &self,
        owner_id: &str,
        device_id: Option<&str>,
    ) -> DomainResult<Vec<DeviceTotals>> {
        let day = day::today();

        if let Some(device_id) = device_id {
            let totals = self.read(owner_id, device_id, Some(day)).await?;
            return Ok(totals
                .map(|totals| {
                    vec![DeviceTotals {
                        device_id: device_id.to_string(),
                        totals,
                    }]
                })
                .unwrap_or_default());
        }

        if !self.cache.is_available().await {
            self.note_cache_state(false);
            debug!(owner_id, "cache unreachable, returning empty today's listing");
            return Ok(Vec::new());
        }

        let keys = self.cache.scan_owner_day(owner_id, day).await?;
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(totals) = self.cache.read_totals(&key).await? {
                results.push(DeviceTotals {
                    device_id: key.device_id,
                    totals,
                });
            }
        }
        Ok(results)
    }

    /// Summed totals over a date range, straight from the durable store
    pub async fn range_totals(&self, query: RangeQuery) -> DomainResult<RangeTotals> {
        self.repository.range_totals(query).await
    }

    /// Operational snapshot: cache reachability, dirty backlog, next
    /// scheduled rollover.
    pub async fn info(&self) -> ServiceInfo {
        let cache_reachable = self.cache.is_available().await;
        let pending_dirty_keys = if cache_reachable {
            self.cache.dirty_count().await.unwrap_or(0)
        } else {
            0
        };
        let current_day = self.day_state.lock().await.current;
        ServiceInfo {
            cache_reachable,
            pending_dirty_keys,
            current_day,
            next_rollover_at: day::next_midnight(chrono::Utc::now()),
        }
    }

    /// Log availability transitions exactly once per flip
    fn note_cache_state(&self, online: bool) {
        let was_online = self.cache_online.swap(online, Ordering::Relaxed);
        if was_online && !online {
            warn!("cache backend unreachable, degrading to durable-store writes");
        } else if !was_online && online {
            info!("cache backend reachable again");
        }
    }
}
