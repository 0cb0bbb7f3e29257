use crate::error::DomainResult;
use crate::types::{AccumulatorKey, DayTotals};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;

/// Write-back cache holding the live day's accumulators and the dirty set.
/// Infrastructure layer (helio-redis) implements this trait.
///
/// The dirty set invariant: a key is dirty if and only if its cached totals
/// may differ from the durable store's last-known value for that key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TotalsCache: Send + Sync {
    /// Cheap reachability probe, used to pick the cache or fallback path
    async fn is_available(&self) -> bool;

    /// Read cached totals for one bucket
    async fn read_totals(&self, key: &AccumulatorKey) -> DomainResult<Option<DayTotals>>;

    /// Write absolute totals for one bucket and refresh its retention
    /// expiry. When `mark_dirty` is set the key is also added to the dirty
    /// set; cache-warming reads write with `mark_dirty` false.
    async fn write_totals(
        &self,
        key: &AccumulatorKey,
        totals: DayTotals,
        retention: Duration,
        mark_dirty: bool,
    ) -> DomainResult<()>;

    /// Snapshot of the dirty set
    async fn dirty_keys(&self) -> DomainResult<Vec<AccumulatorKey>>;

    /// Remove one key from the dirty set after a confirmed durable write
    /// or a completed day migration
    async fn clear_dirty(&self, key: &AccumulatorKey) -> DomainResult<()>;

    /// Number of keys pending persistence
    async fn dirty_count(&self) -> DomainResult<u64>;

    /// Cursor-based enumeration of every cached key for one day
    async fn scan_day(&self, day: NaiveDate) -> DomainResult<Vec<AccumulatorKey>>;

    /// Cursor-based enumeration of one owner's cached keys for one day
    async fn scan_owner_day(
        &self,
        owner_id: &str,
        day: NaiveDate,
    ) -> DomainResult<Vec<AccumulatorKey>>;

    /// Delete cache entries in backend-side batches
    async fn delete_keys(&self, keys: &[AccumulatorKey]) -> DomainResult<()>;
}
