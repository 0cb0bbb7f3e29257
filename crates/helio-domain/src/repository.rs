use crate::error::DomainResult;
use crate::types::{DailyTotalsRecord, NewDailyTotals, RangeQuery, RangeTotals};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Durable system of record for daily totals, unique on
/// (owner, device, day). Infrastructure layer (helio-postgres)
/// implements this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DailyTotalsRepository: Send + Sync {
    /// Idempotent set-if-absent-else-overwrite with absolute values
    async fn upsert_absolute(&self, input: NewDailyTotals) -> DomainResult<DailyTotalsRecord>;

    /// Atomic add at the store, the fallback path when the cache is down
    async fn increment_atomic(&self, delta: NewDailyTotals) -> DomainResult<DailyTotalsRecord>;

    /// Read one bucket by key
    async fn find_one(
        &self,
        owner_id: &str,
        device_id: &str,
        day: NaiveDate,
    ) -> DomainResult<Option<DailyTotalsRecord>>;

    /// Summed totals over a date range; range queries bypass the cache
    async fn range_totals(&self, query: RangeQuery) -> DomainResult<RangeTotals>;

    /// Connectivity probe for startup checks
    async fn ping(&self) -> DomainResult<()>;
}

/// Downstream fan-out collaborator for device identity updates. The core
/// only resolves the display name; delivery to UI clients lives outside it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TotalsNotifier: Send + Sync {
    async fn device_identity_seen(
        &self,
        owner_id: &str,
        device_id: &str,
        display_name: &str,
    ) -> DomainResult<()>;
}
