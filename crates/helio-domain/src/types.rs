use chrono::NaiveDate;
use rust_decimal::Decimal;

/// One inbound transport message, consumed immediately, never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub owner_id: String,
    pub device_id: String,
    pub raw_payload: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// Identifies one counter bucket: (owner, device, fixed-offset calendar day)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccumulatorKey {
    pub owner_id: String,
    pub device_id: String,
    pub day: NaiveDate,
}

impl AccumulatorKey {
    pub fn new(owner_id: impl Into<String>, device_id: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            owner_id: owner_id.into(),
            device_id: device_id.into(),
            day,
        }
    }
}

impl std::fmt::Display for AccumulatorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.owner_id,
            self.device_id,
            crate::day::day_string(self.day)
        )
    }
}

/// Cumulative totals for one bucket, exact base-10 values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DayTotals {
    pub total_a: Decimal,
    pub total_a2: Decimal,
}

impl DayTotals {
    pub fn new(total_a: Decimal, total_a2: Decimal) -> Self {
        Self { total_a, total_a2 }
    }

    pub fn is_zero(&self) -> bool {
        self.total_a.is_zero() && self.total_a2.is_zero()
    }

    /// Exact decimal sum, never a native float add
    pub fn plus(&self, delta: &DayTotals) -> DayTotals {
        DayTotals {
            total_a: self.total_a + delta.total_a,
            total_a2: self.total_a2 + delta.total_a2,
        }
    }
}

/// Durable row for one (owner, device, day) bucket
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTotalsRecord {
    pub owner_id: String,
    pub device_id: String,
    pub day: NaiveDate,
    pub totals: DayTotals,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Input for durable upserts and atomic increments
#[derive(Debug, Clone, PartialEq)]
pub struct NewDailyTotals {
    pub owner_id: String,
    pub device_id: String,
    pub day: NaiveDate,
    pub totals: DayTotals,
}

impl NewDailyTotals {
    pub fn from_key(key: &AccumulatorKey, totals: DayTotals) -> Self {
        Self {
            owner_id: key.owner_id.clone(),
            device_id: key.device_id.clone(),
            day: key.day,
            totals,
        }
    }
}

/// Per-device totals as returned by today's-totals listings
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTotals {
    pub device_id: String,
    pub totals: DayTotals,
}

/// Input for summed range queries, served by the durable store
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub owner_id: String,
    pub device_id: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Summed totals over a date range
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeTotals {
    pub total_a: Decimal,
    pub total_a2: Decimal,
    pub count: u64,
}

/// Operational snapshot for health queries
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub cache_reachable: bool,
    pub pending_dirty_keys: u64,
    pub current_day: NaiveDate,
    pub next_rollover_at: chrono::DateTime<chrono::FixedOffset>,
}
