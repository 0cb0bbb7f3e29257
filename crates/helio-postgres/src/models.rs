use chrono::{DateTime, NaiveDate, Utc};
use helio_domain::{DailyTotalsRecord, DayTotals};
use rust_decimal::Decimal;

/// Daily totals row for PostgreSQL storage with timestamp metadata
#[derive(Debug, Clone)]
pub struct DailyTotalsRow {
    pub owner_id: String,
    pub device_id: String,
    pub day: NaiveDate,
    pub total_a: Decimal,
    pub total_a2: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DailyTotalsRow {
    pub fn from_row(row: &tokio_postgres::Row) -> Self {
        Self {
            owner_id: row.get(0),
            device_id: row.get(1),
            day: row.get(2),
            total_a: row.get(3),
            total_a2: row.get(4),
            created_at: row.get(5),
            updated_at: row.get(6),
        }
    }
}

impl From<DailyTotalsRow> for DailyTotalsRecord {
    fn from(row: DailyTotalsRow) -> Self {
        DailyTotalsRecord {
            owner_id: row.owner_id,
            device_id: row.device_id,
            day: row.day,
            totals: DayTotals::new(row.total_a, row.total_a2),
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        }
    }
}
