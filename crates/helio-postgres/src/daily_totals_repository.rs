use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use helio_domain::{
    DailyTotalsRecord, DailyTotalsRepository, DomainError, DomainResult, NewDailyTotals,
    RangeQuery, RangeTotals,
};
use tracing::debug;

use crate::{client::PostgresClient, models::DailyTotalsRow};

const RETURNING: &str =
    "RETURNING owner_id, device_id, day, total_a, total_a2, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresDailyTotalsRepository {
    client: PostgresClient,
}

impl PostgresDailyTotalsRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DailyTotalsRepository for PostgresDailyTotalsRepository {
    async fn upsert_absolute(&self, input: NewDailyTotals) -> DomainResult<DailyTotalsRecord> {
        debug!(
            owner_id = %input.owner_id,
            device_id = %input.device_id,
            day = %input.day,
            "upserting daily totals"
        );

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let now = Utc::now();
        let query = format!(
            "INSERT INTO daily_totals (owner_id, device_id, day, total_a, total_a2, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             ON CONFLICT (owner_id, device_id, day)
             DO UPDATE SET total_a = EXCLUDED.total_a,
                           total_a2 = EXCLUDED.total_a2,
                           updated_at = EXCLUDED.updated_at
             {RETURNING}"
        );
        let row = conn
            .query_one(
                &query,
                &[
                    &input.owner_id,
                    &input.device_id,
                    &input.day,
                    &input.totals.total_a,
                    &input.totals.total_a2,
                    &now,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(DailyTotalsRow::from_row(&row).into())
    }

    async fn increment_atomic(&self, delta: NewDailyTotals) -> DomainResult<DailyTotalsRecord> {
        debug!(
            owner_id = %delta.owner_id,
            device_id = %delta.device_id,
            day = %delta.day,
            "incrementing daily totals in place"
        );

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let now = Utc::now();
        let query = format!(
            "INSERT INTO daily_totals (owner_id, device_id, day, total_a, total_a2, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             ON CONFLICT (owner_id, device_id, day)
             DO UPDATE SET total_a = daily_totals.total_a + EXCLUDED.total_a,
                           total_a2 = daily_totals.total_a2 + EXCLUDED.total_a2,
                           updated_at = EXCLUDED.updated_at
             {RETURNING}"
        );
        let row = conn
            .query_one(
                &query,
                &[
                    &delta.owner_id,
                    &delta.device_id,
                    &delta.day,
                    &delta.totals.total_a,
                    &delta.totals.total_a2,
                    &now,
                ],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(DailyTotalsRow::from_row(&row).into())
    }

    async fn find_one(
        &self,
        owner_id: &str,
        device_id: &str,
        day: NaiveDate,
    ) -> DomainResult<Option<DailyTotalsRecord>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT owner_id, device_id, day, total_a, total_a2, created_at, updated_at
                 FROM daily_totals
                 WHERE owner_id = $1 AND device_id = $2 AND day = $3",
                &[&owner_id, &device_id, &day],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.map(|row| DailyTotalsRow::from_row(&row).into()))
    }

    async fn range_totals(&self, query: RangeQuery) -> DomainResult<RangeTotals> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_one(
                "SELECT COALESCE(SUM(total_a), 0)::numeric,
                        COALESCE(SUM(total_a2), 0)::numeric,
                        COUNT(*)
                 FROM daily_totals
                 WHERE owner_id = $1
                   AND ($2::text IS NULL OR device_id = $2)
                   AND ($3::date IS NULL OR day >= $3)
                   AND ($4::date IS NULL OR day <= $4)",
                &[&query.owner_id, &query.device_id, &query.start, &query.end],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let count: i64 = row.get(2);
        Ok(RangeTotals {
            total_a: row.get(0),
            total_a2: row.get(1),
            count: count as u64,
        })
    }

    async fn ping(&self) -> DomainResult<()> {
        self.client
            .ping()
            .await
            .map_err(DomainError::RepositoryError)
    }
}
