//! Redis-backed accumulator cache.
//!
//! Each bucket is a hash at `{prefix}:{owner}:{device}:{YYYY-MM-DD}` with
//! fields `totalA` and `totalA2` holding decimal strings. Keys awaiting
//! write-back are tracked in a set at `{prefix}:dirty` whose members are
//! `{owner}:{device}:{YYYY-MM-DD}`. Enumeration always goes through SCAN,
//! never KEYS.

use async_trait::async_trait;
use chrono::NaiveDate;
use helio_domain::{
    day, AccumulatorKey, DayTotals, DomainError, DomainResult, TotalsCache,
};
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::config::RedisConfig;

const FIELD_TOTAL_A: &str = "totalA";
const FIELD_TOTAL_A2: &str = "totalA2";

pub struct RedisTotalsCache {
    client: redis::Client,
    key_prefix: String,
    dirty_set_key: String,
    command_timeout: Duration,
    scan_count: usize,
}

impl RedisTotalsCache {
    pub fn new(config: &RedisConfig) -> DomainResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| DomainError::InvalidConfig(format!("redis url: {e}")))?;
        Ok(Self {
            client,
            dirty_set_key: format!("{}:dirty", config.key_prefix),
            key_prefix: config.key_prefix.clone(),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            scan_count: config.scan_count,
        })
    }

    fn bucket_key(&self, key: &AccumulatorKey) -> String {
        format!(
            "{}:{}:{}:{}",
            self.key_prefix,
            key.owner_id,
            key.device_id,
            day::day_string(key.day)
        )
    }

    fn dirty_member(key: &AccumulatorKey) -> String {
        format!(
            "{}:{}:{}",
            key.owner_id,
            key.device_id,
            day::day_string(key.day)
        )
    }

    /// Parse a dirty-set member of the form `{owner}:{device}:{day}`
    fn parse_member(member: &str) -> DomainResult<AccumulatorKey> {
        let mut parts = member.splitn(3, ':');
        let (Some(owner), Some(device), Some(raw_day)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(DomainError::InvalidKey(member.to_string()));
        };
        if owner.is_empty() || device.is_empty() {
            return Err(DomainError::InvalidKey(member.to_string()));
        }
        let parsed_day = day::parse_day(raw_day)
            .ok_or_else(|| DomainError::InvalidKey(member.to_string()))?;
        Ok(AccumulatorKey::new(owner, device, parsed_day))
    }

    /// Parse a full bucket key back into its components
    fn parse_bucket_key(&self, raw: &str) -> DomainResult<AccumulatorKey> {
        let member = raw
            .strip_prefix(&format!("{}:", self.key_prefix))
            .ok_or_else(|| DomainError::InvalidKey(raw.to_string()))?;
        Self::parse_member(member)
    }

    async fn connection(&self) -> DomainResult<redis::aio::MultiplexedConnection> {
        match tokio::time::timeout(
            self.command_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(DomainError::CacheUnavailable(e.to_string())),
            Err(_) => Err(DomainError::CacheUnavailable(
                "connection attempt timed out".to_string(),
            )),
        }
    }

    async fn run<T, F>(&self, fut: F) -> DomainResult<T>
    where
        F: std::future::Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DomainError::CacheUnavailable(e.to_string())),
            Err(_) => Err(DomainError::CacheUnavailable(
                "command timed out".to_string(),
            )),
        }
    }

    /// Cursor-based SCAN over `pattern`, parsing each hit into a key.
    /// Unparseable keys are logged and skipped.
    async fn scan_pattern(&self, pattern: &str) -> DomainResult<Vec<AccumulatorKey>> {
        let mut conn = self.connection().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(self.scan_count)
                        .query_async(&mut conn),
                )
                .await?;
            for raw in batch {
                match self.parse_bucket_key(&raw) {
                    Ok(key) => keys.push(key),
                    Err(e) => warn!(key = %raw, error = %e, "skipping malformed cache key"),
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    fn parse_decimal(field: Option<String>) -> Decimal {
        match field {
            Some(raw) => Decimal::from_str(&raw).unwrap_or_else(|_| {
                warn!(value = %raw, "unparseable cached total, treating as zero");
                Decimal::default()
            }),
            None => Decimal::default(),
        }
    }
}

#[async_trait]
impl TotalsCache for RedisTotalsCache {
    async fn is_available(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        self.run(redis::cmd("PING").query_async::<String>(&mut conn))
            .await
            .is_ok()
    }

    async fn read_totals(&self, key: &AccumulatorKey) -> DomainResult<Option<DayTotals>> {
        let mut conn = self.connection().await?;
        let bucket = self.bucket_key(key);
        let (total_a, total_a2): (Option<String>, Option<String>) = self
            .run(
                redis::cmd("HMGET")
                    .arg(&bucket)
                    .arg(FIELD_TOTAL_A)
                    .arg(FIELD_TOTAL_A2)
                    .query_async(&mut conn),
            )
            .await?;
        if total_a.is_none() && total_a2.is_none() {
            return Ok(None);
        }
        Ok(Some(DayTotals::new(
            Self::parse_decimal(total_a),
            Self::parse_decimal(total_a2),
        )))
    }

    async fn write_totals(
        &self,
        key: &AccumulatorKey,
        totals: DayTotals,
        retention: Duration,
        mark_dirty: bool,
    ) -> DomainResult<()> {
        let mut conn = self.connection().await?;
        let bucket = self.bucket_key(key);
        let retention_secs = retention.as_secs() as i64;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&bucket, FIELD_TOTAL_A, totals.total_a.to_string())
            .ignore()
            .hset(&bucket, FIELD_TOTAL_A2, totals.total_a2.to_string())
            .ignore()
            .expire(&bucket, retention_secs)
            .ignore();
        if mark_dirty {
            pipe.sadd(&self.dirty_set_key, Self::dirty_member(key))
                .ignore()
                .expire(&self.dirty_set_key, retention_secs)
                .ignore();
        }
        self.run(pipe.query_async::<()>(&mut conn)).await
    }

    async fn dirty_keys(&self) -> DomainResult<Vec<AccumulatorKey>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = self.run(conn.smembers(&self.dirty_set_key)).await?;
        let mut keys = Vec::with_capacity(members.len());
        for member in members {
            match Self::parse_member(&member) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(member = %member, error = %e, "skipping malformed dirty member"),
            }
        }
        Ok(keys)
    }

    async fn clear_dirty(&self, key: &AccumulatorKey) -> DomainResult<()> {
        let mut conn = self.connection().await?;
        self.run(conn.srem::<_, _, ()>(&self.dirty_set_key, Self::dirty_member(key)))
            .await
    }

    async fn dirty_count(&self) -> DomainResult<u64> {
        let mut conn = self.connection().await?;
        self.run(conn.scard(&self.dirty_set_key)).await
    }

    async fn scan_day(&self, day: NaiveDate) -> DomainResult<Vec<AccumulatorKey>> {
        let pattern = format!("{}:*:*:{}", self.key_prefix, day::day_string(day));
        self.scan_pattern(&pattern).await
    }

    async fn scan_owner_day(
        &self,
        owner_id: &str,
        day: NaiveDate,
    ) -> DomainResult<Vec<AccumulatorKey>> {
        let pattern = format!(
            "{}:{}:*:{}",
            self.key_prefix,
            owner_id,
            day::day_string(day)
        );
        self.scan_pattern(&pattern).await
    }

    async fn delete_keys(&self, keys: &[AccumulatorKey]) -> DomainResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let bucket_keys: Vec<String> = keys.iter().map(|key| self.bucket_key(key)).collect();
        self.run(conn.del::<_, ()>(bucket_keys)).await
    }
}
