//! Database module

mod schema;
mod write_buffer;

pub use write_buffer::{start_write_buffer, StatsSender, WriteBufferConfig, WriteReport};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::SinkError;
use crate::model::DailyStats;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Destination for closed daily records.
///
/// Upserts must be idempotent: writing the same record twice leaves storage
/// as if it had been written once.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn upsert(&self, stats: &DailyStats) -> Result<(), SinkError>;

    async fn upsert_batch(&self, batch: &[DailyStats]) -> Result<(), SinkError> {
        for stats in batch {
            self.upsert(stats).await?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&format!("sqlite:{}?mode=rwc", config.url))
            .await?;
        Ok(Self { pool })
    }

    /// Keep trying to connect until `connect_timeout_secs` has elapsed
    pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let started = Instant::now();

        info!("Waiting for database at {}...", config.url);
        loop {
            match Self::new(config).await {
                Ok(db) => {
                    info!("Database is ready");
                    return Ok(db);
                }
                Err(e) if started.elapsed() < timeout => {
                    warn!("Database not ready yet: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("database at {} unavailable after {:?}", config.url, timeout)
                    });
                }
            }
        }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // Enable WAL mode so API reads don't block ingest writes
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        sqlx::query(schema::CREATE_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_DATE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_total_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM customer_daily_stats")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Records for a customer on or after `from`.
    ///
    /// Returns `None` only when the customer has no records at all; a `from`
    /// past the customer's last record yields an empty list instead.
    pub async fn customer_stats(
        &self,
        customer_id: &str,
        from: Option<NaiveDate>,
    ) -> Result<Option<Vec<DailyStats>>> {
        let known: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM customer_daily_stats WHERE customer_id = ?")
                .bind(customer_id)
                .fetch_one(&self.pool)
                .await?;
        if known.0 == 0 {
            return Ok(None);
        }

        let from = from.map(|d| d.format(DATE_FORMAT).to_string());
        let rows: Vec<StatsRow> = sqlx::query_as(
            r#"
            SELECT customer_id, date, successful_requests, failed_requests,
                   uptime_percentage, avg_latency, median_latency, p99_latency
            FROM customer_daily_stats
            WHERE customer_id = ? AND (? IS NULL OR date >= ?)
            ORDER BY date
            "#,
        )
        .bind(customer_id)
        .bind(from.clone())
        .bind(from)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(row_to_stats)
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Every stored record, ordered by customer and date
    pub async fn all_stats(&self) -> Result<Vec<DailyStats>> {
        let rows: Vec<StatsRow> = sqlx::query_as(
            r#"
            SELECT customer_id, date, successful_requests, failed_requests,
                   uptime_percentage, avg_latency, median_latency, p99_latency
            FROM customer_daily_stats
            ORDER BY customer_id, date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_stats).collect()
    }
}

type StatsRow = (String, String, i64, i64, f64, f64, f64, f64);

fn row_to_stats(row: StatsRow) -> Result<DailyStats> {
    let (customer_id, date, successful, failed, uptime, avg, median, p99) = row;
    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .with_context(|| format!("invalid stored date '{}' for {}", date, customer_id))?;

    Ok(DailyStats {
        customer_id,
        date,
        successful_requests: successful,
        failed_requests: failed,
        uptime_percentage: uptime,
        avg_latency: avg,
        median_latency: median,
        p99_latency: p99,
    })
}

fn upsert_query(stats: &DailyStats, now_ms: i64) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(
        r#"
        INSERT INTO customer_daily_stats (customer_id, date, successful_requests, failed_requests,
            uptime_percentage, avg_latency, median_latency, p99_latency, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(customer_id, date) DO UPDATE SET
            successful_requests = excluded.successful_requests,
            failed_requests = excluded.failed_requests,
            uptime_percentage = excluded.uptime_percentage,
            avg_latency = excluded.avg_latency,
            median_latency = excluded.median_latency,
            p99_latency = excluded.p99_latency,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&stats.customer_id)
    .bind(stats.date.format(DATE_FORMAT).to_string())
    .bind(stats.successful_requests)
    .bind(stats.failed_requests)
    .bind(stats.uptime_percentage)
    .bind(stats.avg_latency)
    .bind(stats.median_latency)
    .bind(stats.p99_latency)
    .bind(now_ms)
    .bind(now_ms)
}

fn upsert_error(stats: &DailyStats, source: sqlx::Error) -> SinkError {
    SinkError::Upsert {
        customer_id: stats.customer_id.clone(),
        date: stats.date,
        source,
    }
}

#[async_trait]
impl StatsSink for Database {
    async fn upsert(&self, stats: &DailyStats) -> Result<(), SinkError> {
        upsert_query(stats, Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| upsert_error(stats, e))?;
        Ok(())
    }

    /// Write the whole batch in a single transaction
    async fn upsert_batch(&self, batch: &[DailyStats]) -> Result<(), SinkError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for stats in batch {
            upsert_query(stats, now_ms)
                .execute(&mut *tx)
                .await
                .map_err(|e| upsert_error(stats, e))?;
        }
        tx.commit().await?;
        Ok(())
    }
}
