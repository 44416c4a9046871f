use std::io;
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;

use logstats::config::{Config, DatabaseConfig};
use logstats::db::{Database, StatsSink};
use logstats::pipeline::ingest;
use logstats::DailyStats;

async fn database() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: dir.path().join("stats.db").to_string_lossy().into_owned(),
        ..Default::default()
    };
    let db = Database::connect_with_retry(&config).await.unwrap();
    db.run_migrations().await.unwrap();
    (db, dir)
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn stats(customer: &str, day: &str, successful: i64) -> DailyStats {
    DailyStats {
        customer_id: customer.to_string(),
        date: date(day),
        successful_requests: successful,
        failed_requests: 1,
        uptime_percentage: 99.5,
        avg_latency: 0.75,
        median_latency: 0.75,
        p99_latency: 0.995,
    }
}

#[tokio::test]
async fn upsert_succeeds_immediately_after_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: dir.path().join("fresh.db").to_string_lossy().into_owned(),
        ..Default::default()
    };
    assert!(config.max_connections > 1);
    let db = Database::new(&config).await.unwrap();
    db.run_migrations().await.unwrap();

    // Each call may land on a different pooled connection
    for day in ["2024-10-26", "2024-10-27", "2024-10-28", "2024-10-26"] {
        db.upsert(&stats("cust_1", day, 2)).await.unwrap();
    }
    db.upsert_batch(&[stats("cust_2", "2024-10-26", 1)])
        .await
        .unwrap();

    assert_eq!(db.get_total_count().await.unwrap(), 4);
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let (db, _dir) = database().await;
    let record = stats("cust_1", "2024-10-26", 2);

    db.upsert(&record).await.unwrap();
    db.upsert(&record).await.unwrap();

    assert_eq!(db.get_total_count().await.unwrap(), 1);
    assert_eq!(db.all_stats().await.unwrap(), vec![record]);
}

#[tokio::test]
async fn upsert_overwrites_measures_for_existing_key() {
    let (db, _dir) = database().await;

    db.upsert(&stats("cust_1", "2024-10-26", 2)).await.unwrap();
    let updated = DailyStats {
        uptime_percentage: 42.0,
        ..stats("cust_1", "2024-10-26", 7)
    };
    db.upsert(&updated).await.unwrap();

    assert_eq!(db.all_stats().await.unwrap(), vec![updated]);
}

#[tokio::test]
async fn batch_upsert_writes_every_record() {
    let (db, _dir) = database().await;
    let batch = vec![
        stats("cust_1", "2024-10-26", 1),
        stats("cust_1", "2024-10-27", 2),
        stats("cust_2", "2024-10-26", 3),
    ];

    db.upsert_batch(&batch).await.unwrap();
    db.upsert_batch(&batch).await.unwrap();

    assert_eq!(db.get_total_count().await.unwrap(), 3);
}

#[tokio::test]
async fn unknown_customer_is_distinct_from_empty_range() {
    let (db, _dir) = database().await;
    db.upsert(&stats("cust_1", "2024-10-26", 1)).await.unwrap();
    db.upsert(&stats("cust_1", "2024-10-27", 1)).await.unwrap();
    db.upsert(&stats("cust_2", "2024-10-26", 1)).await.unwrap();

    assert!(db.customer_stats("nobody", None).await.unwrap().is_none());

    let all = db.customer_stats("cust_1", None).await.unwrap().unwrap();
    assert_eq!(all.len(), 2);

    let from = db
        .customer_stats("cust_1", Some(date("2024-10-27")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from.len(), 1);
    assert_eq!(from[0].date, date("2024-10-27"));

    let past_end = db
        .customer_stats("cust_1", Some(date("2024-11-01")))
        .await
        .unwrap();
    assert_eq!(past_end, Some(vec![]));
}

#[tokio::test]
async fn migrations_can_run_twice() {
    let (db, _dir) = database().await;
    db.run_migrations().await.unwrap();
    assert_eq!(db.get_total_count().await.unwrap(), 0);
}

#[tokio::test]
async fn ingest_into_sqlite_end_to_end() {
    let (db, _dir) = database().await;
    let lines = [
        "2024-10-26 03:05:00 cust_1 /api/v1/resource2 200 0.5",
        "2024-10-26 03:06:00 cust_1 /api/v1/resource2 200 0.75",
        "2024-10-26 03:07:00 cust_1 /api/v1/resource1 403 1.",
        "garbage",
        "2024-10-27 03:07:00 cust_1 /api/v1/resource1 200 2.",
    ];
    let source = tokio_stream::iter(lines.into_iter().map(Ok::<_, io::Error>));
    let sink: Arc<dyn StatsSink> = Arc::new(db.clone());

    let (report, written) = ingest(&Config::default(), sink, source, std::future::pending())
        .await
        .unwrap();

    assert_eq!(report.malformed, 1);
    assert_eq!(written.written, 2);

    // Re-running the same input must leave storage unchanged
    let source = tokio_stream::iter(lines.into_iter().map(Ok::<_, io::Error>));
    let sink: Arc<dyn StatsSink> = Arc::new(db.clone());
    ingest(&Config::default(), sink, source, std::future::pending())
        .await
        .unwrap();

    let stored = db.customer_stats("cust_1", None).await.unwrap().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].successful_requests, 2);
    assert_eq!(stored[0].failed_requests, 1);
    assert!((stored[0].p99_latency - 0.995).abs() < 1e-9);
    assert_eq!(stored[1].date, date("2024-10-27"));
}
