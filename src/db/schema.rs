//! Database schema definitions

// UNIQUE (customer_id, date) is the upsert conflict target; it lives in the
// table definition so every pooled connection sees it.
pub const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS customer_daily_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT NOT NULL,
    date TEXT NOT NULL,                 -- ISO-8601 calendar date, UTC
    successful_requests INTEGER NOT NULL DEFAULT 0,
    failed_requests INTEGER NOT NULL DEFAULT 0,
    uptime_percentage REAL NOT NULL DEFAULT 100.0,
    avg_latency REAL NOT NULL DEFAULT 0.0,
    median_latency REAL NOT NULL DEFAULT 0.0,
    p99_latency REAL NOT NULL DEFAULT 0.0,
    created_at BIGINT NOT NULL,         -- Unix millis
    updated_at BIGINT NOT NULL,         -- Unix millis
    UNIQUE (customer_id, date)
)
"#;

// For date range scans across customers
pub const CREATE_INDEX_DATE: &str =
    "CREATE INDEX IF NOT EXISTS idx_date ON customer_daily_stats(date)";
