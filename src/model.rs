//! Core records flowing through the pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single parsed request log line
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub customer_id: String,
    pub request_path: String,
    pub status_code: i32,
    /// Request duration in seconds
    pub duration: f64,
}

impl LogEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        customer_id: impl Into<String>,
        request_path: impl Into<String>,
        status_code: i32,
        duration: f64,
    ) -> Self {
        Self {
            timestamp,
            customer_id: customer_id.into(),
            request_path: request_path.into(),
            status_code,
            duration,
        }
    }

    /// UTC calendar date the event belongs to
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Identifies one per-customer, per-day bucket.
///
/// Ordered by date first so that buckets can be closed oldest-first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowKey {
    pub date: NaiveDate,
    pub customer_id: String,
}

impl WindowKey {
    pub fn new(customer_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            date,
            customer_id: customer_id.into(),
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.customer_id, self.date)
    }
}

/// Aggregated statistics for one customer on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub customer_id: String,
    pub date: NaiveDate,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub uptime_percentage: f64,
    pub avg_latency: f64,
    pub median_latency: f64,
    pub p99_latency: f64,
}

impl DailyStats {
    pub fn total_requests(&self) -> i64 {
        self.successful_requests + self.failed_requests
    }
}
