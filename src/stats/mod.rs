//! Per-bucket aggregation: request counts, uptime and latency

pub mod latency;
pub mod uptime;

use crate::model::{DailyStats, LogEvent, WindowKey};

use latency::LatencySummary;

/// 2xx responses count as successful, everything else as failed
pub fn is_success(status_code: i32) -> bool {
    (200..300).contains(&status_code)
}

/// Build the daily record for a closed bucket.
///
/// Events may be in arrival order; they are sorted by timestamp here because
/// downtime detection depends on event-time order.
pub fn summarize(key: WindowKey, mut events: Vec<LogEvent>) -> DailyStats {
    events.sort_by_key(|e| e.timestamp);

    let successful = events.iter().filter(|e| is_success(e.status_code)).count() as i64;
    let failed = events.len() as i64 - successful;

    let durations: Vec<f64> = events.iter().map(|e| e.duration).collect();
    let latency = LatencySummary::from_samples(&durations);

    DailyStats {
        customer_id: key.customer_id,
        date: key.date,
        successful_requests: successful,
        failed_requests: failed,
        uptime_percentage: uptime::uptime_percentage(&events),
        avg_latency: latency.mean,
        median_latency: latency.median,
        p99_latency: latency.p99,
    }
}
