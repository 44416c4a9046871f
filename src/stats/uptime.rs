//! Downtime detection over a day's worth of requests

use chrono::Duration;

use crate::model::LogEvent;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// 5xx responses mark the service as down
pub fn is_server_error(status_code: i32) -> bool {
    (500..600).contains(&status_code)
}

/// Total time spent down, given events sorted ascending by timestamp.
///
/// A down period starts at the first 5xx and ends at the next non-5xx. If the
/// events end while still down, the period is closed at the last event rather
/// than at the end of the day.
pub fn downtime(events: &[LogEvent]) -> Duration {
    let mut total = Duration::zero();
    let mut down_since = None;

    for event in events {
        let erroring = is_server_error(event.status_code);
        match down_since {
            None if erroring => down_since = Some(event.timestamp),
            Some(start) if !erroring => {
                total += event.timestamp - start;
                down_since = None;
            }
            _ => {}
        }
    }

    if let (Some(start), Some(last)) = (down_since, events.last()) {
        total += last.timestamp - start;
    }

    total
}

/// Share of the day the customer's service was up, in `[0, 100]`.
pub fn uptime_percentage(events: &[LogEvent]) -> f64 {
    if events.is_empty() {
        return 100.0;
    }

    let down_secs = downtime(events).num_milliseconds() as f64 / 1000.0;
    let uptime = (SECONDS_PER_DAY - down_secs) / SECONDS_PER_DAY * 100.0;
    uptime.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event_at(secs: i64, status: i32) -> LogEvent {
        let base = Utc.with_ymd_and_hms(2024, 10, 26, 3, 9, 0).unwrap();
        LogEvent::new(base + Duration::seconds(secs), "cust_2", "/api", status, 1.0)
    }

    #[test]
    fn no_server_errors_means_full_uptime() {
        let events = vec![event_at(0, 200), event_at(1, 404), event_at(2, 403)];
        assert_eq!(downtime(&events), Duration::zero());
        assert_eq!(uptime_percentage(&events), 100.0);
    }

    #[test]
    fn consecutive_errors_form_one_interval() {
        let events = vec![
            event_at(0, 200),
            event_at(1, 500),
            event_at(2, 503),
            event_at(3, 200),
        ];
        assert_eq!(downtime(&events), Duration::seconds(2));

        let expected = (86_400.0 - 2.0) / 86_400.0 * 100.0;
        assert!((uptime_percentage(&events) - expected).abs() < 1e-9);
    }

    #[test]
    fn trailing_down_period_ends_at_last_event() {
        let events = vec![event_at(0, 200), event_at(10, 500), event_at(40, 502)];
        assert_eq!(downtime(&events), Duration::seconds(30));
    }

    #[test]
    fn single_trailing_error_adds_nothing() {
        let events = vec![event_at(0, 200), event_at(10, 500)];
        assert_eq!(downtime(&events), Duration::zero());
    }

    #[test]
    fn multiple_intervals_accumulate() {
        let events = vec![
            event_at(0, 500),
            event_at(5, 200),
            event_at(100, 599),
            event_at(107, 201),
        ];
        assert_eq!(downtime(&events), Duration::seconds(12));
    }

    #[test]
    fn status_600_is_not_a_server_error() {
        assert!(!is_server_error(600));
        assert!(is_server_error(500));
        assert!(is_server_error(599));
        assert!(!is_server_error(499));
    }

    #[test]
    fn empty_bucket_defaults_to_full_uptime() {
        assert_eq!(uptime_percentage(&[]), 100.0);
    }

    #[test]
    fn uptime_is_clamped_at_zero() {
        let events = vec![event_at(0, 500), event_at(2 * 86_400, 200)];
        assert_eq!(uptime_percentage(&events), 0.0);
    }
}
