//! Request log line parser
//!
//! Lines look like `2024-10-26 03:05:00 cust_1 /api/v1/resource2 200 0.5`,
//! with the timestamp in UTC.

use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDateTime, TimeZone, Utc};

use crate::error::ParseError;
use crate::model::LogEvent;

const FIELD_COUNT: usize = 6;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
// Four-digit years only; chrono's %Y also takes signed years out to +/-262143
const YEARS: RangeInclusive<i32> = 1..=9999;

/// Parse one log line into a [`LogEvent`]
pub fn parse_line(line: &str) -> Result<LogEvent, ParseError> {
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount {
            found: fields.len(),
        });
    }

    let naive =
        NaiveDateTime::parse_from_str(&format!("{} {}", fields[0], fields[1]), TIMESTAMP_FORMAT)?;
    if !YEARS.contains(&naive.year()) {
        return Err(ParseError::TimestampOutOfRange(naive));
    }
    let timestamp = Utc.from_utc_datetime(&naive);

    let status_code = fields[4].parse::<i32>().map_err(ParseError::StatusCode)?;

    let duration = fields[5].parse::<f64>().map_err(ParseError::Duration)?;
    if !duration.is_finite() || duration < 0.0 {
        return Err(ParseError::InvalidDuration(duration));
    }

    Ok(LogEvent {
        timestamp,
        customer_id: fields[2].to_string(),
        request_path: fields[3].to_string(),
        status_code,
        duration,
    })
}
