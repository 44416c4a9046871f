//! Error types shared across the pipeline

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// A log line that does not match `<date> <time> <customer> <path> <status> <duration>`.
///
/// Never fatal: the offending line is dropped and counted.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expected 6 fields, found {found}")]
    FieldCount { found: usize },

    #[error("invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("timestamp {0} is outside years 1-9999")]
    TimestampOutOfRange(NaiveDateTime),

    #[error("invalid status code: {0}")]
    StatusCode(#[source] std::num::ParseIntError),

    #[error("invalid duration: {0}")]
    Duration(#[source] std::num::ParseFloatError),

    #[error("duration must be a finite, non-negative number of seconds, got {0}")]
    InvalidDuration(f64),
}

/// Storage failure while persisting daily statistics.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to upsert stats for {customer_id} on {date}: {source}")]
    Upsert {
        customer_id: String,
        date: NaiveDate,
        #[source]
        source: sqlx::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Invalid startup configuration. Raised before any event is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid window epoch '{value}': {source}")]
    InvalidEpoch {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("window epoch {0} must fall on a UTC midnight")]
    EpochNotMidnight(DateTime<Utc>),

    #[error("allowed lateness must not be negative, got {0}s")]
    NegativeLateness(i64),

    #[error("allowed lateness of {0}s is out of range")]
    LatenessOutOfRange(i64),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("server host cannot be empty")]
    EmptyHost,

    #[error("invalid logging level '{0}', must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}
