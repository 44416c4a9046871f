//! Logstats - daily per-customer reliability statistics from HTTP request logs
//!
//! Request log lines are parsed, grouped into event-time tumbling windows per
//! customer and calendar day, and each closed window is reduced to request
//! counts, an uptime percentage and latency percentiles. Records are upserted
//! into SQLite and served by a read-only API.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod stats;
pub mod web;
pub mod window;

pub use error::{ConfigError, ParseError, SinkError};
pub use model::{DailyStats, LogEvent, WindowKey};
