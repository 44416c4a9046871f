//! Event-time tumbling windows keyed by (customer, day)
//!
//! Buckets are opened on the first event for a key and closed once the
//! watermark, `max(event time seen) - allowed_lateness`, passes the end of
//! their day. Events for a window that has already closed are dropped as late.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::model::{DailyStats, LogEvent, WindowKey};
use crate::stats;

/// Window alignment and lateness settings
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// Any UTC midnight; windows start at `epoch + k days`.
    pub epoch: DateTime<Utc>,
    pub allowed_lateness: Duration,
    /// Open bucket count at which a warning is logged
    pub max_open_buckets: usize,
}

/// Live accumulator for one window key
#[derive(Debug)]
struct WindowBucket {
    window_end: DateTime<Utc>,
    events: Vec<LogEvent>,
}

impl WindowBucket {
    fn new(window_end: DateTime<Utc>) -> Self {
        Self {
            window_end,
            events: Vec::new(),
        }
    }

    fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

/// Running totals for the engine's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub accepted: u64,
    pub late_dropped: u64,
    /// Events whose window bounds fall outside the representable time range
    pub out_of_range: u64,
    pub closed: u64,
}

/// What happened to one ingested event
#[derive(Debug, Default)]
pub struct Ingested {
    /// False when the event was dropped as late or out of range
    pub accepted: bool,
    /// Buckets closed by the watermark advance this event caused
    pub closed: Vec<DailyStats>,
}

/// Keyed, single-writer windowing state
pub struct WindowEngine {
    config: WindowConfig,
    buckets: BTreeMap<WindowKey, WindowBucket>,
    max_event_time: Option<DateTime<Utc>>,
    counters: EngineCounters,
    over_capacity: bool,
}

impl WindowEngine {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            buckets: BTreeMap::new(),
            max_event_time: None,
            counters: EngineCounters::default(),
            over_capacity: false,
        }
    }

    /// Current watermark, `None` until the first event.
    ///
    /// Saturates at the earliest representable instant when the lateness
    /// reaches further back than that.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.max_event_time.map(|max| {
            max.checked_sub_signed(self.config.allowed_lateness)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    pub fn open_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    /// Start of the tumbling window containing `ts`, `None` if it falls
    /// outside the representable range
    pub fn window_start(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = (ts - self.config.epoch)
            .num_seconds()
            .div_euclid(Duration::days(1).num_seconds());
        self.config.epoch.checked_add_signed(Duration::days(days))
    }

    fn window_end(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.window_start(ts)?.checked_add_signed(Duration::days(1))
    }

    fn is_late(&self, window_end: DateTime<Utc>) -> bool {
        self.watermark().is_some_and(|wm| window_end <= wm)
    }

    /// Assign an event to its bucket and close any buckets the watermark has passed.
    pub fn ingest(&mut self, event: LogEvent) -> Ingested {
        let Some(window_end) = self.window_end(event.timestamp) else {
            self.counters.out_of_range += 1;
            warn!(
                customer_id = %event.customer_id,
                timestamp = %event.timestamp,
                "Dropping event whose window cannot be represented"
            );
            return Ingested::default();
        };

        if self.is_late(window_end) {
            self.counters.late_dropped += 1;
            warn!(
                customer_id = %event.customer_id,
                timestamp = %event.timestamp,
                watermark = ?self.watermark(),
                "Dropping late event for an already closed window"
            );
            return Ingested::default();
        }

        let key = WindowKey::new(event.customer_id.clone(), event.date());
        let timestamp = event.timestamp;

        self.buckets
            .entry(key)
            .or_insert_with_key(|key| {
                debug!(key = %key, "Opening bucket");
                WindowBucket::new(window_end)
            })
            .events
            .push(event);
        self.counters.accepted += 1;

        let advanced = self.max_event_time.map_or(true, |max| timestamp > max);
        if advanced {
            self.max_event_time = Some(timestamp);
        }

        let closed = if advanced { self.flush_ready() } else { Vec::new() };
        self.check_capacity();

        Ingested {
            accepted: true,
            closed,
        }
    }

    /// Close every bucket whose window end the watermark has reached
    pub fn flush_ready(&mut self) -> Vec<DailyStats> {
        let Some(watermark) = self.watermark() else {
            return Vec::new();
        };

        let mut closed = Vec::new();
        while let Some(entry) = self.buckets.first_entry() {
            if entry.get().window_end() > watermark {
                break;
            }
            let (key, bucket) = entry.remove_entry();
            closed.push(self.close(key, bucket));
        }
        closed
    }

    /// Close all open buckets regardless of the watermark
    pub fn flush_all(&mut self) -> Vec<DailyStats> {
        let buckets = std::mem::take(&mut self.buckets);
        buckets
            .into_iter()
            .map(|(key, bucket)| self.close(key, bucket))
            .collect()
    }

    /// Discard all open buckets, returning how many were dropped
    pub fn discard_open(&mut self) -> usize {
        let dropped = self.buckets.len();
        self.buckets.clear();
        dropped
    }

    fn close(&mut self, key: WindowKey, bucket: WindowBucket) -> DailyStats {
        debug!(key = %key, events = bucket.len(), "Closing bucket");
        self.counters.closed += 1;
        stats::summarize(key, bucket.events)
    }

    fn check_capacity(&mut self) {
        let open = self.buckets.len();
        if open >= self.config.max_open_buckets {
            if !self.over_capacity {
                warn!(
                    open_buckets = open,
                    watermark = ?self.watermark(),
                    "Open bucket count reached limit; a far-future timestamp may be pinning the watermark"
                );
                self.over_capacity = true;
            }
        } else {
            self.over_capacity = false;
        }
    }
}
