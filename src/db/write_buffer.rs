//! Write buffer for async batch upserts
//!
//! Closed daily records are sent to a channel and flushed to the sink in
//! batches, so the windowing task never waits on storage I/O.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::StatsSink;
use crate::config::IngestConfig;
use crate::error::SinkError;
use crate::model::DailyStats;

/// Sender handle for queueing closed records
pub type StatsSender = mpsc::UnboundedSender<DailyStats>;

#[derive(Debug, Clone)]
pub struct WriteBufferConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further attempt
    pub retry_backoff: Duration,
}

impl From<&IngestConfig> for WriteBufferConfig {
    fn from(config: &IngestConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Outcome of the write buffer once its channel has closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: u64,
    pub failed: u64,
}

/// Start the write buffer background task.
///
/// Returns the sender the pipeline queues records on, and a handle that
/// resolves once every sender is dropped and the remaining records are flushed.
pub fn start_write_buffer<S>(sink: Arc<S>, config: WriteBufferConfig) -> (StatsSender, JoinHandle<WriteReport>)
where
    S: StatsSink + ?Sized + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(write_buffer_task(sink, config, rx));

    (tx, handle)
}

/// Background task that collects records and writes them in batches
async fn write_buffer_task<S>(
    sink: Arc<S>,
    config: WriteBufferConfig,
    mut rx: mpsc::UnboundedReceiver<DailyStats>,
) -> WriteReport
where
    S: StatsSink + ?Sized,
{
    let mut buffer: Vec<DailyStats> = Vec::with_capacity(config.batch_size);
    let mut report = WriteReport::default();
    let mut flush_interval = tokio::time::interval(config.flush_interval);

    info!(
        "Write buffer started (batch_size={}, flush_interval={:?})",
        config.batch_size, config.flush_interval
    );

    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(r) => {
                        buffer.push(r);
                        // Flush immediately if batch is full
                        if buffer.len() >= config.batch_size {
                            flush_batch(sink.as_ref(), &config, &mut buffer, &mut report).await;
                        }
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        if !buffer.is_empty() {
                            flush_batch(sink.as_ref(), &config, &mut buffer, &mut report).await;
                        }
                        info!(
                            "Write buffer shutting down ({} written, {} failed)",
                            report.written, report.failed
                        );
                        break;
                    }
                }
            }
            // Periodic flush for low-traffic periods
            _ = flush_interval.tick() => {
                if !buffer.is_empty() {
                    flush_batch(sink.as_ref(), &config, &mut buffer, &mut report).await;
                }
            }
        }
    }

    report
}

/// Flush buffered records, falling back to per-record writes if the batch keeps failing
async fn flush_batch<S>(
    sink: &S,
    config: &WriteBufferConfig,
    buffer: &mut Vec<DailyStats>,
    report: &mut WriteReport,
) where
    S: StatsSink + ?Sized,
{
    let count = buffer.len();
    let batch = buffer.as_slice();
    debug!("Flushing {} records", count);

    match with_retry(config, || sink.upsert_batch(batch)).await {
        Ok(()) => {
            debug!("Successfully flushed {} records", count);
            report.written += count as u64;
        }
        Err(e) => {
            warn!("Batch of {} records failed, writing individually: {}", count, e);
            // A bad key must not take the rest of the batch down with it
            for stats in batch {
                match with_retry(config, || sink.upsert(stats)).await {
                    Ok(()) => report.written += 1,
                    Err(e) => {
                        error!(
                            customer_id = %stats.customer_id,
                            date = %stats.date,
                            "Giving up on record: {}", e
                        );
                        report.failed += 1;
                    }
                }
            }
        }
    }

    buffer.clear();
}

/// Run `op` until it succeeds or `max_retries` retries have failed, backing off exponentially
async fn with_retry<F, Fut>(config: &WriteBufferConfig, mut op: F) -> Result<(), SinkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), SinkError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < config.max_retries => {
                let delay = config.retry_backoff * 2u32.saturating_pow(attempt);
                warn!("Sink write failed (attempt {}), retrying in {:?}: {}", attempt + 1, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
