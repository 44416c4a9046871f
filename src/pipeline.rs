//! Line source → parser → window engine → write buffer
//!
//! One task owns the [`WindowEngine`], so every bucket has a single writer.
//! Closed records are handed to the write buffer over a channel and never
//! wait on storage.

use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ShutdownPolicy};
use crate::db::{start_write_buffer, StatsSender, StatsSink, WriteBufferConfig, WriteReport};
use crate::model::DailyStats;
use crate::parser::parse_line;
use crate::window::WindowEngine;

/// Line counts for one pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub lines: u64,
    pub parsed: u64,
    pub malformed: u64,
    pub late_dropped: u64,
    /// Parsed events whose day window cannot be represented
    pub out_of_range: u64,
    pub emitted: u64,
    /// Open buckets dropped at shutdown under [`ShutdownPolicy::Drop`]
    pub discarded: u64,
    /// True when the run ended on a shutdown signal rather than end of input
    pub interrupted: bool,
}

pub struct Pipeline {
    engine: WindowEngine,
    out: StatsSender,
    policy: ShutdownPolicy,
    report: PipelineReport,
}

impl Pipeline {
    pub fn new(engine: WindowEngine, out: StatsSender, policy: ShutdownPolicy) -> Self {
        Self {
            engine,
            out,
            policy,
            report: PipelineReport::default(),
        }
    }

    /// Parse and window one raw line; malformed lines are logged and counted
    pub fn process_line(&mut self, raw: &[u8]) -> Result<()> {
        self.report.lines += 1;
        let line = String::from_utf8_lossy(raw);

        let event = match parse_line(&line) {
            Ok(event) => event,
            Err(e) => {
                self.report.malformed += 1;
                warn!(line = self.report.lines, "Dropping malformed log line: {}", e);
                return Ok(());
            }
        };
        self.report.parsed += 1;

        let ingested = self.engine.ingest(event);
        if !ingested.accepted {
            let counters = self.engine.counters();
            self.report.late_dropped = counters.late_dropped;
            self.report.out_of_range = counters.out_of_range;
        }
        self.emit(ingested.closed)
    }

    fn emit(&mut self, records: Vec<DailyStats>) -> Result<()> {
        for stats in records {
            debug!(
                customer_id = %stats.customer_id,
                date = %stats.date,
                uptime = stats.uptime_percentage,
                "Emitting daily stats"
            );
            self.out
                .send(stats)
                .map_err(|_| anyhow::anyhow!("write buffer is no longer accepting records"))?;
            self.report.emitted += 1;
        }
        Ok(())
    }

    /// Consume `lines` until they run out or `shutdown` resolves.
    ///
    /// End of input flushes every open bucket. On shutdown, buckets the
    /// watermark has passed are always emitted; the rest follow the policy.
    pub async fn run<S, L, F>(mut self, lines: S, shutdown: F) -> Result<PipelineReport>
    where
        S: Stream<Item = io::Result<L>>,
        L: AsRef<[u8]>,
        F: Future<Output = ()>,
    {
        tokio::pin!(lines);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.report.interrupted = true;
                    break;
                }
                line = lines.next() => match line {
                    Some(line) => {
                        let line = line.context("failed to read log line")?;
                        self.process_line(line.as_ref())?;
                    }
                    None => break,
                },
            }
        }

        if self.report.interrupted {
            info!("Shutdown requested, {} buckets still open", self.engine.open_buckets());
            let ready = self.engine.flush_ready();
            self.emit(ready)?;
            match self.policy {
                ShutdownPolicy::Flush => {
                    let partial = self.engine.flush_all();
                    self.emit(partial)?;
                }
                ShutdownPolicy::Drop => {
                    let dropped = self.engine.discard_open();
                    warn!("Discarded {} open buckets at shutdown", dropped);
                    self.report.discarded = dropped as u64;
                }
            }
        } else {
            let remaining = self.engine.flush_all();
            self.emit(remaining)?;
        }

        info!(
            "Processed {} lines ({} malformed, {} late, {} out of range), emitted {} daily records",
            self.report.lines,
            self.report.malformed,
            self.report.late_dropped,
            self.report.out_of_range,
            self.report.emitted
        );

        Ok(self.report)
    }
}

/// Newline-split byte lines from a reader, tolerating invalid UTF-8
pub fn lines<R>(reader: R) -> SplitStream<R>
where
    R: AsyncBufRead + Unpin,
{
    SplitStream::new(reader.split(b'\n'))
}

/// Open a log file, or stdin for `-`
pub async fn open_source(path: &str) -> Result<Box<dyn AsyncBufRead + Send + Unpin>> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open log source {}", path))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Resolves on Ctrl-C. If the handler cannot be installed this never
/// resolves, so a run is not cut short before it starts.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Run a source through the window engine into `sink`, waiting for every
/// record to be written before returning.
pub async fn ingest<S, L, F>(
    config: &Config,
    sink: Arc<dyn StatsSink>,
    lines: S,
    shutdown: F,
) -> Result<(PipelineReport, WriteReport)>
where
    S: Stream<Item = io::Result<L>>,
    L: AsRef<[u8]>,
    F: Future<Output = ()>,
{
    let engine = WindowEngine::new(config.window()?);
    let (tx, writer) = start_write_buffer(sink, WriteBufferConfig::from(&config.ingest));

    let pipeline = Pipeline::new(engine, tx, config.ingest.shutdown_policy);
    let report = pipeline.run(lines, shutdown).await?;

    // The pipeline dropped its sender, so the writer drains and exits
    let written = writer.await.context("write buffer task panicked")?;
    Ok((report, written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn pipeline(policy: ShutdownPolicy) -> (Pipeline, mpsc::UnboundedReceiver<DailyStats>) {
        let config = Config::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = WindowEngine::new(config.window().unwrap());
        (Pipeline::new(engine, tx, policy), rx)
    }

    fn source(lines: &[&'static str]) -> impl Stream<Item = io::Result<&'static str>> {
        tokio_stream::iter(lines.to_vec().into_iter().map(Ok))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DailyStats>) -> Vec<DailyStats> {
        let mut out = Vec::new();
        while let Ok(stats) = rx.try_recv() {
            out.push(stats);
        }
        out
    }

    #[tokio::test]
    async fn end_of_input_flushes_everything() {
        let (pipeline, mut rx) = pipeline(ShutdownPolicy::Drop);
        let lines = source(&[
            "2024-10-26 03:05:00 cust_1 /a 200 0.5",
            "not a log line",
            "2024-10-26 03:06:00 cust_1 /a 500 0.5",
        ]);

        let report = pipeline.run(lines, std::future::pending()).await.unwrap();

        assert_eq!(report.lines, 3);
        assert_eq!(report.parsed, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.emitted, 1);
        assert!(!report.interrupted);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn shutdown_with_drop_policy_keeps_only_closed_buckets() {
        let (mut pipeline, mut rx) = pipeline(ShutdownPolicy::Drop);
        for line in [
            "2024-10-26 03:05:00 a /x 200 0.5",
            "2024-10-28 03:05:00 b /x 200 0.5",
        ] {
            pipeline.process_line(line.as_bytes()).unwrap();
        }
        // a/10-26 closed when b's event moved the watermark past it
        assert_eq!(drain(&mut rx).len(), 1);

        let report = pipeline
            .run(source(&[]), std::future::ready(()))
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.discarded, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn shutdown_with_flush_policy_emits_partial_buckets() {
        let (mut pipeline, mut rx) = pipeline(ShutdownPolicy::Flush);
        pipeline
            .process_line(b"2024-10-26 03:05:00 a /x 200 0.5")
            .unwrap();

        let report = pipeline
            .run(source(&[]), std::future::ready(()))
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.discarded, 0);
        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].customer_id, "a");
    }

    #[tokio::test]
    async fn far_future_timestamp_does_not_stop_the_stream() {
        let (pipeline, mut rx) = pipeline(ShutdownPolicy::Flush);
        let lines = source(&[
            "2024-10-26 03:05:00 a /x 200 0.5",
            "+262142-12-31 23:00:00 a /x 200 0.5",
            "2024-10-26 03:06:00 a /x 200 1.5",
        ]);

        let report = pipeline.run(lines, std::future::pending()).await.unwrap();

        assert_eq!(report.malformed, 1);
        assert_eq!(report.parsed, 2);
        let records = drain(&mut rx);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].successful_requests, 2);
    }

    #[tokio::test]
    async fn shutdown_signal_stays_pending_without_ctrl_c() {
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), shutdown_signal()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn late_events_are_reported() {
        let (mut pipeline, _rx) = pipeline(ShutdownPolicy::Flush);
        for line in [
            "2024-10-28 03:05:00 a /x 200 0.5",
            "2024-10-26 03:05:00 a /x 200 0.5",
        ] {
            pipeline.process_line(line.as_bytes()).unwrap();
        }
        assert_eq!(pipeline.report.late_dropped, 1);
        assert_eq!(pipeline.report.out_of_range, 0);
    }

    #[tokio::test]
    async fn invalid_utf8_is_counted_as_malformed() {
        let (mut pipeline, _rx) = pipeline(ShutdownPolicy::Flush);
        pipeline.process_line(&[0xff, 0xfe, b' ', b'x']).unwrap();
        assert_eq!(pipeline.report.malformed, 1);
    }

    #[tokio::test]
    async fn reads_lines_from_a_buffered_reader() {
        let input: &[u8] = b"2024-10-26 03:05:00 a /x 200 0.5\r\n2024-10-26 03:06:00 a /x 200 1.5\n";
        let (pipeline, mut rx) = pipeline(ShutdownPolicy::Flush);

        let report = pipeline
            .run(lines(input), std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.parsed, 2);
        let records = drain(&mut rx);
        assert_eq!(records[0].successful_requests, 2);
        assert_eq!(records[0].avg_latency, 1.0);
    }
}
