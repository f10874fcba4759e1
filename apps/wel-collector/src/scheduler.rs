//! Fixed-interval poll loop: fetch, merge, derive, persist, sleep.

use crate::adapters::{fetch_with_retry, RetryPolicy, SensorAdapter};
use crate::assembler;
use crate::daylight::Location;
use crate::derive::{self, CopConstants};
use crate::field::Field;
use crate::store::{PersistenceWriter, WriteOutcome, WriteTotals};
use crate::telemetry::{capture_timestamp, TelemetryRecord};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Hourly at the default 30 s interval.
const TOTALS_LOG_EVERY: u64 = 120;

/// Source of capture timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock truncated to whole seconds.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        capture_timestamp(Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub location: Location,
    pub constants: CopConstants,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub captured_at: DateTime<Utc>,
    /// Fields contributed by each adapter, in invocation order.
    pub sources: Vec<(&'static str, usize)>,
    pub skipped: Vec<Field>,
    pub record: TelemetryRecord,
    pub outcome: WriteOutcome,
    /// Writer totals after this cycle's write.
    pub totals: WriteTotals,
    pub elapsed: Duration,
}

pub struct PollScheduler {
    adapters: Vec<Box<dyn SensorAdapter>>,
    writer: PersistenceWriter,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    state: SchedulerState,
}

impl PollScheduler {
    pub fn new(
        adapters: Vec<Box<dyn SensorAdapter>>,
        writer: PersistenceWriter,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            adapters,
            writer,
            clock: Arc::new(SystemClock),
            options,
            state: SchedulerState::Idle,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|adapter| adapter.name()).collect()
    }

    /// Runs one full cycle stamped with `captured_at`.
    pub async fn run_cycle(&mut self, captured_at: DateTime<Utc>) -> CycleReport {
        self.state = SchedulerState::Polling;
        let started = Instant::now();

        let mut contributions = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let readings = fetch_with_retry(adapter.as_ref(), &self.options.retry).await;
            contributions.push((adapter.name(), readings));
        }
        let sources: Vec<(&'static str, usize)> = contributions
            .iter()
            .map(|(name, readings)| (*name, readings.len()))
            .collect();

        let mut record = assembler::assemble(captured_at, &self.options.location, contributions);
        let skipped = derive::enrich_record(&mut record, &self.options.constants);
        if !skipped.is_empty() {
            let names: Vec<&str> = skipped.iter().map(|field| field.name()).collect();
            tracing::warn!(timestamp = %captured_at, skipped = ?names, "derived metrics skipped for missing inputs");
        }

        let outcome = self.writer.write(&record).await;
        let elapsed = started.elapsed();
        tracing::debug!(
            timestamp = %captured_at,
            elapsed_ms = elapsed.as_millis() as u64,
            ?sources,
            "cycle finished"
        );

        self.state = SchedulerState::Idle;
        CycleReport {
            captured_at,
            sources,
            skipped,
            record,
            outcome,
            totals: self.writer.stats().totals(),
            elapsed,
        }
    }

    /// One cycle stamped by the scheduler's clock.
    pub async fn tick(&mut self) -> CycleReport {
        let captured_at = self.clock.now();
        self.run_cycle(captured_at).await
    }

    /// Polls every interval, measured start to start, until `shutdown`
    /// resolves. Shutdown is only observed between cycles.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = self.options.interval;
        tracing::info!(
            interval_secs = interval.as_secs(),
            adapters = ?self.adapter_names(),
            "poll loop started"
        );

        let mut cycles: u64 = 0;
        loop {
            let cycle_start = tokio::time::Instant::now();
            let report = self.tick().await;
            cycles += 1;
            if cycles % TOTALS_LOG_EVERY == 0 {
                log_totals(cycles, &report.totals);
            }

            let next = cycle_start + interval;
            if next <= tokio::time::Instant::now() {
                tracing::warn!(
                    overrun_ms = (tokio::time::Instant::now() - next).as_millis() as u64,
                    "cycle overran the poll interval; starting next cycle immediately"
                );
            }
            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested; poll loop stopped");
                    break;
                }
            }
        }
        log_totals(cycles, &self.writer.stats().totals());
    }
}

fn log_totals(cycles: u64, totals: &WriteTotals) {
    tracing::info!(
        cycles,
        stored = totals.stored,
        duplicates = totals.duplicates,
        errors = totals.errors,
        last_write_us = totals.last_write_micros,
        last_error = totals.last_error.as_deref().unwrap_or(""),
        "write totals"
    );
}
