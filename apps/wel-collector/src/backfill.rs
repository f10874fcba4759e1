//! Backfill from the logger's monthly logs.
//!
//! The WEL keeps one tab-separated log per month (`WEL_log_YYYY_MM.xls`,
//! plain text despite the name) with a `Date`/`Time` pair in fixed EST and
//! one column per channel. Each row goes through the same assemble, derive
//! and write path as a live cycle, so re-running a month only adds the rows
//! that are not stored yet.

use crate::assembler;
use crate::daylight::Location;
use crate::derive::{self, CopConstants};
use crate::field::{self, Field, HP_W, TAH_W};
use crate::store::{PersistenceWriter, WriteOutcome};
use crate::telemetry::{FieldValue, Readings};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The logger stamps rows in EST all year round.
const LOG_ZONE: chrono_tz::Tz = chrono_tz::Etc::GMTPlus5;
const MISSING_CELL: &str = "?";
/// Power channels lead the rest of the row by one sample.
const LAGGED_CHANNELS: [Field; 2] = [HP_W, TAH_W];
// One day of one-minute rows.
const PROGRESS_EVERY: usize = 1_440;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMonth {
    pub year: i32,
    pub month: u32,
}

impl LogMonth {
    pub fn file_name(&self) -> String {
        format!("WEL_log_{}_{:02}.xls", self.year, self.month)
    }

    pub fn url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.file_name())
    }
}

impl FromStr for LogMonth {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("expected YYYY-MM, got {raw:?}");
        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self { year, month })
    }
}

impl fmt::Display for LogMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: DateTime<Utc>,
    pub readings: Readings,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub rows: Vec<LogRow>,
    /// Data lines whose date or time did not parse.
    pub skipped_lines: usize,
    pub unknown_columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub rows: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub skipped_lines: usize,
}

pub async fn download_log(http: &Client, base_url: &str, month: LogMonth) -> Result<String> {
    let url = month.url(base_url);
    tracing::info!(%month, url = %url, "downloading monthly log");
    http.get(&url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("failed to download {url}"))?
        .text()
        .await
        .with_context(|| format!("failed to read {url}"))
}

/// Parses a monthly log. `?` and blank cells are left out of the row;
/// unknown columns are dropped.
pub fn parse_log(body: &str) -> Result<ParsedLog> {
    let mut lines = body.lines().filter(|line| !line.trim().is_empty());
    let header = lines.next().context("log is empty")?;
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let date_idx = column_index(&columns, "Date")?;
    let time_idx = column_index(&columns, "Time")?;

    let mut channels: Vec<(usize, Field)> = Vec::new();
    let mut parsed = ParsedLog::default();
    for (idx, name) in columns.iter().enumerate() {
        if idx == date_idx || idx == time_idx || name.is_empty() {
            continue;
        }
        match field::device_field(name) {
            Some(field) => channels.push((idx, field)),
            None => parsed.unknown_columns.push(name.to_string()),
        }
    }
    if !parsed.unknown_columns.is_empty() {
        tracing::warn!(columns = ?parsed.unknown_columns, "dropping unrecognized log columns");
    }

    for (line_no, line) in lines.enumerate() {
        let cells: Vec<&str> = line.split('\t').map(str::trim).collect();
        let timestamp = match row_timestamp(cells.get(date_idx), cells.get(time_idx)) {
            Some(timestamp) => timestamp,
            None => {
                tracing::warn!(line = line_no + 2, "skipping log line without a valid Date/Time");
                parsed.skipped_lines += 1;
                continue;
            }
        };

        let mut readings = Readings::new();
        for (idx, field) in &channels {
            let Some(cell) = cells.get(*idx).copied() else {
                continue;
            };
            if cell.is_empty() || cell == MISSING_CELL {
                continue;
            }
            if let Ok(value) = cell.parse::<f64>() {
                readings.insert(*field, FieldValue::Number(value));
            }
        }
        parsed.rows.push(LogRow {
            timestamp,
            readings,
        });
    }

    align_power_channels(&mut parsed.rows);
    Ok(parsed)
}

fn column_index(columns: &[&str], name: &str) -> Result<usize> {
    columns
        .iter()
        .position(|column| *column == name)
        .with_context(|| format!("log header has no {name} column"))
}

fn row_timestamp(date: Option<&&str>, time: Option<&&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date?, "%m/%d/%Y").ok()?;
    let time = NaiveTime::parse_from_str(time?, "%H:%M:%S").ok()?;
    LOG_ZONE
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Each row takes the power readings of the row after it; the last row has
/// none.
fn align_power_channels(rows: &mut [LogRow]) {
    for idx in 0..rows.len() {
        for field in LAGGED_CHANNELS {
            match rows.get(idx + 1).and_then(|next| next.readings.get(&field)).cloned() {
                Some(value) => {
                    rows[idx].readings.insert(field, value);
                }
                None => {
                    rows[idx].readings.remove(&field);
                }
            }
        }
    }
}

/// Writes every row through `writer`. Rows already stored count as
/// duplicates.
pub async fn backfill(
    log: ParsedLog,
    location: &Location,
    constants: &CopConstants,
    writer: &PersistenceWriter,
) -> BackfillSummary {
    let mut summary = BackfillSummary {
        rows: log.rows.len(),
        skipped_lines: log.skipped_lines,
        ..BackfillSummary::default()
    };

    for (idx, row) in log.rows.into_iter().enumerate() {
        let mut record = assembler::assemble(row.timestamp, location, [("log", row.readings)]);
        derive::enrich_record(&mut record, constants);
        match writer.write(&record).await {
            WriteOutcome::Stored => summary.stored += 1,
            WriteOutcome::Duplicate => summary.duplicates += 1,
            WriteOutcome::Error => summary.errors += 1,
        }
        if (idx + 1) % PROGRESS_EVERY == 0 {
            tracing::info!(
                timestamp = %record.timestamp,
                stored = summary.stored,
                duplicates = summary.duplicates,
                "backfill progress"
            );
        }
    }

    tracing::info!(
        rows = summary.rows,
        stored = summary.stored,
        duplicates = summary.duplicates,
        errors = summary.errors,
        skipped_lines = summary.skipped_lines,
        "backfill finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DAYLIGHT, LOOP_IN_T, POWER_TOT};
    use crate::store::{MemoryStore, RecordStore};
    use axum::{routing::get, Router};
    use std::sync::Arc;

    const SAMPLE_LOG: &str = "Date\tTime\tHP_W\tTAH_W\tloop_in_T\tMystery_X\t\n\
01/05/2024\t12:00:00\t2000\t300\t6.1\t1\t\n\
01/05/2024\t12:01:00\t2100\t310\t?\t1\t\n\
01/05/2024\t12:01:00\t2100\t310\t6.0\t1\t\n\
01/05/2024\t12:02:00\t?\t320\t6.2\t1\t\n\
bad/date\t12:03:00\t1\t1\t1\t1\t\n";

    fn home() -> Location {
        Location {
            latitude: 42.485557,
            longitude: -71.433445,
            zone: chrono_tz::America::New_York,
        }
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, h, m, 0).unwrap()
    }

    #[test]
    fn month_argument_round_trips() {
        let month: LogMonth = "2024-03".parse().unwrap();
        assert_eq!(month, LogMonth { year: 2024, month: 3 });
        assert_eq!(month.to_string(), "2024-03");
        assert_eq!(
            month.url("http://www.welserver.com/WEL1060/"),
            "http://www.welserver.com/WEL1060/WEL_log_2024_03.xls"
        );
        assert!("2024-13".parse::<LogMonth>().is_err());
        assert!("March".parse::<LogMonth>().is_err());
    }

    #[test]
    fn parses_rows_in_est_and_skips_missing_cells() {
        let log = parse_log(SAMPLE_LOG).unwrap();

        assert_eq!(log.rows.len(), 4);
        assert_eq!(log.skipped_lines, 1);
        assert_eq!(log.unknown_columns, vec!["Mystery_X".to_string()]);
        assert_eq!(log.rows[0].timestamp, utc(17, 0));
        assert_eq!(
            log.rows[0].readings.get(&LOOP_IN_T),
            Some(&FieldValue::Number(6.1))
        );
        assert!(!log.rows[1].readings.contains_key(&LOOP_IN_T));
        assert!(log
            .rows
            .iter()
            .all(|row| row.readings.keys().all(|f| field::device_field(f.name()) == Some(*f))));
    }

    #[test]
    fn power_channels_shift_one_row_earlier() {
        let log = parse_log(SAMPLE_LOG).unwrap();
        let hp: Vec<Option<f64>> = log
            .rows
            .iter()
            .map(|row| row.readings.get(&HP_W).and_then(FieldValue::as_f64))
            .collect();
        let tah: Vec<Option<f64>> = log
            .rows
            .iter()
            .map(|row| row.readings.get(&TAH_W).and_then(FieldValue::as_f64))
            .collect();

        assert_eq!(hp, vec![Some(2100.0), Some(2100.0), None, None]);
        assert_eq!(tah, vec![Some(310.0), Some(310.0), Some(320.0), None]);
    }

    #[test]
    fn header_without_clock_columns_is_rejected() {
        assert!(parse_log("HP_W\tTAH_W\n1\t2\n").is_err());
        assert!(parse_log("\n\n").is_err());
    }

    #[tokio::test]
    async fn duplicate_rows_are_counted_not_stored_twice() {
        let store = Arc::new(MemoryStore::new());
        let writer = PersistenceWriter::new(store.clone());
        let log = parse_log(SAMPLE_LOG).unwrap();

        let summary = backfill(log, &home(), &CopConstants::default(), &writer).await;

        assert_eq!(
            summary,
            BackfillSummary {
                rows: 4,
                stored: 3,
                duplicates: 1,
                errors: 0,
                skipped_lines: 1,
            }
        );
        let records = store.fetch_range(utc(17, 0), utc(18, 0)).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].number(HP_W), Some(2100.0));
        assert_eq!(records[0].number(POWER_TOT), Some(2410.0));
        assert_eq!(records[0].number(DAYLIGHT), Some(1.0));

        // Running the same month again stores nothing new.
        let again = backfill(
            parse_log(SAMPLE_LOG).unwrap(),
            &home(),
            &CopConstants::default(),
            &writer,
        )
        .await;
        assert_eq!(again.stored, 0);
        assert_eq!(again.duplicates, 4);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn downloads_the_month_from_the_log_server() {
        let app = Router::new().route(
            "/WEL1060/WEL_log_2024_01.xls",
            get(|| async { SAMPLE_LOG }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let base = format!("http://{addr}/WEL1060");
        let january = LogMonth { year: 2024, month: 1 };

        let body = download_log(&Client::new(), &base, january).await.unwrap();
        assert_eq!(parse_log(&body).unwrap().rows.len(), 4);

        let missing = download_log(&Client::new(), &base, LogMonth { year: 2024, month: 2 }).await;
        assert!(missing.is_err());
    }
}
