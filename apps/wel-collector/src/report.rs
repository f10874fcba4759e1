//! History report: reload a time range, recompute batch metrics and
//! summarize each field.

use crate::derive::{self, BatchOptions};
use crate::store::RecordStore;
use crate::telemetry::{FieldValue, TelemetryRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldSummary {
    pub unit: String,
    pub count: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub latest: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub records: usize,
    pub first_record: Option<DateTime<Utc>>,
    pub last_record: Option<DateTime<Utc>>,
    pub rolling_window_samples: usize,
    pub fields: BTreeMap<String, FieldSummary>,
    /// Records that lacked the inputs for each derived metric.
    pub skipped_metrics: BTreeMap<String, usize>,
}

/// Resolves `--hours` or an explicit `--start/--end` pair into a half-open
/// range ending no later than `now`.
pub fn resolve_range(
    hours: Option<f64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    match (start, end) {
        (Some(start), Some(end)) => {
            anyhow::ensure!(start < end, "report start {start} is not before end {end}");
            Ok((start, end))
        }
        (None, None) => {
            let hours = hours.unwrap_or(24.0);
            anyhow::ensure!(
                hours.is_finite() && hours > 0.0,
                "report window must be a positive number of hours"
            );
            let span = Duration::milliseconds((hours * 3_600_000.0).round() as i64);
            Ok((now - span, now))
        }
        _ => anyhow::bail!("--start and --end must be given together"),
    }
}

pub async fn build_report(
    store: &dyn RecordStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    options: &BatchOptions,
) -> Result<HistoryReport> {
    let mut batch = store
        .fetch_range(start, end)
        .await
        .with_context(|| format!("failed to load records between {start} and {end}"))?;
    let summary = derive::enrich_batch(&mut batch, options);
    tracing::info!(
        records = summary.records,
        window_samples = summary.window_samples,
        "history batch enriched"
    );

    Ok(HistoryReport {
        start,
        end,
        records: batch.len(),
        first_record: batch.first().map(|record| record.timestamp),
        last_record: batch.last().map(|record| record.timestamp),
        rolling_window_samples: summary.window_samples,
        fields: summarize_fields(&batch),
        skipped_metrics: summary
            .skipped
            .into_iter()
            .map(|(field, count)| (field.name().to_string(), count))
            .collect(),
    })
}

fn summarize_fields(batch: &[TelemetryRecord]) -> BTreeMap<String, FieldSummary> {
    let mut fields: BTreeMap<String, FieldSummary> = BTreeMap::new();
    let mut sums: BTreeMap<String, f64> = BTreeMap::new();

    for record in batch {
        for (field, value) in record.iter() {
            let entry = fields
                .entry(field.name().to_string())
                .or_insert_with(|| FieldSummary {
                    unit: format!("{:?}", field.unit()),
                    count: 0,
                    missing: 0,
                    min: None,
                    max: None,
                    mean: None,
                    latest: None,
                });
            match value {
                FieldValue::Number(number) => {
                    entry.count += 1;
                    entry.min = Some(entry.min.map_or(*number, |min| min.min(*number)));
                    entry.max = Some(entry.max.map_or(*number, |max| max.max(*number)));
                    entry.latest = Some(*number);
                    *sums.entry(field.name().to_string()).or_default() += number;
                }
                FieldValue::Text(_) | FieldValue::Missing => entry.missing += 1,
            }
        }
    }

    for (name, summary) in fields.iter_mut() {
        if summary.count > 0 {
            summary.mean = sums.get(name).map(|sum| sum / summary.count as f64);
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::CopConstants;
    use crate::field::{COP, HP_W, WEATHER_STATION_R};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn options() -> BatchOptions {
        BatchOptions {
            constants: CopConstants::default(),
            rolling_hours: 1.0,
            zone: chrono_tz::America::New_York,
        }
    }

    #[test]
    fn range_from_hours_or_explicit_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();
        let (start, end) = resolve_range(Some(6.0), None, None, now).unwrap();
        assert_eq!(end, now);
        assert_eq!(now - start, Duration::hours(6));

        let explicit = resolve_range(None, Some(now - Duration::days(1)), Some(now), now).unwrap();
        assert_eq!(explicit, (now - Duration::days(1), now));

        assert!(resolve_range(None, Some(now), None, now).is_err());
        assert!(resolve_range(None, Some(now), Some(now), now).is_err());
        assert!(resolve_range(Some(-1.0), None, None, now).is_err());
    }

    #[tokio::test]
    async fn report_summarizes_stored_history() {
        let store = MemoryStore::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 5, 15, 0, 0).unwrap();
        for idx in 0..4 {
            let mut record = TelemetryRecord::new(base + Duration::seconds(idx * 30));
            record.insert(HP_W, 1000.0 + idx as f64 * 100.0);
            record.insert(WEATHER_STATION_R, 3.0 + idx as f64);
            if idx == 0 {
                record.insert(COP, FieldValue::Missing);
            }
            store.insert(&record).await.unwrap();
        }

        let report = build_report(&store, base, base + Duration::hours(1), &options())
            .await
            .unwrap();

        assert_eq!(report.records, 4);
        assert_eq!(report.first_record, Some(base));
        let hp = &report.fields["HP_W"];
        assert_eq!(hp.count, 4);
        assert_eq!(hp.min, Some(1000.0));
        assert_eq!(hp.max, Some(1300.0));
        assert_eq!(hp.mean, Some(1150.0));
        assert_eq!(hp.latest, Some(1300.0));
        assert_eq!(report.fields["rain_accum_R"].latest, Some(3.0));
        assert_eq!(report.skipped_metrics["COP"], 4);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["records"], 4);
    }

    #[tokio::test]
    async fn empty_range_gives_an_empty_report() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let report = build_report(&store, now - Duration::hours(1), now, &options())
            .await
            .unwrap();
        assert_eq!(report.records, 0);
        assert!(report.fields.is_empty());
    }
}
