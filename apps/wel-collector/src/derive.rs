//! Derived efficiency metrics, per record and over time-ordered batches.

use crate::field::{
    Field, BASE_LOAD_W, COP, COP_MA, DEHUMIDIFIER_W, D_ROOM_T, FIREPLACE_T, HEAT_1_B, HOUSE_W,
    HP_W, LIVING_T, LOOP_IN_T, LOOP_OUT_T, OUTSIDE_T, POWER_TOT, RAIN_ACCUM_R, TAH_FPM,
    TAH_IN_T, TAH_OUT_T, TAH_W, T_DIFF, T_DIFF_EFF, T_ROOM_T, V_ROOM_T, WEATHER_STATION_R,
    WELL_COP, WELL_COP_MA, WELL_W,
};
use crate::telemetry::{FieldValue, TelemetryRecord};
use chrono_tz::Tz;
use std::collections::HashMap;

const ROOM_TEMPERATURES: [Field; 4] = [FIREPLACE_T, D_ROOM_T, V_ROOM_T, T_ROOM_T];

/// Physical constants behind the COP estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopConstants {
    /// kg/m³
    pub air_density: f64,
    /// Duct cross-section factor applied to the measured face velocity.
    pub duct_area: f64,
    /// kJ/(kg·K)
    pub air_specific_heat: f64,
    pub loop_gpm: f64,
    /// Litres per second per gpm.
    pub gpm_to_lps: f64,
    /// kJ/(kg·K)
    pub water_specific_heat: f64,
    /// COP values above this are treated as sensor glitches.
    pub ceiling: f64,
}

impl Default for CopConstants {
    fn default() -> Self {
        Self {
            air_density: 1.15,
            duct_area: 0.34,
            air_specific_heat: 1.01,
            loop_gpm: 13.6,
            gpm_to_lps: 0.0630902,
            water_specific_heat: 4.186,
            ceiling: 5.0,
        }
    }
}

/// Adds every per-record metric whose inputs are present. Returns the
/// metrics that were skipped for lack of input.
pub fn enrich_record(record: &mut TelemetryRecord, constants: &CopConstants) -> Vec<Field> {
    let mut skipped = Vec::new();

    if !record.contains(POWER_TOT) {
        match (record.number(TAH_W), record.number(HP_W)) {
            (Some(tah), Some(hp)) => {
                record.insert(POWER_TOT, tah + hp);
            }
            _ => skipped.push(POWER_TOT),
        }
    }
    let power_tot = record.number(POWER_TOT);

    match (indoor_reference(record), record.number(OUTSIDE_T)) {
        (Some(indoor), Some(outside)) => {
            record.insert(T_DIFF, (indoor - outside).abs());
        }
        _ => skipped.push(T_DIFF),
    }

    match (power_tot, record.number(T_DIFF)) {
        (Some(power), Some(diff)) if diff > 0.0 => {
            record.insert(T_DIFF_EFF, power / diff);
        }
        _ => skipped.push(T_DIFF_EFF),
    }

    let heat_off = record
        .number(HEAT_1_B)
        .is_some_and(|flag| (flag.round() as i64).rem_euclid(2) == 0);
    let hp_w = record.number(HP_W);

    match (
        record.number(TAH_FPM),
        record.number(TAH_OUT_T),
        record.number(TAH_IN_T),
        hp_w,
    ) {
        (Some(fpm), Some(out_t), Some(in_t), Some(hp)) => {
            let heat = constants.air_density
                * constants.duct_area
                * constants.air_specific_heat
                * fpm
                * (out_t - in_t).abs();
            record.insert(COP, bounded_cop(heat, hp, heat_off, constants.ceiling));
        }
        _ => skipped.push(COP),
    }

    match (record.number(LOOP_OUT_T), record.number(LOOP_IN_T)) {
        (Some(out_t), Some(in_t)) => {
            // Heat moved through the ground loop, in kW.
            let well = constants.loop_gpm
                * constants.gpm_to_lps
                * constants.water_specific_heat
                * (out_t - in_t).abs();
            record.insert(WELL_W, well);
        }
        _ => skipped.push(WELL_W),
    }

    match (record.number(WELL_W), hp_w) {
        (Some(well), Some(hp)) => {
            record.insert(WELL_COP, bounded_cop(well, hp, heat_off, constants.ceiling));
        }
        _ => skipped.push(WELL_COP),
    }

    match (
        record.number(HOUSE_W),
        power_tot,
        record.number(DEHUMIDIFIER_W),
    ) {
        (Some(house), Some(power), Some(dehumidifier)) => {
            record.insert(BASE_LOAD_W, (house - power - dehumidifier).abs());
        }
        _ => skipped.push(BASE_LOAD_W),
    }

    skipped
}

fn indoor_reference(record: &TelemetryRecord) -> Option<f64> {
    let rooms: Vec<f64> = ROOM_TEMPERATURES
        .iter()
        .filter_map(|field| record.number(*field))
        .collect();
    if rooms.is_empty() {
        return record.number(LIVING_T);
    }
    Some(rooms.iter().sum::<f64>() / rooms.len() as f64)
}

fn bounded_cop(heat_kw: f64, hp_w: f64, heat_off: bool, ceiling: f64) -> FieldValue {
    if heat_off || hp_w <= 0.0 {
        return FieldValue::Missing;
    }
    let cop = heat_kw / (hp_w / 1000.0);
    if !cop.is_finite() || cop > ceiling {
        return FieldValue::Missing;
    }
    FieldValue::Number(cop)
}

/// Sample count covering `hours` of real time at the batch's mean sampling
/// interval, clamped to `[min, max]`.
pub fn rolling_window_samples(
    batch: &[TelemetryRecord],
    hours: f64,
    min: usize,
    max: usize,
) -> usize {
    let max = max.max(min);
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return min;
    };
    if batch.len() < 2 {
        return min;
    }
    let span_secs = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
    let mean_interval = span_secs / (batch.len() - 1) as f64;
    if mean_interval <= 0.0 {
        return min;
    }
    let samples = (hours * 3600.0 / mean_interval).round();
    if !samples.is_finite() || samples < 0.0 {
        return min;
    }
    (samples as usize).clamp(min, max)
}

/// Window bounds scaled to the batch size, between a fifteenth and a half of
/// the batch.
pub fn default_window_bounds(len: usize) -> (usize, usize) {
    ((len / 15).max(1), (len / 2).max(1))
}

/// Trailing mean over the last `window` samples. Missing and absent values
/// are skipped; a window with no values yields `None`.
pub fn rolling_mean(batch: &[TelemetryRecord], field: Field, window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..batch.len())
        .map(|idx| {
            let start = (idx + 1).saturating_sub(window);
            let values: Vec<f64> = batch[start..=idx]
                .iter()
                .filter_map(|record| record.number(field))
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        })
        .collect()
}

/// Accumulation since local midnight: each sample minus the first value seen
/// on its local day in `zone`.
pub fn daily_reset(batch: &[TelemetryRecord], field: Field, zone: Tz) -> Vec<Option<f64>> {
    let mut first_of_day = HashMap::new();
    batch
        .iter()
        .map(|record| {
            let value = record.number(field)?;
            let day = record.timestamp.with_timezone(&zone).date_naive();
            let base = *first_of_day.entry(day).or_insert(value);
            Some(value - base)
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub constants: CopConstants,
    pub rolling_hours: f64,
    pub zone: Tz,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub records: usize,
    pub window_samples: usize,
    /// How many records skipped each metric.
    pub skipped: Vec<(Field, usize)>,
}

/// Sorts the batch by time, recomputes per-record metrics and adds the
/// rolling COP means and the daily rain accumulation.
pub fn enrich_batch(batch: &mut [TelemetryRecord], options: &BatchOptions) -> BatchSummary {
    batch.sort_by_key(|record| record.timestamp);

    let mut skipped: Vec<(Field, usize)> = Vec::new();
    for record in batch.iter_mut() {
        for field in enrich_record(record, &options.constants) {
            match skipped.iter_mut().find(|(seen, _)| *seen == field) {
                Some((_, count)) => *count += 1,
                None => skipped.push((field, 1)),
            }
        }
    }

    let (min, max) = default_window_bounds(batch.len());
    let window = rolling_window_samples(batch, options.rolling_hours, min, max);
    let cop_ma = rolling_mean(batch, COP, window);
    let well_cop_ma = rolling_mean(batch, WELL_COP, window);
    let rain = daily_reset(batch, WEATHER_STATION_R, options.zone);

    for (idx, record) in batch.iter_mut().enumerate() {
        if let Some(value) = cop_ma[idx] {
            record.insert(COP_MA, value);
        }
        if let Some(value) = well_cop_ma[idx] {
            record.insert(WELL_COP_MA, value);
        }
        if let Some(value) = rain[idx] {
            record.insert(RAIN_ACCUM_R, value);
        }
    }

    BatchSummary {
        records: batch.len(),
        window_samples: window,
        skipped,
    }
}
