use crate::daylight::{self, Location};
use crate::field::DAYLIGHT;
use crate::telemetry::{Readings, TelemetryRecord};
use chrono::{DateTime, Utc};

/// Merges one cycle's adapter outputs into a single record. Outputs are
/// applied in order, so on a collision the later adapter wins.
pub fn assemble<'a>(
    captured_at: DateTime<Utc>,
    location: &Location,
    contributions: impl IntoIterator<Item = (&'a str, Readings)>,
) -> TelemetryRecord {
    let mut record = TelemetryRecord::new(captured_at);
    for (adapter, readings) in contributions {
        for (field, value) in readings {
            if let Some(previous) = record.insert(field, value) {
                tracing::debug!(
                    adapter,
                    field = %field,
                    previous = ?previous,
                    "field supplied by more than one source; keeping the later value"
                );
            }
        }
    }

    let flag = if daylight::is_daylight(location, captured_at) {
        1.0
    } else {
        0.0
    };
    record.insert(DAYLIGHT, flag);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{HOUSE_W, HP_W, LIVING_T};
    use crate::telemetry::FieldValue;
    use chrono::TimeZone;

    fn home() -> Location {
        Location {
            latitude: 42.485557,
            longitude: -71.433445,
            zone: chrono_tz::America::New_York,
        }
    }

    #[test]
    fn later_source_wins_and_daylight_is_stamped() {
        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 16, 0, 0).unwrap();
        let device = Readings::from([(HP_W, FieldValue::Number(2100.0)), (LIVING_T, 20.5.into())]);
        let meter = Readings::from([(HP_W, FieldValue::Number(2150.0)), (HOUSE_W, 3000.0.into())]);

        let record = assemble(noon, &home(), [("device", device), ("power_meter", meter)]);

        assert_eq!(record.timestamp, noon);
        assert_eq!(record.number(HP_W), Some(2150.0));
        assert_eq!(record.number(LIVING_T), Some(20.5));
        assert_eq!(record.number(HOUSE_W), Some(3000.0));
        assert_eq!(record.number(DAYLIGHT), Some(1.0));
    }

    #[test]
    fn empty_cycle_still_yields_a_record() {
        let midnight = Utc.with_ymd_and_hms(2024, 12, 21, 5, 0, 0).unwrap();
        let record = assemble(midnight, &home(), Vec::<(&str, Readings)>::new());
        assert_eq!(record.len(), 1);
        assert_eq!(record.number(DAYLIGHT), Some(0.0));
    }
}
