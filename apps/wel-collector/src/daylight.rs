//! Sunrise/sunset from the standard sunrise equation.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const OBLIQUITY_DEG: f64 = 23.4397;
// Refraction plus solar disc radius.
const HORIZON_ALTITUDE_DEG: f64 = -0.833;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub zone: Tz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SunTimes {
    Normal {
        sunrise: DateTime<Utc>,
        sunset: DateTime<Utc>,
    },
    PolarDay,
    PolarNight,
}

/// Sunrise and sunset for a local calendar date at `location`.
pub fn sun_times(location: &Location, date: NaiveDate) -> SunTimes {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default();
    let n = (date - epoch).num_days() as f64;

    let j_star = n - location.longitude / 360.0;
    let m = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0);
    let m_rad = m.to_radians();
    let c = 1.9148 * m_rad.sin() + 0.0200 * (2.0 * m_rad).sin() + 0.0003 * (3.0 * m_rad).sin();
    let lambda = (m + c + 180.0 + 102.9372).rem_euclid(360.0).to_radians();
    let j_transit = J2000 + j_star + 0.0053 * m_rad.sin() - 0.0069 * (2.0 * lambda).sin();

    let sin_decl = lambda.sin() * OBLIQUITY_DEG.to_radians().sin();
    let cos_decl = sin_decl.asin().cos();
    let lat = location.latitude.to_radians();
    let cos_hour_angle = (HORIZON_ALTITUDE_DEG.to_radians().sin() - lat.sin() * sin_decl)
        / (lat.cos() * cos_decl);

    if cos_hour_angle > 1.0 {
        return SunTimes::PolarNight;
    }
    if cos_hour_angle < -1.0 {
        return SunTimes::PolarDay;
    }

    let half_day = cos_hour_angle.acos().to_degrees() / 360.0;
    match (
        julian_to_utc(j_transit - half_day),
        julian_to_utc(j_transit + half_day),
    ) {
        (Some(sunrise), Some(sunset)) => SunTimes::Normal { sunrise, sunset },
        _ => SunTimes::PolarNight,
    }
}

/// True when `timestamp` falls strictly between sunrise and sunset of its
/// local date.
pub fn is_daylight(location: &Location, timestamp: DateTime<Utc>) -> bool {
    let local_date = timestamp.with_timezone(&location.zone).date_naive();
    match sun_times(location, local_date) {
        SunTimes::Normal { sunrise, sunset } => timestamp > sunrise && timestamp < sunset,
        SunTimes::PolarDay => true,
        SunTimes::PolarNight => false,
    }
}

fn julian_to_utc(jd: f64) -> Option<DateTime<Utc>> {
    let secs = ((jd - UNIX_EPOCH_JD) * 86_400.0).round();
    if !secs.is_finite() {
        return None;
    }
    Utc.timestamp_opt(secs as i64, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn home() -> Location {
        Location {
            latitude: 42.485557,
            longitude: -71.433445,
            zone: chrono_tz::America::New_York,
        }
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::America::New_York
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
        let diff = (actual - expected).num_minutes().abs();
        assert!(diff <= 15, "expected ~{expected}, got {actual}");
    }

    #[test]
    fn summer_solstice_times_match_almanac() {
        let SunTimes::Normal { sunrise, sunset } =
            sun_times(&home(), NaiveDate::from_ymd_opt(2024, 6, 21).unwrap())
        else {
            panic!("expected a normal day");
        };
        assert_close(sunrise, local(2024, 6, 21, 5, 8));
        assert_close(sunset, local(2024, 6, 21, 20, 24));
    }

    #[test]
    fn winter_solstice_times_match_almanac() {
        let SunTimes::Normal { sunrise, sunset } =
            sun_times(&home(), NaiveDate::from_ymd_opt(2024, 12, 21).unwrap())
        else {
            panic!("expected a normal day");
        };
        assert_close(sunrise, local(2024, 12, 21, 7, 9));
        assert_close(sunset, local(2024, 12, 21, 16, 15));
    }

    #[test]
    fn daylight_flag_follows_the_season() {
        let loc = home();
        // Summer
        assert!(!is_daylight(&loc, local(2024, 6, 21, 4, 30)));
        assert!(is_daylight(&loc, local(2024, 6, 21, 12, 0)));
        assert!(is_daylight(&loc, local(2024, 6, 21, 17, 0)));
        assert!(is_daylight(&loc, local(2024, 6, 21, 20, 0)));
        assert!(!is_daylight(&loc, local(2024, 6, 21, 21, 0)));
        // Winter
        assert!(!is_daylight(&loc, local(2024, 12, 21, 6, 30)));
        assert!(is_daylight(&loc, local(2024, 12, 21, 12, 0)));
        assert!(!is_daylight(&loc, local(2024, 12, 21, 17, 0)));
        assert!(!is_daylight(&loc, local(2024, 12, 21, 20, 0)));
    }

    #[test]
    fn boundaries_are_exclusive() {
        let loc = home();
        let SunTimes::Normal { sunrise, sunset } =
            sun_times(&loc, NaiveDate::from_ymd_opt(2024, 3, 20).unwrap())
        else {
            panic!("expected a normal day");
        };
        assert!(!is_daylight(&loc, sunrise));
        assert!(is_daylight(&loc, sunrise + Duration::seconds(1)));
        assert!(!is_daylight(&loc, sunset));
    }

    #[test]
    fn polar_latitudes_report_polar_day_and_night() {
        let tromso = Location {
            latitude: 69.65,
            longitude: 18.96,
            zone: chrono_tz::Europe::Oslo,
        };
        assert_eq!(
            sun_times(&tromso, NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()),
            SunTimes::PolarDay
        );
        assert_eq!(
            sun_times(&tromso, NaiveDate::from_ymd_opt(2024, 12, 21).unwrap()),
            SunTimes::PolarNight
        );
    }
}
