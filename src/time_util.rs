use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ndarray::Array1;
use rand::Rng;

use crate::error::MagvalError;

/// CDF_EPOCH value of 2000-01-01T00:00:00Z (milliseconds since 0000-01-01).
pub const CDF_EPOCH_2000: f64 = 63_113_904_000_000.0;

/// CDF data-type code of the CDF_EPOCH time encoding.
pub const CDF_EPOCH_TYPE: u32 = 31;

/// Nanoseconds between the Unix epoch and 2000-01-01T00:00:00Z.
pub const EPOCH_2000_NS: i64 = 946_684_800_000_000_000;

const NS_PER_DAY: f64 = 86_400_000_000_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Parse an ISO-8601 timestamp. Accepts RFC 3339, a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as UTC) and a bare date.
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>, MagvalError> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    }
    Err(MagvalError::InvalidDatetime(text.to_string()))
}

/// Parse the day/time subset of ISO-8601 durations (`PnW`, `PnDTnHnMnS`,
/// fractional values allowed). Calendar years and months are rejected; the
/// services only emit day/time durations.
pub fn parse_duration(text: &str) -> Result<Duration, MagvalError> {
    let invalid = || MagvalError::InvalidDuration(text.to_string());
    let trimmed = text.trim();
    let body = trimmed.strip_prefix('P').ok_or_else(invalid)?;
    if body.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) if !time.is_empty() => (date, Some(time)),
        Some(_) => return Err(invalid()),
        None => (body, None),
    };

    let mut total_seconds = 0.0f64;
    let mut seen = false;

    for (value, unit) in designator_tokens(date_part).ok_or_else(invalid)? {
        seen = true;
        total_seconds += match unit {
            'W' => value * 7.0 * 86_400.0,
            'D' => value * 86_400.0,
            _ => return Err(invalid()),
        };
    }
    if let Some(time_part) = time_part {
        for (value, unit) in designator_tokens(time_part).ok_or_else(invalid)? {
            seen = true;
            total_seconds += match unit {
                'H' => value * 3_600.0,
                'M' => value * 60.0,
                'S' => value,
                _ => return Err(invalid()),
            };
        }
    }
    if !seen {
        return Err(invalid());
    }
    Ok(Duration::nanoseconds((total_seconds * 1e9).round() as i64))
}

fn designator_tokens(part: &str) -> Option<Vec<(f64, char)>> {
    let mut tokens = Vec::new();
    let mut number = String::new();
    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
        } else if ch.is_ascii_uppercase() {
            let value: f64 = number.parse().ok()?;
            number.clear();
            tokens.push((value, ch));
        } else {
            return None;
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(tokens)
}

/// Uniformly pick a whole-second offset into `[start, end)`. Returns `start`
/// when the interval is empty.
pub fn random_time_in<R: Rng>(
    rng: &mut R,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DateTime<Utc> {
    let total_seconds = (end - start).num_seconds().max(0);
    if total_seconds == 0 {
        return start;
    }
    start + Duration::seconds(rng.gen_range(0..total_seconds))
}

/// Convert raw CDF time values to MJD2000.
pub fn cdf_rawtime_to_mjd2000(
    raw: &Array1<f64>,
    cdf_type: u32,
) -> Result<Array1<f64>, MagvalError> {
    if cdf_type != CDF_EPOCH_TYPE {
        return Err(MagvalError::UnsupportedCdfTimeType(cdf_type));
    }
    Ok(raw.mapv(|value| (value - CDF_EPOCH_2000) / MS_PER_DAY))
}

/// Convert an int64 nanosecond Unix-epoch timestamp to MJD2000.
pub fn epoch_ns_to_mjd2000(ns: i64) -> f64 {
    (ns - EPOCH_2000_NS) as f64 / NS_PER_DAY
}

pub fn datetime_to_mjd2000(time: DateTime<Utc>) -> f64 {
    let elapsed = time - mjd2000_epoch();
    // i64 microseconds cover the full range of dates handled here
    elapsed.num_microseconds().unwrap_or(i64::MAX) as f64 / 86_400_000_000.0
}

pub fn mjd2000_to_datetime(mjd2000: f64) -> DateTime<Utc> {
    mjd2000_epoch() + Duration::microseconds((mjd2000 * 86_400_000_000.0).round() as i64)
}

fn mjd2000_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

fn year_start_mjd2000(year: i32) -> f64 {
    let days = NaiveDate::from_ymd_opt(year, 1, 1).unwrap()
        - NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    days.num_days() as f64
}

/// Convert MJD2000 to decimal years. Whole decimal years are aligned with
/// calendar year boundaries and leap years keep their true length.
pub fn mjd2000_to_decimal_year(mjd2000: f64) -> f64 {
    let year = mjd2000_to_datetime(mjd2000).date_naive().year();
    let start = year_start_mjd2000(year);
    let end = year_start_mjd2000(year + 1);
    year as f64 + (mjd2000 - start) / (end - start)
}

/// Convert decimal years back to MJD2000.
pub fn decimal_year_to_mjd2000(decimal_year: f64) -> f64 {
    let year = decimal_year.floor() as i32;
    let start = year_start_mjd2000(year);
    let end = year_start_mjd2000(year + 1);
    start + (decimal_year - year as f64) * (end - start)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn parse_datetime_variants() {
        let expected = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_datetime("2020-01-02T03:04:05Z").unwrap(), expected);
        assert_eq!(parse_datetime("2020-01-02T03:04:05").unwrap(), expected);
        assert_eq!(
            parse_datetime("2020-01-02").unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn parse_datetime_invalid() {
        let err = parse_datetime("not-a-date").unwrap_err();
        assert_matches!(err, MagvalError::InvalidDatetime(_));
    }

    #[test]
    fn parse_duration_time_units() {
        assert_eq!(parse_duration("PT24H").unwrap(), Duration::hours(24));
        assert_eq!(
            parse_duration("P1DT2H30M15S").unwrap(),
            Duration::days(1) + Duration::hours(2) + Duration::minutes(30) + Duration::seconds(15)
        );
        assert_eq!(parse_duration("P2W").unwrap(), Duration::weeks(2));
        assert_eq!(
            parse_duration("PT0.5S").unwrap(),
            Duration::milliseconds(500)
        );
    }

    #[test]
    fn parse_duration_rejects_calendar_units() {
        assert_matches!(
            parse_duration("P1Y").unwrap_err(),
            MagvalError::InvalidDuration(_)
        );
        assert_matches!(
            parse_duration("P1M").unwrap_err(),
            MagvalError::InvalidDuration(_)
        );
        assert_matches!(parse_duration("P").unwrap_err(), MagvalError::InvalidDuration(_));
        assert_matches!(
            parse_duration("PT").unwrap_err(),
            MagvalError::InvalidDuration(_)
        );
    }

    #[test]
    fn sampling_window_policy_example() {
        // PT24H / 10 is PT2H24M
        let selection = parse_duration("PT24H").unwrap() / 10;
        assert_eq!(selection, Duration::minutes(144));
    }

    #[test]
    fn random_time_stays_in_range() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let picked = random_time_in(&mut rng, start, end);
            assert!(picked >= start && picked < end);
            assert_eq!(picked.timestamp_subsec_nanos(), 0);
        }
    }

    #[test]
    fn random_time_empty_interval() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(random_time_in(&mut rng, start, start), start);
        let earlier = start - Duration::hours(1);
        assert_eq!(random_time_in(&mut rng, start, earlier), start);
    }

    #[test]
    fn random_time_deterministic_with_seed() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        assert_eq!(random_time_in(&mut a, start, end), random_time_in(&mut b, start, end));
    }

    #[test]
    fn cdf_epoch_conversion() {
        let raw = Array1::from(vec![CDF_EPOCH_2000, CDF_EPOCH_2000 + MS_PER_DAY]);
        let mjd = cdf_rawtime_to_mjd2000(&raw, CDF_EPOCH_TYPE).unwrap();
        assert_eq!(mjd[0], 0.0);
        assert_eq!(mjd[1], 1.0);
    }

    #[test]
    fn cdf_epoch_unsupported_type() {
        let raw = Array1::from(vec![0.0]);
        let err = cdf_rawtime_to_mjd2000(&raw, 33).unwrap_err();
        assert_matches!(err, MagvalError::UnsupportedCdfTimeType(33));
    }

    #[test]
    fn epoch_ns_matches_datetime_conversion() {
        let time = Utc.with_ymd_and_hms(2013, 11, 25, 11, 2, 52).unwrap();
        let from_ns = epoch_ns_to_mjd2000(time.timestamp_nanos_opt().unwrap());
        let from_dt = datetime_to_mjd2000(time);
        assert!((from_ns - from_dt).abs() < 1e-9);
    }

    #[test]
    fn mjd2000_datetime_round_trip() {
        let time = Utc.with_ymd_and_hms(2014, 7, 2, 13, 45, 30).unwrap();
        let round = mjd2000_to_datetime(datetime_to_mjd2000(time));
        assert_eq!(round, time);
    }

    #[test]
    fn decimal_year_boundaries() {
        // 2020 is a leap year with 366 days
        let start_2020 = datetime_to_mjd2000(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert!((mjd2000_to_decimal_year(start_2020) - 2020.0).abs() < 1e-12);
        let mid = start_2020 + 183.0;
        assert!((mjd2000_to_decimal_year(mid) - (2020.0 + 183.0 / 366.0)).abs() < 1e-12);
    }

    #[test]
    fn decimal_year_round_trip() {
        for &mjd in &[-365.5, 0.0, 366.25, 7000.125, 7671.0] {
            let round = decimal_year_to_mjd2000(mjd2000_to_decimal_year(mjd));
            assert!((round - mjd).abs() < 1e-9, "mjd={mjd} round={round}");
        }
    }
}
