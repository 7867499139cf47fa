//! Calendar rendering of simulated time.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::ComputationError;

/// Format used for the simulated-time query, e.g. `2024-03-01 12:30:05`.
pub const SIMULATED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Converts `epoch_start + seconds` into a UTC instant with nanosecond precision.
pub fn simulated_instant(epoch_start: DateTime<Utc>, seconds: f64) -> Result<DateTime<Utc>, ComputationError> {
    if !seconds.is_finite() {
        return Err(ComputationError::NonFiniteSeconds(seconds));
    }
    // TimeDelta tops out around i64::MAX milliseconds
    if seconds.abs() >= (i64::MAX / 1_000) as f64 {
        return Err(ComputationError::OutOfRange(seconds));
    }

    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as i64;
    let delta = TimeDelta::try_seconds(whole as i64)
        .and_then(|d| d.checked_add(&TimeDelta::nanoseconds(nanos)))
        .ok_or(ComputationError::OutOfRange(seconds))?;

    epoch_start
        .checked_add_signed(delta)
        .ok_or(ComputationError::OutOfRange(seconds))
}

/// Renders `epoch_start + seconds` with `SIMULATED_TIME_FORMAT`.
pub fn format_simulated_time(epoch_start: DateTime<Utc>, seconds: f64) -> Result<String, ComputationError> {
    Ok(simulated_instant(epoch_start, seconds)?
        .format(SIMULATED_TIME_FORMAT)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_format_adds_seconds_to_epoch() {
        assert_eq!(format_simulated_time(epoch(), 0.0).unwrap(), "2024-01-01 00:00:00");
        assert_eq!(format_simulated_time(epoch(), 90_061.4).unwrap(), "2024-01-02 01:01:01");
    }

    #[test]
    fn test_negative_seconds_go_before_epoch() {
        assert_eq!(format_simulated_time(epoch(), -1.0).unwrap(), "2023-12-31 23:59:59");
    }

    #[test]
    fn test_sub_second_precision_is_kept() {
        let instant = simulated_instant(epoch(), 1.25).unwrap();
        assert_eq!(instant.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_out_of_range_and_nan() {
        assert!(matches!(format_simulated_time(epoch(), f64::NAN), Err(ComputationError::NonFiniteSeconds(_))));
        assert!(matches!(format_simulated_time(epoch(), 1e300), Err(ComputationError::OutOfRange(_))));
    }
}
