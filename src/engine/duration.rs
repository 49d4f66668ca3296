use crate::window::parse_time_token;

use super::Rejection;

pub const DEFAULT_MIN_HOURS: f64 = 3.0;

fn hours_of(token: &str) -> Result<f64, Rejection> {
    parse_time_token(token)
        .map(|m| m as f64 / 60.0)
        .ok_or_else(|| Rejection::InvalidTime(token.to_string()))
}

/// Length of a window in fractional hours. An end at or before the start
/// crosses midnight.
pub fn window_hours(start: &str, end: &str) -> Result<f64, Rejection> {
    let start = hours_of(start)?;
    let end = hours_of(end)?;
    Ok(if end <= start { (24.0 - start) + end } else { end - start })
}

/// Reject windows shorter than `min_hours`.
///
/// A live clock-in skips the minimum: real elapsed time is authoritative once
/// tracking has started. Unparseable tokens are rejected either way.
pub fn validate_duration(
    start: &str,
    end: &str,
    clocked_in: bool,
    min_hours: f64,
) -> Result<f64, Rejection> {
    let hours = window_hours(start, end)?;
    if !clocked_in && hours < min_hours {
        return Err(Rejection::DurationTooShort {
            hours,
            minimum: min_hours,
        });
    }
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_hours_is_too_short() {
        let err = validate_duration("9h00", "11h00", false, DEFAULT_MIN_HOURS).unwrap_err();
        assert!(matches!(err, Rejection::DurationTooShort { hours, .. } if (hours - 2.0).abs() < 1e-9));
    }

    #[test]
    fn three_hours_is_accepted() {
        assert_eq!(validate_duration("9h00", "12h00", false, DEFAULT_MIN_HOURS).unwrap(), 3.0);
    }

    #[test]
    fn overnight_span_wraps_midnight() {
        // 24 - 22 + 1 = 3
        assert_eq!(validate_duration("22h00", "1h00", false, DEFAULT_MIN_HOURS).unwrap(), 3.0);
        assert!(validate_duration("23h00", "1h00", false, DEFAULT_MIN_HOURS).is_err());
    }

    #[test]
    fn half_hours_count() {
        assert_eq!(window_hours("9h30", "12h45").unwrap(), 3.25);
        assert!(validate_duration("9h30", "12h15", false, DEFAULT_MIN_HOURS).is_err());
    }

    #[test]
    fn equal_tokens_mean_a_full_day() {
        assert_eq!(window_hours("9h00", "9h00").unwrap(), 24.0);
    }

    #[test]
    fn clock_in_bypasses_minimum() {
        assert_eq!(validate_duration("9h00", "10h00", true, DEFAULT_MIN_HOURS).unwrap(), 1.0);
    }

    #[test]
    fn bad_tokens_fail_closed() {
        assert_eq!(
            validate_duration("9:00", "12h00", false, DEFAULT_MIN_HOURS),
            Err(Rejection::InvalidTime("9:00".into()))
        );
        assert!(validate_duration("9h00", "noon", true, DEFAULT_MIN_HOURS).is_err());
    }

    #[test]
    fn minimum_is_configurable() {
        assert!(validate_duration("9h00", "11h00", false, 2.0).is_ok());
        assert!(validate_duration("9h00", "12h00", false, 4.0).is_err());
    }
}
