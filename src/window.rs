use chrono::NaiveDate;

/// Minutes since midnight.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Stand-in end token for open-ended bookings.
pub const END_OF_DAY: &str = "23h59";

/// Parse a compact time token (`9h30`, `14h00`) into minutes since midnight.
///
/// The accepted shape is one or two hour digits, a literal `h`, and exactly
/// two minute digits. Anything else returns `None`.
pub fn parse_time_token(token: &str) -> Option<Minutes> {
    let (hours, minutes) = token.split_once('h')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    if !hours.bytes().all(|b| b.is_ascii_digit()) || !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let h: Minutes = hours.parse().ok()?;
    let m: Minutes = minutes.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Render minutes since midnight back into the compact token form.
pub fn format_time_token(minutes: Minutes) -> String {
    let minutes = minutes % MINUTES_PER_DAY;
    format!("{}h{:02}", minutes / 60, minutes % 60)
}

/// Half-open minute range for a window on a single day key.
///
/// A window whose end is at or before its start runs past midnight, so its
/// end is pushed into the following day.
pub fn window_minutes(start: Minutes, end: Minutes) -> (Minutes, Minutes) {
    if end <= start {
        (start, end + MINUTES_PER_DAY)
    } else {
        (start, end)
    }
}

/// Whether two windows on the same day overlap. Touching windows do not.
///
/// Returns `false` when any token is unparseable; callers that need the
/// distinction use [`try_windows_overlap`].
pub fn windows_overlap(start_a: &str, end_a: &str, start_b: &str, end_b: &str) -> bool {
    try_windows_overlap(start_a, end_a, start_b, end_b).unwrap_or(false)
}

/// Like [`windows_overlap`], but `None` when a token cannot be evaluated.
pub fn try_windows_overlap(start_a: &str, end_a: &str, start_b: &str, end_b: &str) -> Option<bool> {
    try_windows_overlap_shifted(start_a, end_a, start_b, end_b, 0)
}

/// Overlap test with window `a` sitting `day_offset` days after window `b`.
///
/// An overnight window on one day runs into the early hours of the next, so
/// windows one day apart can still collide.
pub fn try_windows_overlap_shifted(
    start_a: &str,
    end_a: &str,
    start_b: &str,
    end_b: &str,
    day_offset: i64,
) -> Option<bool> {
    let (a0, a1) = window_minutes(parse_time_token(start_a)?, parse_time_token(end_a)?);
    let (b0, b1) = window_minutes(parse_time_token(start_b)?, parse_time_token(end_b)?);
    let shift = day_offset * i64::from(MINUTES_PER_DAY);
    let (a0, a1) = (i64::from(a0) + shift, i64::from(a1) + shift);
    let (b0, b1) = (i64::from(b0), i64::from(b1));
    Some(a0 < b1 && b0 < a1)
}

/// Every calendar day from `start` to `end` inclusive, ascending.
///
/// A missing end, or one at or before `start`, yields just `start`.
pub fn expand_date_range(start: NaiveDate, end: Option<NaiveDate>) -> Vec<NaiveDate> {
    match end {
        Some(end) if end > start => start.iter_days().take_while(|d| *d <= end).collect(),
        _ => vec![start],
    }
}

/// Number of calendar days `expand_date_range` would produce, without allocating.
pub fn range_len(start: NaiveDate, end: Option<NaiveDate>) -> usize {
    match end {
        Some(end) if end > start => (end - start).num_days() as usize + 1,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn parse_accepts_compact_tokens() {
        assert_eq!(parse_time_token("9h30"), Some(570));
        assert_eq!(parse_time_token("09h30"), Some(570));
        assert_eq!(parse_time_token("14h00"), Some(840));
        assert_eq!(parse_time_token("0h00"), Some(0));
        assert_eq!(parse_time_token("23h59"), Some(1439));
    }

    #[test]
    fn parse_rejects_other_shapes() {
        for bad in ["", "9", "9h", "9h5", "9h300", "24h00", "9h60", "9:30", "h30", "123h00", "9H30", " 9h30", "+9h30", "9h-1"] {
            assert_eq!(parse_time_token(bad), None, "{bad:?} should be rejected");
        }
    }

    #[test]
    fn format_round_trips_minutes() {
        assert_eq!(format_time_token(570), "9h30");
        assert_eq!(format_time_token(0), "0h00");
        assert_eq!(format_time_token(1439), "23h59");
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        assert!(!windows_overlap("9h00", "10h00", "10h00", "11h00"));
        assert!(!windows_overlap("10h00", "11h00", "9h00", "10h00"));
    }

    #[test]
    fn nested_and_partial_windows_overlap() {
        assert!(windows_overlap("9h00", "17h00", "12h00", "13h00"));
        assert!(windows_overlap("9h00", "12h00", "11h59", "14h00"));
    }

    #[test]
    fn overlap_is_symmetric() {
        let tokens = ["0h00", "6h30", "9h00", "10h00", "12h15", "18h00", "22h00", "23h59", "1h00"];
        for a in tokens {
            for b in tokens {
                for c in tokens {
                    for d in tokens {
                        assert_eq!(
                            windows_overlap(a, b, c, d),
                            windows_overlap(c, d, a, b),
                            "asymmetric for {a}-{b} vs {c}-{d}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn overnight_window_reaches_past_midnight() {
        assert!(windows_overlap("22h00", "1h00", "23h00", "23h59"));
        assert!(!windows_overlap("22h00", "1h00", "9h00", "12h00"));
    }

    #[test]
    fn overnight_window_runs_into_next_day() {
        // b = 22h00-1h00 on day D, a = 0h00-4h00 on D+1.
        assert_eq!(try_windows_overlap_shifted("0h00", "4h00", "22h00", "1h00", 1), Some(true));
        // Touching at 1h00 on D+1.
        assert_eq!(try_windows_overlap_shifted("1h00", "4h00", "22h00", "1h00", 1), Some(false));
        // Daytime windows a day apart never meet.
        assert_eq!(try_windows_overlap_shifted("9h00", "17h00", "9h00", "17h00", 1), Some(false));
        assert_eq!(try_windows_overlap_shifted("22h00", "1h00", "0h00", "4h00", -1), Some(true));
    }

    #[test]
    fn unparseable_tokens_read_as_no_overlap() {
        assert!(!windows_overlap("9h00", "12h00", "nine", "12h00"));
        assert_eq!(try_windows_overlap("9h00", "12h00", "nine", "12h00"), None);
    }

    #[test]
    fn expand_multi_day_range() {
        assert_eq!(
            expand_date_range(day("2024-06-01"), Some(day("2024-06-03"))),
            vec![day("2024-06-01"), day("2024-06-02"), day("2024-06-03")]
        );
    }

    #[test]
    fn expand_single_day() {
        assert_eq!(expand_date_range(day("2024-06-01"), None), vec![day("2024-06-01")]);
        assert_eq!(
            expand_date_range(day("2024-06-01"), Some(day("2024-06-01"))),
            vec![day("2024-06-01")]
        );
    }

    #[test]
    fn expand_backwards_range_degrades_to_start() {
        assert_eq!(
            expand_date_range(day("2024-06-05"), Some(day("2024-06-01"))),
            vec![day("2024-06-05")]
        );
    }

    #[test]
    fn expand_crosses_month_boundary() {
        let days = expand_date_range(day("2024-02-28"), Some(day("2024-03-01")));
        assert_eq!(days, vec![day("2024-02-28"), day("2024-02-29"), day("2024-03-01")]);
        assert_eq!(range_len(day("2024-02-28"), Some(day("2024-03-01"))), 3);
    }
}
