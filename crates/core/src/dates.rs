//! Reporting-calendar date helpers: compact date parsing, backfill windows,
//! and monthly sub-range chunking.

use chrono::{Datelike, Duration, NaiveDate};

/// Parse a provider-reported date key.
///
/// Accepts the compact `YYYYMMDD` form (GA4 report rows) and the dashed
/// `YYYY-MM-DD` form (Search Console, Ads). Returns `None` for anything
/// else; callers skip and count such rows rather than failing a fetch.
pub fn parse_report_date(date_key: &str) -> Option<NaiveDate> {
    let digits: &str;
    let compact: String;
    if date_key.len() == 8 && date_key.chars().all(|c| c.is_ascii_digit()) {
        digits = date_key;
    } else if date_key.len() == 10 {
        compact = date_key.replace('-', "");
        if compact.len() != 8 || !compact.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        digits = &compact;
    } else {
        return None;
    }

    let year: i32 = digits[0..4].parse().ok()?;
    let month: u32 = digits[4..6].parse().ok()?;
    let day: u32 = digits[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Inclusive backfill window ending today.
pub fn backfill_window(today: NaiveDate, days: i64) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(days), today)
}

/// The most recently completed reporting day.
pub fn yesterday(today: NaiveDate) -> NaiveDate {
    today - Duration::days(1)
}

/// Split an inclusive date range into calendar-month sub-ranges, oldest
/// first. The first and last sub-range are clamped to the overall bounds.
///
/// Used by backfill to keep each upstream report request under payload/row
/// limits. Returns an empty vec when `start > end`.
pub fn month_ranges(start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut ranges = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let sub_end = last_day_of_month(cursor).min(end);
        ranges.push((cursor, sub_end));
        cursor = sub_end + Duration::days(1);
    }
    ranges
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // First of the following month always exists.
    NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap() - Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    // -- Date parsing ------------------------------------------------------

    #[test]
    fn parses_compact_and_dashed_forms() {
        assert_eq!(parse_report_date("20240115"), Some(d(2024, 1, 15)));
        assert_eq!(parse_report_date("2024-01-15"), Some(d(2024, 1, 15)));
    }

    #[test]
    fn rejects_garbage_dates() {
        assert_eq!(parse_report_date(""), None);
        assert_eq!(parse_report_date("2024011"), None);
        assert_eq!(parse_report_date("20241350"), None);
        assert_eq!(parse_report_date("(other)"), None);
        assert_eq!(parse_report_date("2024/01/15"), None);
    }

    #[test]
    fn rejects_impossible_calendar_dates() {
        assert_eq!(parse_report_date("20230229"), None);
        assert_eq!(parse_report_date("20240229"), Some(d(2024, 2, 29)));
    }

    // -- Month chunking ----------------------------------------------------

    #[test]
    fn splits_range_into_clamped_months() {
        let ranges = month_ranges(d(2024, 1, 15), d(2024, 3, 10));
        assert_eq!(
            ranges,
            vec![
                (d(2024, 1, 15), d(2024, 1, 31)),
                (d(2024, 2, 1), d(2024, 2, 29)),
                (d(2024, 3, 1), d(2024, 3, 10)),
            ]
        );
    }

    #[test]
    fn single_day_range_is_one_chunk() {
        let ranges = month_ranges(d(2024, 6, 5), d(2024, 6, 5));
        assert_eq!(ranges, vec![(d(2024, 6, 5), d(2024, 6, 5))]);
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(month_ranges(d(2024, 6, 5), d(2024, 6, 4)).is_empty());
    }

    #[test]
    fn december_rolls_into_next_year() {
        let ranges = month_ranges(d(2023, 12, 20), d(2024, 1, 5));
        assert_eq!(
            ranges,
            vec![
                (d(2023, 12, 20), d(2023, 12, 31)),
                (d(2024, 1, 1), d(2024, 1, 5)),
            ]
        );
    }

    // -- Windows -----------------------------------------------------------

    #[test]
    fn backfill_window_spans_requested_days() {
        let (start, end) = backfill_window(d(2024, 4, 10), 90);
        assert_eq!(end, d(2024, 4, 10));
        assert_eq!(start, d(2024, 1, 11));
    }

    #[test]
    fn yesterday_is_one_day_back() {
        assert_eq!(yesterday(d(2024, 3, 1)), d(2024, 2, 29));
    }
}
