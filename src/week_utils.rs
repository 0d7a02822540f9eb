use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Monday of the ISO week containing `date`.
pub fn monday_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// The Monday strictly after `date`. A Monday input yields the next one.
pub fn next_monday(date: NaiveDate) -> NaiveDate {
    let ahead = (7 - date.weekday().num_days_from_monday() as i64) % 7;
    if ahead == 0 {
        date + Duration::days(7)
    } else {
        date + Duration::days(ahead)
    }
}

/// First Monday on or after `date`.
pub fn first_monday_on_or_after(date: NaiveDate) -> NaiveDate {
    if date.weekday() == Weekday::Mon {
        date
    } else {
        next_monday(date)
    }
}

/// Mondays of every ISO week inside [from, to], starting at the first
/// Monday >= `from`.
pub fn week_starts(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut current = first_monday_on_or_after(from);
    let mut weeks = Vec::new();
    while current <= to {
        weeks.push(current);
        current += Duration::days(7);
    }
    weeks
}

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Mon-Fri dates within [start, end_inclusive].
pub fn trading_days(start: NaiveDate, end_inclusive: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end_inclusive {
        if is_trading_day(current) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monday_of_week_handles_every_weekday() {
        let monday = day(2025, 6, 2);
        for offset in 0..7 {
            assert_eq!(monday_of_week(monday + Duration::days(offset)), monday);
        }
    }

    #[test]
    fn next_monday_from_monday_is_a_week_later() {
        assert_eq!(next_monday(day(2025, 6, 2)), day(2025, 6, 9));
        assert_eq!(next_monday(day(2025, 6, 4)), day(2025, 6, 9));
        assert_eq!(next_monday(day(2025, 6, 8)), day(2025, 6, 9));
    }

    #[test]
    fn week_starts_begin_at_first_monday_on_or_after_from() {
        // 2025-06-04 is a Wednesday: the first simulated week is 06-09.
        let weeks = week_starts(day(2025, 6, 4), day(2025, 6, 24));
        assert_eq!(weeks, vec![day(2025, 6, 9), day(2025, 6, 16), day(2025, 6, 23)]);

        let from_monday = week_starts(day(2025, 6, 2), day(2025, 6, 10));
        assert_eq!(from_monday, vec![day(2025, 6, 2), day(2025, 6, 9)]);
    }

    #[test]
    fn week_starts_of_empty_range_is_empty() {
        assert!(week_starts(day(2025, 6, 10), day(2025, 6, 8)).is_empty());
    }

    #[test]
    fn trading_days_skip_weekends() {
        let days = trading_days(day(2025, 6, 5), day(2025, 6, 10));
        assert_eq!(
            days,
            vec![day(2025, 6, 5), day(2025, 6, 6), day(2025, 6, 9), day(2025, 6, 10)]
        );
    }
}
