use chrono::{Duration, NaiveTime};

use crate::schedule::DayOfWeek;

/// Closed interval check. `begin >= end` wraps through midnight, so a
/// same-instant interval always contains its own boundary.
pub fn is_within(begin: NaiveTime, end: NaiveTime, point: NaiveTime) -> bool {
    if begin < end {
        begin <= point && point <= end
    } else {
        point >= begin || point <= end
    }
}

pub fn offset(time: NaiveTime, minutes: i64) -> NaiveTime {
    let (shifted, _) = time.overflowing_add_signed(Duration::minutes(minutes));
    shifted
}

/// Day on which the interval containing `point` began. Only the after-midnight
/// part of a wrapping interval belongs to the previous day.
pub fn start_weekday(
    begin: NaiveTime,
    end: NaiveTime,
    point: NaiveTime,
    today: DayOfWeek,
) -> DayOfWeek {
    if begin < end || point >= begin {
        return today;
    }
    if point <= end {
        today.previous()
    } else {
        today
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn degenerate_interval_contains_its_boundary() {
        for (hour, minute) in [(0, 0), (6, 30), (23, 59)] {
            let t = hm(hour, minute);
            assert!(is_within(t, t, t));
        }
    }

    #[test]
    fn simple_interval_is_closed_on_both_ends() {
        let begin = hm(9, 0);
        let end = hm(16, 30);

        assert!(is_within(begin, end, hm(9, 0)));
        assert!(is_within(begin, end, hm(12, 15)));
        assert!(is_within(begin, end, hm(16, 30)));
        assert!(!is_within(begin, end, hm(8, 59)));
        assert!(!is_within(begin, end, hm(16, 31)));
    }

    #[test]
    fn crossing_interval_wraps_through_midnight() {
        let begin = hm(22, 0);
        let end = hm(6, 0);

        assert!(is_within(begin, end, hm(22, 0)));
        assert!(is_within(begin, end, hm(23, 59)));
        assert!(is_within(begin, end, hm(0, 0)));
        assert!(is_within(begin, end, hm(6, 0)));
        assert!(!is_within(begin, end, hm(6, 1)));
        assert!(!is_within(begin, end, hm(12, 0)));
        assert!(!is_within(begin, end, hm(21, 59)));
    }

    #[test]
    fn offset_carries_and_wraps() {
        assert_eq!(offset(hm(20, 0), -15), hm(19, 45));
        assert_eq!(offset(hm(20, 50), 15), hm(21, 5));
        assert_eq!(offset(hm(0, 5), -15), hm(23, 50));
        assert_eq!(offset(hm(23, 55), 15), hm(0, 10));
        assert_eq!(offset(hm(7, 45), 15), hm(8, 0));
    }

    #[test]
    fn crossing_rule_after_midnight_started_yesterday() {
        let begin = hm(22, 0);
        let end = hm(6, 0);

        assert_eq!(
            start_weekday(begin, end, hm(2, 0), DayOfWeek::Wed),
            DayOfWeek::Tue
        );
        assert_eq!(
            start_weekday(begin, end, hm(23, 0), DayOfWeek::Wed),
            DayOfWeek::Wed
        );
        assert_eq!(
            start_weekday(begin, end, hm(1, 0), DayOfWeek::Mon),
            DayOfWeek::Sun
        );
    }

    #[test]
    fn non_crossing_rule_always_started_today() {
        assert_eq!(
            start_weekday(hm(5, 45), hm(8, 0), hm(6, 0), DayOfWeek::Fri),
            DayOfWeek::Fri
        );
        assert_eq!(
            start_weekday(hm(7, 0), hm(7, 0), hm(7, 0), DayOfWeek::Fri),
            DayOfWeek::Fri
        );
    }
}
