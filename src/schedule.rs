//! Weekday eligibility for scheduled downloads

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::CourseSchedule;

/// ISO weekday number, Monday = 1 .. Sunday = 7
pub fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

/// Whether recordings are expected for `course` on `date`
pub fn is_scheduled(course: &CourseSchedule, date: NaiveDate) -> bool {
    course.weekly_quota.contains_key(&weekday_number(date))
}

/// Number of recordings expected for `course` on `date`, 0 when not scheduled
pub fn expected_count(course: &CourseSchedule, date: NaiveDate) -> usize {
    course
        .weekly_quota
        .get(&weekday_number(date))
        .copied()
        .unwrap_or(0)
}

/// `today` followed by the `days - 1` preceding dates
pub fn lookback_dates(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64)
        .map(|offset| today - Duration::days(offset))
        .collect()
}
