use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

/// Last week of the regular season
pub const MAX_WEEK: u32 = 18;

/// Kickoff range of one NFL week: Thursday 00:00 through the next Wednesday 23:59
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub week: u32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl WeekWindow {
    pub fn contains(&self, kickoff: &NaiveDateTime) -> bool {
        *kickoff >= self.start && *kickoff <= self.end
    }
}

/// Week number for `today`: week 1 before the season starts, capped at [`MAX_WEEK`]
pub fn current_week(season_start: NaiveDate, today: NaiveDate) -> u32 {
    if today < season_start {
        return 1;
    }
    let days = (today - season_start).num_days();
    ((days / 7) as u32 + 1).min(MAX_WEEK)
}

/// Date window for `week` of the season starting on `season_start`
pub fn week_window(season_start: NaiveDate, week: u32) -> WeekWindow {
    let week = week.max(1);
    let nominal = season_start + Duration::weeks(i64::from(week) - 1);
    // Thursday of the same Monday-based week
    let thursday =
        nominal - Duration::days(i64::from(nominal.weekday().num_days_from_monday())) + Duration::days(3);
    let start = thursday.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end = start + Duration::days(6) + Duration::hours(23) + Duration::minutes(59);
    WeekWindow { week, start, end }
}

/// The window to fetch: an explicit override wins, otherwise the week containing `today`
pub fn resolve_week(season_start: NaiveDate, today: NaiveDate, override_week: Option<u32>) -> WeekWindow {
    let week = override_week.unwrap_or_else(|| current_week(season_start, today));
    week_window(season_start, week)
}
