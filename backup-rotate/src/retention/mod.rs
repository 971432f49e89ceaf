//! Retention periods and the planner deciding which of them run on a date.

pub mod generation;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::{RetentionConfig, ScheduleConfig};

pub use generation::Generation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Period {
    /// Every period, in execution order.
    pub const ALL: [Period; 4] = [Period::Daily, Period::Weekly, Period::Monthly, Period::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            "yearly" => Ok(Period::Yearly),
            _ => Err(()),
        }
    }
}

/// Decide which periods run on `date`.
///
/// The result is ordered daily, weekly, monthly, yearly so that later
/// periods can hard-link against the fresh daily generation. Periods with
/// a retention of zero never run.
pub fn plan_for_date(
    date: NaiveDate,
    retention: &RetentionConfig,
    schedule: &ScheduleConfig,
) -> Vec<Period> {
    Period::ALL
        .into_iter()
        .filter(|period| retention.keep(*period) > 0)
        .filter(|period| is_due(*period, date, schedule))
        .collect()
}

/// Restrict explicitly requested periods to the enabled ones, in execution order.
pub fn plan_forced(requested: &[Period], retention: &RetentionConfig) -> Vec<Period> {
    Period::ALL
        .into_iter()
        .filter(|period| requested.contains(period))
        .filter(|period| retention.keep(*period) > 0)
        .collect()
}

fn is_due(period: Period, date: NaiveDate, schedule: &ScheduleConfig) -> bool {
    match period {
        Period::Daily => true,
        Period::Weekly => date.weekday() == schedule.weekday,
        Period::Monthly => is_monthly_day(date, schedule.month_day),
        Period::Yearly => date.month() == schedule.year_month && is_monthly_day(date, schedule.month_day),
    }
}

/// Configured day of month, clamped so short months still get a backup.
fn is_monthly_day(date: NaiveDate, month_day: u32) -> bool {
    date.day() == month_day.min(days_in_month(date))
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn all_enabled() -> RetentionConfig {
        RetentionConfig {
            daily: 7,
            weekly: 4,
            monthly: 12,
            yearly: 2,
        }
    }

    #[test]
    fn test_ordinary_day_is_daily_only() {
        // 2026-10-14 is a Wednesday
        let periods = plan_for_date(date(2026, 10, 14), &all_enabled(), &ScheduleConfig::default());
        assert_eq!(periods, vec![Period::Daily]);
    }

    #[test]
    fn test_weekly_on_configured_weekday() {
        // 2026-10-18 is a Sunday
        let periods = plan_for_date(date(2026, 10, 18), &all_enabled(), &ScheduleConfig::default());
        assert_eq!(periods, vec![Period::Daily, Period::Weekly]);

        let schedule = ScheduleConfig {
            weekday: Weekday::Wed,
            ..ScheduleConfig::default()
        };
        let periods = plan_for_date(date(2026, 10, 14), &all_enabled(), &schedule);
        assert_eq!(periods, vec![Period::Daily, Period::Weekly]);
    }

    #[test]
    fn test_new_year_runs_everything_in_order() {
        // 2023-01-01 is a Sunday
        let periods = plan_for_date(date(2023, 1, 1), &all_enabled(), &ScheduleConfig::default());
        assert_eq!(
            periods,
            vec![Period::Daily, Period::Weekly, Period::Monthly, Period::Yearly]
        );
    }

    #[test]
    fn test_disabled_periods_never_run() {
        let retention = RetentionConfig {
            daily: 0,
            weekly: 4,
            monthly: 0,
            yearly: 0,
        };
        let periods = plan_for_date(date(2023, 1, 1), &retention, &ScheduleConfig::default());
        assert_eq!(periods, vec![Period::Weekly]);
    }

    #[test]
    fn test_month_day_clamped_to_short_month() {
        let schedule = ScheduleConfig {
            month_day: 31,
            ..ScheduleConfig::default()
        };
        let retention = all_enabled();

        assert!(plan_for_date(date(2026, 2, 28), &retention, &schedule).contains(&Period::Monthly));
        assert!(plan_for_date(date(2028, 2, 29), &retention, &schedule).contains(&Period::Monthly));
        assert!(!plan_for_date(date(2028, 2, 28), &retention, &schedule).contains(&Period::Monthly));
        assert!(plan_for_date(date(2026, 4, 30), &retention, &schedule).contains(&Period::Monthly));
        assert!(plan_for_date(date(2026, 12, 31), &retention, &schedule).contains(&Period::Monthly));
    }

    #[test]
    fn test_yearly_needs_month_and_day() {
        let schedule = ScheduleConfig {
            weekday: Weekday::Sun,
            month_day: 15,
            year_month: 6,
        };
        let retention = all_enabled();

        let june = plan_for_date(date(2026, 6, 15), &retention, &schedule);
        assert!(june.contains(&Period::Monthly));
        assert!(june.contains(&Period::Yearly));

        let july = plan_for_date(date(2026, 7, 15), &retention, &schedule);
        assert!(july.contains(&Period::Monthly));
        assert!(!july.contains(&Period::Yearly));
    }

    #[test]
    fn test_plan_forced_orders_and_filters() {
        let retention = RetentionConfig {
            daily: 7,
            weekly: 4,
            monthly: 12,
            yearly: 0,
        };
        let periods = plan_forced(&[Period::Yearly, Period::Monthly, Period::Daily], &retention);
        assert_eq!(periods, vec![Period::Daily, Period::Monthly]);
    }

    #[test]
    fn test_period_parse_and_display() {
        for period in Period::ALL {
            assert_eq!(period.to_string().parse::<Period>(), Ok(period));
        }
        assert!("hourly".parse::<Period>().is_err());
    }
}
