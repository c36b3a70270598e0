//! Recurring schedules for maintenance rules, evaluated in UTC.

use super::errors::{RuleError, RuleResult};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
}

/// When a scheduled rule fires
///
/// - `time` is `"HH:MM"` (24h, zero padded) and defaults to `00:00`; hourly
///   schedules use only the minute.
/// - `day_of_week` is 0-6 with 0 = Sunday, required for weekly schedules and
///   rejected for the others.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schedule {
    pub frequency: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
}

impl Schedule {
    /// Every hour at `minute` past
    pub fn hourly(minute: u32) -> Self {
        Self {
            frequency: Frequency::Hourly,
            time: Some(format!("00:{minute:02}")),
            day_of_week: None,
        }
    }

    pub fn daily_at(time: impl Into<String>) -> Self {
        Self {
            frequency: Frequency::Daily,
            time: Some(time.into()),
            day_of_week: None,
        }
    }

    pub fn weekly_at(day_of_week: u8, time: impl Into<String>) -> Self {
        Self {
            frequency: Frequency::Weekly,
            time: Some(time.into()),
            day_of_week: Some(day_of_week),
        }
    }

    pub fn validate(&self) -> RuleResult<()> {
        self.time_of_day()?;
        match (self.frequency, self.day_of_week) {
            (Frequency::Weekly, None) => Err(RuleError::InvalidSchedule(
                "weekly schedule requires day_of_week".to_string(),
            )),
            (Frequency::Weekly, Some(day)) if day > 6 => Err(RuleError::InvalidSchedule(format!(
                "day_of_week {day} out of range 0-6 (0 = Sunday)"
            ))),
            (Frequency::Hourly | Frequency::Daily, Some(_)) => Err(RuleError::InvalidSchedule(
                format!("day_of_week only applies to weekly schedules, not {}", self.frequency),
            )),
            _ => Ok(()),
        }
    }

    fn time_of_day(&self) -> RuleResult<(u32, u32)> {
        let Some(time) = self.time.as_deref() else {
            return Ok((0, 0));
        };

        let invalid = || RuleError::InvalidSchedule(format!("time '{time}' is not HH:MM"));
        let (hour, minute) = time.split_once(':').ok_or_else(invalid)?;
        if hour.len() != 2 || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(RuleError::InvalidSchedule(format!(
                "time '{time}' out of range 00:00-23:59"
            )));
        }
        Ok((hour, minute))
    }

    /// First fire time strictly after `after`
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> RuleResult<DateTime<Utc>> {
        self.validate()?;
        let (hour, minute) = self.time_of_day()?;
        let date = after.date_naive();

        let candidate = match self.frequency {
            Frequency::Hourly => at(date, after.hour(), minute)?,
            Frequency::Daily => at(date, hour, minute)?,
            Frequency::Weekly => {
                let target = u32::from(self.day_of_week.unwrap_or(0));
                let today = after.weekday().num_days_from_sunday();
                let ahead = (target + 7 - today) % 7;
                at(date + ChronoDuration::days(i64::from(ahead)), hour, minute)?
            }
        };

        if candidate > after {
            return Ok(candidate);
        }
        Ok(candidate + self.period())
    }

    fn period(&self) -> ChronoDuration {
        match self.frequency {
            Frequency::Hourly => ChronoDuration::hours(1),
            Frequency::Daily => ChronoDuration::days(1),
            Frequency::Weekly => ChronoDuration::weeks(1),
        }
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> RuleResult<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| RuleError::InvalidSchedule(format!("{hour:02}:{minute:02} is not a valid time")))
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_next_fire() {
        let schedule = Schedule::daily_at("02:00");
        assert_eq!(
            schedule.next_fire_after(utc(2024, 1, 1, 1, 0)).unwrap(),
            utc(2024, 1, 1, 2, 0)
        );
        // Exactly at fire time rolls to the next day
        assert_eq!(
            schedule.next_fire_after(utc(2024, 1, 1, 2, 0)).unwrap(),
            utc(2024, 1, 2, 2, 0)
        );
    }

    #[test]
    fn test_hourly_next_fire() {
        let schedule = Schedule::hourly(30);
        assert_eq!(
            schedule.next_fire_after(utc(2024, 1, 1, 10, 15)).unwrap(),
            utc(2024, 1, 1, 10, 30)
        );
        assert_eq!(
            schedule.next_fire_after(utc(2024, 1, 1, 10, 45)).unwrap(),
            utc(2024, 1, 1, 11, 30)
        );
        // Crosses midnight
        assert_eq!(
            schedule.next_fire_after(utc(2024, 1, 1, 23, 45)).unwrap(),
            utc(2024, 1, 2, 0, 30)
        );
    }

    #[test]
    fn test_weekly_next_fire() {
        // 2024-01-01 is a Monday
        let sunday = Schedule::weekly_at(0, "03:30");
        assert_eq!(
            sunday.next_fire_after(utc(2024, 1, 1, 12, 0)).unwrap(),
            utc(2024, 1, 7, 3, 30)
        );

        let monday = Schedule::weekly_at(1, "03:30");
        assert_eq!(
            monday.next_fire_after(utc(2024, 1, 1, 1, 0)).unwrap(),
            utc(2024, 1, 1, 3, 30)
        );
        assert_eq!(
            monday.next_fire_after(utc(2024, 1, 1, 4, 0)).unwrap(),
            utc(2024, 1, 8, 3, 30)
        );
    }

    #[test]
    fn test_time_defaults_to_midnight() {
        let schedule = Schedule {
            frequency: Frequency::Daily,
            time: None,
            day_of_week: None,
        };
        assert_eq!(
            schedule.next_fire_after(utc(2024, 1, 1, 12, 0)).unwrap(),
            utc(2024, 1, 2, 0, 0)
        );
    }

    #[test]
    fn test_invalid_schedules_rejected() {
        let cases = [
            Schedule::daily_at("25:00"),
            Schedule::daily_at("12:60"),
            Schedule::daily_at("2:00"),
            Schedule::daily_at("noon"),
            Schedule::weekly_at(7, "00:00"),
            Schedule {
                frequency: Frequency::Weekly,
                time: None,
                day_of_week: None,
            },
            Schedule {
                frequency: Frequency::Daily,
                time: None,
                day_of_week: Some(2),
            },
        ];
        for schedule in cases {
            assert!(
                matches!(schedule.validate(), Err(RuleError::InvalidSchedule(_))),
                "{schedule:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_shape() {
        let schedule: Schedule =
            serde_json::from_str(r#"{"frequency":"weekly","time":"06:15","day_of_week":3}"#).unwrap();
        assert_eq!(schedule, Schedule::weekly_at(3, "06:15"));
    }
}
