//! Parsed schedules and next-fire computation.
//!
//! A [`ScheduleSpec`] is the evaluatable form of a scheduled trigger's
//! config: intervals become durations, cron expressions are parsed once
//! by the `cron` crate and evaluated in their configured timezone.

use crate::error::ScheduleError;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use flowbot_workflow::config::{IntervalUnit, ScheduleMode};
use std::str::FromStr;

/// An evaluatable schedule.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    /// Fire every fixed duration.
    Interval { every: Duration },
    /// Fire on a cron schedule, evaluated in the timezone.
    Cron { schedule: Schedule, timezone: Tz },
    /// Fire exactly once.
    Once { at: DateTime<Utc> },
}

impl ScheduleSpec {
    /// Parses a scheduled trigger's config into an evaluatable schedule.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable cron expression or an unknown
    /// timezone name.
    pub fn from_config(mode: &ScheduleMode) -> Result<Self, ScheduleError> {
        match mode {
            ScheduleMode::Interval {
                interval_value,
                interval_unit,
            } => Ok(Self::Interval {
                every: interval_unit.duration(*interval_value),
            }),
            ScheduleMode::Cron {
                expression,
                timezone,
            } => {
                let fields = expression.split_whitespace().count();
                if fields != 5 {
                    return Err(ScheduleError::InvalidCronExpression {
                        expression: expression.clone(),
                        reason: format!("expected 5 fields, got {fields}"),
                    });
                }
                // The cron crate wants a seconds field; pin it to zero.
                let with_seconds = format!("0 {expression}");
                let schedule = Schedule::from_str(&with_seconds).map_err(|e| {
                    ScheduleError::InvalidCronExpression {
                        expression: expression.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let timezone = match timezone {
                    Some(name) => {
                        Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone {
                            timezone: name.clone(),
                        })?
                    }
                    None => Tz::UTC,
                };
                Ok(Self::Cron { schedule, timezone })
            }
            ScheduleMode::Once { at } => Ok(Self::Once { at: *at }),
        }
    }

    /// The next fire time strictly after the given instant. `None` means
    /// the schedule is exhausted.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every } => Some(after + *every),
            Self::Cron { schedule, timezone } => schedule
                .after(&after.with_timezone(timezone))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            Self::Once { at } => (*at > after).then_some(*at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn interval_adds_its_duration() {
        let spec = ScheduleSpec::from_config(&ScheduleMode::Interval {
            interval_value: 2,
            interval_unit: IntervalUnit::Hours,
        })
        .expect("parses");
        let after = at(2025, 3, 14, 9, 0);
        assert_eq!(spec.next_after(after), Some(at(2025, 3, 14, 11, 0)));
    }

    #[test]
    fn cron_fires_in_configured_timezone() {
        // 07:00 every day in New York is 11:00 or 12:00 UTC depending on
        // daylight saving; mid-January is UTC-5.
        let spec = ScheduleSpec::from_config(&ScheduleMode::Cron {
            expression: "0 7 * * *".to_string(),
            timezone: Some("America/New_York".to_string()),
        })
        .expect("parses");
        let next = spec.next_after(at(2025, 1, 15, 0, 0)).expect("has next");
        assert_eq!(next, at(2025, 1, 15, 12, 0));
    }

    #[test]
    fn cron_defaults_to_utc() {
        // 09:30 on the first of each month.
        let spec = ScheduleSpec::from_config(&ScheduleMode::Cron {
            expression: "30 9 1 * *".to_string(),
            timezone: None,
        })
        .expect("parses");
        let next = spec.next_after(at(2025, 3, 14, 0, 0)).expect("has next");
        assert_eq!(next, at(2025, 4, 1, 9, 30));
    }

    #[test]
    fn bad_cron_rejected() {
        let result = ScheduleSpec::from_config(&ScheduleMode::Cron {
            expression: "not a cron".to_string(),
            timezone: None,
        });
        assert!(matches!(
            result,
            Err(ScheduleError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn bad_timezone_rejected() {
        let result = ScheduleSpec::from_config(&ScheduleMode::Cron {
            expression: "0 7 * * *".to_string(),
            timezone: Some("Mars/Olympus_Mons".to_string()),
        });
        assert!(matches!(result, Err(ScheduleError::InvalidTimezone { .. })));
    }

    #[test]
    fn once_fires_once() {
        let fire = at(2025, 6, 1, 8, 0);
        let spec = ScheduleSpec::from_config(&ScheduleMode::Once { at: fire }).expect("parses");
        assert_eq!(spec.next_after(at(2025, 5, 31, 0, 0)), Some(fire));
        assert_eq!(spec.next_after(fire), None);
        assert_eq!(spec.next_after(at(2025, 6, 2, 0, 0)), None);
    }
}
