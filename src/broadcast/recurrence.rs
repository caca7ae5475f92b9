//! Recurrence rules for broadcast campaigns.
//!
//! Rules are parsed once when a campaign is authored and again when the
//! scheduler loads a row; all calendar arithmetic works in UTC.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use serde_json::Value;

use crate::error::RecurrenceError;

/// Days scanned ahead by the weekly matcher.
const WEEKLY_SCAN_DAYS: i64 = 14;

/// Validated recurrence of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceRule {
    /// Every `interval` hours after the last execution.
    Hourly { interval: u32 },
    /// Every `interval` days at `at`.
    Daily { interval: u32, at: NaiveTime },
    /// The next listed weekday at `at`.
    Weekly { days: Vec<Weekday>, at: NaiveTime },
}

impl RecurrenceRule {
    /// Parse the stored recurrence columns of a campaign.
    pub fn parse(
        kind: &str,
        interval: Option<i32>,
        days: Option<&Value>,
        time: Option<&str>,
    ) -> Result<Self, RecurrenceError> {
        let interval = match interval {
            None => 1,
            Some(value) if value > 0 => value as u32,
            Some(value) => return Err(RecurrenceError::InvalidInterval(value)),
        };

        match kind.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(RecurrenceRule::Hourly { interval }),
            "daily" => Ok(RecurrenceRule::Daily {
                interval,
                at: parse_time_of_day(time)?,
            }),
            "weekly" => {
                let days = parse_weekdays(days)?;
                if days.is_empty() {
                    return Err(RecurrenceError::NoWeekdays);
                }
                Ok(RecurrenceRule::Weekly {
                    days,
                    at: parse_time_of_day(time)?,
                })
            }
            "" => Err(RecurrenceError::MissingType),
            other => Err(RecurrenceError::UnknownType(other.to_string())),
        }
    }

    /// Next due time after an execution at `last`.
    ///
    /// `None` means the weekly matcher found no listed weekday within two
    /// weeks of `last`.
    pub fn next_after(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RecurrenceRule::Hourly { interval } => {
                Some(last + Duration::hours(i64::from(*interval)))
            }
            RecurrenceRule::Daily { interval, at } => {
                let date = last.date_naive() + Duration::days(i64::from(*interval));
                Some(Utc.from_utc_datetime(&date.and_time(*at)))
            }
            RecurrenceRule::Weekly { days, at } => {
                let mut date = last.date_naive() + Duration::days(1);
                for _ in 0..WEEKLY_SCAN_DAYS {
                    if days.contains(&date.weekday()) {
                        return Some(Utc.from_utc_datetime(&date.and_time(*at)));
                    }
                    date += Duration::days(1);
                }
                None
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RecurrenceRule::Hourly { .. } => "hourly",
            RecurrenceRule::Daily { .. } => "daily",
            RecurrenceRule::Weekly { .. } => "weekly",
        }
    }
}

/// Stop conditions of a recurring campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndCondition {
    pub until: Option<DateTime<Utc>>,
    pub max_executions: Option<i32>,
}

impl EndCondition {
    /// Whether a campaign that has run `executions` times must stop.
    pub fn reached(&self, now: DateTime<Utc>, executions: i32) -> bool {
        if self.until.is_some_and(|until| now > until) {
            return true;
        }
        self.max_executions.is_some_and(|max| executions >= max)
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`; a missing value means midnight.
fn parse_time_of_day(raw: Option<&str>) -> Result<NaiveTime, RecurrenceError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(NaiveTime::MIN);
    };
    let parsed = NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| RecurrenceError::InvalidTime(raw.to_string()))?;
    // Seconds are dropped; due times fall on whole minutes.
    parsed
        .with_second(0)
        .ok_or_else(|| RecurrenceError::InvalidTime(raw.to_string()))
}

/// Weekdays come as a JSON array, or a string holding one.
fn parse_weekdays(raw: Option<&Value>) -> Result<Vec<Weekday>, RecurrenceError> {
    let values = match raw {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            _ => text
                .split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .collect(),
        },
        Some(other) => return Err(RecurrenceError::InvalidWeekday(other.to_string())),
    };

    let mut days = Vec::with_capacity(values.len());
    for value in values {
        let name = value
            .as_str()
            .ok_or_else(|| RecurrenceError::InvalidWeekday(value.to_string()))?;
        if name.trim().is_empty() {
            continue;
        }
        let day = parse_weekday(name)?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Ok(days)
}

fn parse_weekday(name: &str) -> Result<Weekday, RecurrenceError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        "sunday" | "sun" => Ok(Weekday::Sun),
        _ => Err(RecurrenceError::InvalidWeekday(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn daily_rule_snaps_to_time_of_day() {
        let rule = RecurrenceRule::parse("daily", Some(1), None, Some("09:00")).unwrap();
        let next = rule.next_after(at("2025-03-09T09:00:00Z")).unwrap();
        assert_eq!(next, at("2025-03-10T09:00:00Z"));

        let late = rule.next_after(at("2025-03-09T09:00:42Z")).unwrap();
        assert_eq!(late, at("2025-03-10T09:00:00Z"));
    }

    #[test]
    fn daily_rule_with_interval_and_seconds_format() {
        let rule = RecurrenceRule::parse("Daily", Some(3), None, Some("18:30:00")).unwrap();
        let next = rule.next_after(at("2025-03-09T07:15:00Z")).unwrap();
        assert_eq!(next, at("2025-03-12T18:30:00Z"));
    }

    #[test]
    fn hourly_rule_adds_interval() {
        let rule = RecurrenceRule::parse("hourly", Some(6), None, None).unwrap();
        let next = rule.next_after(at("2025-03-09T22:10:00Z")).unwrap();
        assert_eq!(next, at("2025-03-10T04:10:00Z"));
    }

    #[test]
    fn weekly_rule_finds_next_listed_day() {
        // 2025-03-10 is a Monday.
        let days = json!(["wednesday", "friday"]);
        let rule = RecurrenceRule::parse("weekly", None, Some(&days), Some("08:15")).unwrap();
        assert_eq!(
            rule.next_after(at("2025-03-10T10:00:00Z")).unwrap(),
            at("2025-03-12T08:15:00Z")
        );
        assert_eq!(
            rule.next_after(at("2025-03-12T08:15:00Z")).unwrap(),
            at("2025-03-14T08:15:00Z")
        );
    }

    #[test]
    fn weekly_rule_never_returns_same_day() {
        let days = json!(["monday"]);
        let rule = RecurrenceRule::parse("weekly", None, Some(&days), Some("09:00")).unwrap();
        assert_eq!(
            rule.next_after(at("2025-03-10T08:00:00Z")).unwrap(),
            at("2025-03-17T09:00:00Z")
        );
    }

    #[test]
    fn weekdays_stored_as_json_string() {
        let days = Value::String("[\"sunday\",\"SAT\"]".to_string());
        let rule = RecurrenceRule::parse("weekly", None, Some(&days), None).unwrap();
        assert_eq!(
            rule,
            RecurrenceRule::Weekly {
                days: vec![Weekday::Sun, Weekday::Sat],
                at: NaiveTime::MIN,
            }
        );
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert_eq!(
            RecurrenceRule::parse("monthly", None, None, None),
            Err(RecurrenceError::UnknownType("monthly".to_string()))
        );
        assert_eq!(
            RecurrenceRule::parse("daily", Some(0), None, None),
            Err(RecurrenceError::InvalidInterval(0))
        );
        assert_eq!(
            RecurrenceRule::parse("daily", None, None, Some("25:00")),
            Err(RecurrenceError::InvalidTime("25:00".to_string()))
        );
        assert_eq!(
            RecurrenceRule::parse("weekly", None, Some(&json!([])), None),
            Err(RecurrenceError::NoWeekdays)
        );
        assert_eq!(
            RecurrenceRule::parse("weekly", None, Some(&json!(["someday"])), None),
            Err(RecurrenceError::InvalidWeekday("someday".to_string()))
        );
        assert_eq!(
            RecurrenceRule::parse(" ", None, None, None),
            Err(RecurrenceError::MissingType)
        );
    }

    #[test]
    fn end_condition_by_date_and_count() {
        let now = at("2025-03-10T09:00:00Z");
        let open = EndCondition::default();
        assert!(!open.reached(now, 1_000));

        let until = EndCondition {
            until: Some(at("2025-03-09T00:00:00Z")),
            max_executions: None,
        };
        assert!(until.reached(now, 1));

        let counted = EndCondition {
            until: None,
            max_executions: Some(3),
        };
        assert!(!counted.reached(now, 2));
        assert!(counted.reached(now, 3));
    }
}
