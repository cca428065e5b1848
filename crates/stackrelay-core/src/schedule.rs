//! Five-field cron expressions.
//!
//! Supports `*`, `N`, `A-B`, `*/S`, `A/S`, `A-B/S` and comma lists in every
//! field, three-letter month and weekday names, and the `@hourly` family of
//! macros. Times are evaluated in UTC.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, DurationRound, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{RelayError, Result};

/// How far ahead [`Schedule::next_after`] searches before giving up.
const SEARCH_HORIZON_YEARS: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Set of allowed values for one field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Offset added to a name's index to get its value.
    name_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day of month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    name_base: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day of week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    name_base: 0,
};

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expr: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    /// Day-of-month field was unrestricted (`*`).
    dom_any: bool,
    /// Day-of-week field was unrestricted (`*`).
    dow_any: bool,
}

impl Schedule {
    /// Parses a cron expression.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidSchedule` if the expression is malformed.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| RelayError::InvalidSchedule {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        let expanded = match trimmed {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(invalid(format!("unknown macro '{other}'")));
            }
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let minutes = parse_field(fields[0], MINUTE).map_err(&invalid)?;
        let hours = parse_field(fields[1], HOUR).map_err(&invalid)?;
        let days_of_month = parse_field(fields[2], DAY_OF_MONTH).map_err(&invalid)?;
        let months = parse_field(fields[3], MONTH).map_err(&invalid)?;
        let mut days_of_week = parse_field(fields[4], DAY_OF_WEEK).map_err(&invalid)?;

        // 7 is an alias for Sunday.
        if days_of_week.contains(7) {
            days_of_week = FieldSet((days_of_week.0 | 1) & !(1u64 << 7));
        }

        Ok(Self {
            expr: expr.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_any: fields[2].starts_with('*'),
            dow_any: fields[4].starts_with('*'),
        })
    }

    /// The expression this schedule was parsed from.
    #[must_use]
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// The first fire time strictly after `from`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidSchedule` if the schedule does not fire
    /// within the next five years (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let horizon = from.year() + SEARCH_HORIZON_YEARS;
        let mut t = from
            .duration_trunc(Duration::minutes(1))
            .map_err(|e| self.never_fires(&e.to_string()))?
            + Duration::minutes(1);

        while t.year() <= horizon {
            if !self.months.contains(t.month()) {
                t = start_of_next_month(t).ok_or_else(|| self.never_fires("date overflow"))?;
                continue;
            }
            if !self.day_matches(t) {
                t = start_of_day(t) + Duration::days(1);
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = start_of_hour(t) + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Ok(t);
        }

        Err(self.never_fires(&format!(
            "no fire time within {SEARCH_HORIZON_YEARS} years"
        )))
    }

    /// Gap between the next two fire times after `from`.
    ///
    /// For evenly spaced schedules such as `*/N * * * *` this is the
    /// schedule's period.
    pub fn nominal_interval(&self, from: DateTime<Utc>) -> Result<Duration> {
        let first = self.next_after(from)?;
        let second = self.next_after(first)?;
        Ok(second - first)
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(t.day());
        let dow = self.days_of_week.contains(t.weekday().num_days_from_sunday());
        if self.dom_any || self.dow_any {
            dom && dow
        } else {
            dom || dow
        }
    }

    fn never_fires(&self, reason: &str) -> RelayError {
        RelayError::InvalidSchedule {
            expr: self.expr.clone(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn start_of_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::minutes(i64::from(t.minute()))
}

fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    start_of_hour(t) - Duration::hours(i64::from(t.hour()))
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn parse_field(raw: &str, spec: FieldSpec) -> std::result::Result<FieldSet, String> {
    let mut set = 0u64;
    for part in raw.split(',') {
        if part.is_empty() {
            return Err(format!("empty entry in {} field", spec.name));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}' in {} field", spec.name))?;
                if step == 0 || step > spec.max {
                    return Err(format!(
                        "step {step} out of range 1-{} in {} field",
                        spec.max, spec.name
                    ));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (low, high) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let value = parse_value(range, spec)?;
            // "A/S" runs from A to the end of the field.
            if step.is_some() { (value, spec.max) } else { (value, value) }
        };

        if low > high {
            return Err(format!("range {low}-{high} is reversed in {} field", spec.name));
        }

        let step = step.unwrap_or(1);
        let mut value = low;
        while value <= high {
            set |= 1u64 << value;
            value += step;
        }
    }
    Ok(FieldSet(set))
}

fn parse_value(raw: &str, spec: FieldSpec) -> std::result::Result<u32, String> {
    let lower = raw.to_ascii_lowercase();
    let value = if let Some(index) = spec.names.iter().position(|n| *n == lower) {
        index as u32 + spec.name_base
    } else {
        raw.parse::<u32>()
            .map_err(|_| format!("invalid value '{raw}' in {} field", spec.name))?
    };
    if value < spec.min || value > spec.max {
        return Err(format!(
            "value {value} out of range {}-{} in {} field",
            spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}
