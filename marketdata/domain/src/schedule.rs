use chrono::{DateTime, Datelike, Days, Duration, NaiveTime, TimeZone, Timelike, Utc};
use std::str::FromStr;

/// Parsed six-field cron expression
/// (`sec min hour day-of-month month day-of-week`).
///
/// Supports `*`, `?` (day fields), lists, ranges, `*/n` and `a-b/n`
/// steps, and three-letter month/weekday names. Finding the next fire
/// time is a pure function of the expression and a reference instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_unrestricted: bool,
    dow_unrestricted: bool,
}

/// Bitmask over the allowed values of one cron field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && (self.0 >> value) & 1 == 1
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const SECONDS: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[] };
const MINUTES: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOURS: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAYS_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTHS: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
};
const DAYS_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 6,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
};

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        expression.parse()
    }

    /// First instant strictly after `after` at which the expression
    /// matches, or `None` if no match exists within the search horizon
    /// (an unsatisfiable expression such as `0 0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_nanosecond(0)? + Duration::seconds(1);
        let start_date = start.date_naive();

        // Four years covers every month/weekday/leap-day combination.
        for offset in 0..=(4 * 366) {
            let date = start_date.checked_add_days(Days::new(offset))?;
            if !self.day_matches(date.month(), date.day(), date.weekday().num_days_from_sunday()) {
                continue;
            }
            let floor = (offset == 0).then(|| start.time());
            if let Some(time) = self.next_time_of_day(floor) {
                return Some(Utc.from_utc_datetime(&date.and_time(time)));
            }
        }

        None
    }

    fn day_matches(&self, month: u32, day_of_month: u32, day_of_week: u32) -> bool {
        if !self.months.contains(month) {
            return false;
        }
        // Standard cron rule: with both day fields restricted, a day
        // matches when either field matches.
        match (self.dom_unrestricted, self.dow_unrestricted) {
            (true, true) => true,
            (false, true) => self.days_of_month.contains(day_of_month),
            (true, false) => self.days_of_week.contains(day_of_week),
            (false, false) => {
                self.days_of_month.contains(day_of_month)
                    || self.days_of_week.contains(day_of_week)
            }
        }
    }

    fn next_time_of_day(&self, floor: Option<NaiveTime>) -> Option<NaiveTime> {
        let (h0, m0, s0) = match floor {
            Some(t) => (t.hour(), t.minute(), t.second()),
            None => (0, 0, 0),
        };

        for h in h0..24 {
            if !self.hours.contains(h) {
                continue;
            }
            let minute_floor = if h == h0 { m0 } else { 0 };
            for m in minute_floor..60 {
                if !self.minutes.contains(m) {
                    continue;
                }
                let second_floor = if h == h0 && m == m0 { s0 } else { 0 };
                for s in second_floor..60 {
                    if self.seconds.contains(s) {
                        return NaiveTime::from_hms_opt(h, m, s);
                    }
                }
            }
        }

        None
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(ScheduleError::WrongFieldCount(fields.len()));
        }

        Ok(Schedule {
            seconds: parse_field(fields[0], &SECONDS)?,
            minutes: parse_field(fields[1], &MINUTES)?,
            hours: parse_field(fields[2], &HOURS)?,
            days_of_month: parse_field(fields[3], &DAYS_OF_MONTH)?,
            months: parse_field(fields[4], &MONTHS)?,
            days_of_week: parse_field(fields[5], &DAYS_OF_WEEK)?,
            dom_unrestricted: is_unrestricted(fields[3]),
            dow_unrestricted: is_unrestricted(fields[5]),
        })
    }
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<FieldSet, ScheduleError> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| ScheduleError::InvalidValue {
                    field: spec.name,
                    value: part.to_string(),
                })?;
                if step == 0 {
                    return Err(ScheduleError::InvalidValue {
                        field: spec.name,
                        value: part.to_string(),
                    });
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if is_unrestricted(range_part) {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range_part.split_once('-') {
            (parse_value(lo, spec)?, parse_value(hi, spec)?)
        } else {
            let value = parse_value(range_part, spec)?;
            // A bare value with a step ("8/2") ranges to the field max.
            if step > 1 {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        if start > end {
            return Err(ScheduleError::InvalidValue {
                field: spec.name,
                value: part.to_string(),
            });
        }

        let mut value = start;
        while value <= end {
            mask |= 1 << value;
            value += step;
        }
    }

    Ok(FieldSet(mask))
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, ScheduleError> {
    let value = if let Some(index) = spec
        .names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
    {
        index as u32 + spec.min
    } else {
        token.parse().map_err(|_| ScheduleError::InvalidValue {
            field: spec.name,
            value: token.to_string(),
        })?
    };

    // Cron allows 7 as an alias for Sunday.
    if spec.name == "day-of-week" && value == 7 {
        return Ok(0);
    }

    if value < spec.min || value > spec.max {
        return Err(ScheduleError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }

    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Cron expression must have 6 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("Invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} value {value} outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}
