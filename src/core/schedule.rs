//! Schedule parsing and firing-window calculation.
//!
//! Supports standard 5-field cron expressions, descriptors (@daily, @hourly,
//! etc.), and interval descriptors (@every). [`compute_schedule`] turns a
//! schedule plus a reference time into the most recent missed firing and the
//! next firing after "now".

use chrono::{DateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of firings walked before giving up on a missed-run search.
pub const MAX_MISSED_FIRINGS: usize = 100;

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,

    /// Too many firings between the reference time and now.
    #[error(
        "too many missed start times (> {limit}) between {earliest} and {now}; \
         set or decrease startingDeadlineSeconds or check clock skew"
    )]
    TooManyMissedFirings {
        limit: usize,
        earliest: DateTime<Utc>,
        now: DateTime<Utc>,
    },
}

impl ScheduleError {
    /// Whether the schedule itself is unusable, as opposed to the window
    /// being too large.
    pub fn is_invalid_schedule(&self) -> bool {
        !matches!(self, ScheduleError::TooManyMissedFirings { .. })
    }
}

/// A parsed schedule bound to a timezone.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// The timezone firings are computed in.
    timezone: Tz,
    /// Parsed schedule type.
    schedule_type: ScheduleType,
}

#[derive(Debug, Clone)]
enum ScheduleType {
    /// Standard cron schedule. Holds two schedules when both day fields are
    /// restricted, since a firing then needs only one of them to match.
    Cron(Vec<CronSchedule>),
    /// Interval-based schedule (e.g., @every 5m).
    Interval(std::time::Duration),
}

impl Schedule {
    /// Create a new schedule from a cron expression, evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Descriptors: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Create a new schedule with a specific IANA timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl AsRef<str>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone = timezone.as_ref();

        let timezone = timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;

        let schedule_type = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            schedule_type,
        })
    }

    /// Parse the expression into a schedule type.
    fn parse_expression(expression: &str) -> Result<ScheduleType, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_descriptor(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    /// Parse a descriptor expression (@daily, @every, etc.).
    fn parse_descriptor(expression: &str) -> Result<ScheduleType, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * 0"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            s if s.starts_with("@every ") => Self::parse_interval(&s[7..]),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown descriptor: {}",
                expression
            ))),
        }
    }

    /// Parse an interval expression (e.g., "5m", "1h30m").
    fn parse_interval(interval: &str) -> Result<ScheduleType, ScheduleError> {
        let duration = Self::parse_duration(interval.trim())?;
        Ok(ScheduleType::Interval(duration))
    }

    /// Parse a duration string like "5m", "1h", "1h30m", "30s".
    fn parse_duration(s: &str) -> Result<std::time::Duration, ScheduleError> {
        let mut total_secs: u64 = 0;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
            } else {
                let num: u64 = current_num
                    .parse()
                    .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
                current_num.clear();

                let unit = match c {
                    's' => 1,
                    'm' => 60,
                    'h' => 3600,
                    'd' => 86400,
                    _ => return Err(ScheduleError::InvalidInterval(s.to_string())),
                };
                total_secs = num
                    .checked_mul(unit)
                    .and_then(|secs| total_secs.checked_add(secs))
                    .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;
            }
        }

        if !current_num.is_empty() || total_secs == 0 {
            return Err(ScheduleError::InvalidInterval(s.to_string()));
        }

        Ok(std::time::Duration::from_secs(total_secs))
    }

    /// Parse a 5-field cron expression.
    fn parse_cron(expression: &str) -> Result<ScheduleType, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();

        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 fields, got {}",
                fields.len()
            )));
        }

        // The cron crate wants a leading seconds field and numbers weekdays 1-7
        // from Sunday, where standard cron uses 0-6 (or 7) from Sunday.
        let day_of_week = translate_day_of_week(fields[4])?;
        let build = |day_of_month: &str, day_of_week: &str| {
            let cron_expr = format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], day_of_month, fields[3], day_of_week
            );
            CronSchedule::from_str(&cron_expr)
                .map_err(|e| ScheduleError::InvalidCron(format!("{}: {}", expression, e)))
        };

        // The cron crate requires both day fields to match. Standard cron
        // fires when either matches if both are restricted.
        let schedules = if is_unrestricted(fields[2]) || is_unrestricted(fields[4]) {
            vec![build(fields[2], day_of_week.as_str())?]
        } else {
            vec![build(fields[2], "*")?, build("*", day_of_week.as_str())?]
        };

        Ok(ScheduleType::Cron(schedules))
    }

    /// Get the first firing strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.schedule_type {
            ScheduleType::Cron(schedules) => {
                let local_time = after.with_timezone(&self.timezone);
                schedules
                    .iter()
                    .filter_map(|schedule| schedule.after(&local_time).next())
                    .map(|dt| dt.with_timezone(&Utc))
                    .min()
                    .ok_or(ScheduleError::NoMoreOccurrences)
            }
            ScheduleType::Interval(duration) => {
                let step = chrono::Duration::from_std(*duration)
                    .map_err(|_| ScheduleError::InvalidInterval(self.expression.clone()))?;
                Ok(after.trunc_subsecs(0) + step)
            }
        }
    }

    /// Get up to `n` firings strictly after the given time.
    pub fn upcoming(
        &self,
        after: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
        let mut results = Vec::with_capacity(n);
        let mut current = after;
        for _ in 0..n {
            match self.next_after(current) {
                Ok(next) => {
                    results.push(next);
                    current = next;
                }
                Err(ScheduleError::NoMoreOccurrences) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone name.
    pub fn timezone(&self) -> &str {
        self.timezone.name()
    }
}

fn is_unrestricted(field: &str) -> bool {
    field == "*" || field == "?"
}

/// Rewrite a standard day-of-week field (0-7, Sunday = 0 or 7) into the
/// 1-7 numbering the cron crate expects. Named days pass through unchanged.
fn translate_day_of_week(field: &str) -> Result<String, ScheduleError> {
    if is_unrestricted(field) || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let invalid = || ScheduleError::InvalidCron(format!("invalid day-of-week field: {}", field));
    let parse_day = |s: &str| -> Result<u32, ScheduleError> {
        s.parse::<u32>()
            .ok()
            .filter(|d| *d <= 7)
            .ok_or_else(invalid)
    };

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step.parse::<usize>().map_err(|_| invalid())?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_day(a)?, parse_day(b)?)
        } else {
            let day = parse_day(range)?;
            (day, if step.is_some() { 6 } else { day })
        };

        if start > end || step == Some(0) {
            return Err(invalid());
        }

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7);
        }
    }

    Ok(days
        .iter()
        .map(|d| (d + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

/// Result of a firing-window calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    /// Latest firing at or before now that falls inside the window.
    pub missed: Option<DateTime<Utc>>,
    /// First firing strictly after now.
    pub next: DateTime<Utc>,
    /// True when the starting deadline excluded at least one firing and
    /// nothing inside the window is left to run.
    pub deadline_skipped: bool,
}

/// Compute the most recent missed firing and the next firing.
///
/// `earliest` is the reference time (last schedule time, or creation time).
/// With a `deadline`, firings older than `now - deadline` are never
/// candidates. Walking more than [`MAX_MISSED_FIRINGS`] firings fails with
/// [`ScheduleError::TooManyMissedFirings`].
pub fn compute_schedule(
    schedule: &Schedule,
    earliest: DateTime<Utc>,
    deadline: Option<chrono::Duration>,
    now: DateTime<Utc>,
) -> Result<ScheduleWindow, ScheduleError> {
    let mut window_start = earliest;
    if let Some(scheduling_deadline) = deadline.and_then(|d| now.checked_sub_signed(d)) {
        if scheduling_deadline > window_start {
            window_start = scheduling_deadline;
        }
    }

    if window_start > now {
        return Ok(ScheduleWindow {
            missed: None,
            next: schedule.next_after(now)?,
            deadline_skipped: false,
        });
    }

    let mut missed = None;
    let mut walked = 0usize;
    let mut next = schedule.next_after(window_start)?;
    while next <= now {
        walked += 1;
        if walked > MAX_MISSED_FIRINGS {
            return Err(ScheduleError::TooManyMissedFirings {
                limit: MAX_MISSED_FIRINGS,
                earliest: window_start,
                now,
            });
        }
        missed = Some(next);
        next = schedule.next_after(next)?;
    }

    let deadline_skipped =
        missed.is_none() && window_start > earliest && schedule.next_after(earliest)? <= window_start;

    Ok(ScheduleWindow {
        missed,
        next,
        deadline_skipped,
    })
}
