//! Protocol cadence
//!
//! Protocol periods are cron expressions. Classic five-field crontab lines
//! ("0 2 * * 1") are accepted alongside the six/seven-field form with
//! seconds. Crontab numbers weekdays 0-7 from Sunday while the six-field
//! form numbers them 1-7, so numeric weekdays of a five-field line are
//! rewritten to day names before parsing.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Schedule window {0:?} is out of range")]
    WindowOutOfRange(Duration),
}

pub fn parse(expression: &str) -> Result<Schedule, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason,
    };

    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalised = if fields.len() == 5 {
        let weekdays = crontab_weekdays(fields[4]).map_err(invalid)?;
        format!("0 {} {}", fields[..4].join(" "), weekdays)
    } else {
        fields.join(" ")
    };

    Schedule::from_str(&normalised).map_err(|e| invalid(e.to_string()))
}

/// Rewrites a crontab day-of-week field (0 or 7 = Sunday) with day names.
/// Named items and `*`/`?` pass through unchanged.
fn crontab_weekdays(field: &str) -> Result<String, String> {
    field
        .split(',')
        .map(crontab_weekday_item)
        .collect::<Result<Vec<_>, _>>()
        .map(|items| items.join(","))
}

fn crontab_weekday_item(item: &str) -> Result<String, String> {
    if item == "*" || item == "?" || item.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(item.to_string());
    }

    let day = |value: &str| -> Result<usize, String> {
        match value.parse::<usize>() {
            Ok(n) if n <= 7 => Ok(n),
            _ => Err(format!("invalid day of week '{}'", value)),
        }
    };

    let (range, step) = match item.split_once('/') {
        Some((range, step)) => match step.parse::<usize>() {
            Ok(n) if n > 0 => (range, Some(n)),
            _ => return Err(format!("invalid step in '{}'", item)),
        },
        None => (item, None),
    };

    let (start, end) = match range.split_once('-') {
        _ if range == "*" => (0, 6),
        Some((start, end)) => (day(start)?, day(end)?),
        None if step.is_some() => (day(range)?, 6),
        None => (day(range)?, day(range)?),
    };
    if start > end {
        return Err(format!("invalid day of week range '{}'", range));
    }

    let days: BTreeSet<usize> = (start..=end)
        .step_by(step.unwrap_or(1))
        .map(|n| n % 7)
        .collect();

    Ok(days
        .into_iter()
        .map(|n| WEEKDAYS[n])
        .collect::<Vec<_>>()
        .join(","))
}

/// Whether a run at `now` falls on the cadence of `period`.
///
/// No period means always due. Otherwise the schedule must fire inside
/// `(now - window, now]`, `window` being how often the scheduler invokes
/// the stage.
pub fn is_due(
    period: Option<&str>,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<bool, ScheduleError> {
    let Some(expression) = period.filter(|p| !p.trim().is_empty()) else {
        return Ok(true);
    };

    let schedule = parse(expression)?;
    let window_delta =
        chrono::Duration::from_std(window).map_err(|_| ScheduleError::WindowOutOfRange(window))?;
    let window_start = now
        .checked_sub_signed(window_delta)
        .ok_or(ScheduleError::WindowOutOfRange(window))?;

    Ok(schedule
        .after(&window_start)
        .next()
        .is_some_and(|occurrence| occurrence <= now))
}
