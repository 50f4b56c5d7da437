//! Interval and daily schedule arithmetic, and the dispatch from a
//! [`Schedule`] value to the matching computation.
//!
//! All wall-clock manipulation happens in the selected zone (UTC or local),
//! which is what decides where "midnight" and boundary multiples fall. Local
//! mode is exposed for operator convenience; around DST transitions a day can
//! be 23 or 25 hours long, so production deployments should prefer
//! `utc: true`.

use chrono::{
    DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};

use crate::config::{IntervalUnit, Schedule};
use crate::cron;
use crate::error::CronError;

impl Schedule {
    /// Compute the next firing instant strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>, utc: bool) -> Result<DateTime<Utc>, CronError> {
        match self {
            Schedule::Interval {
                every,
                unit,
                aligned,
            } => next_interval(*every, *unit, *aligned, from, utc),
            Schedule::Daily { at } => next_daily(at, from, utc),
            Schedule::Cron { expr } => {
                let fields = cron::parse(expr)?;
                cron::next_after(&fields, from, utc)
            }
        }
    }
}

pub fn next_interval(
    every: u32,
    unit: IntervalUnit,
    aligned: bool,
    from: DateTime<Utc>,
    utc: bool,
) -> Result<DateTime<Utc>, CronError> {
    if every == 0 {
        return Err(CronError::InvalidSchedule {
            reason: "interval `every` must be at least 1".to_string(),
        });
    }
    if !aligned {
        // Drift mode: exact offset from the scheduling instant, sub-minute
        // precision preserved.
        let step = match unit {
            IntervalUnit::Seconds => Duration::seconds(every as i64),
            IntervalUnit::Minutes => Duration::minutes(every as i64),
            IntervalUnit::Hours => Duration::hours(every as i64),
            IntervalUnit::Days => Duration::days(every as i64),
        };
        return Ok(from + step);
    }
    if utc {
        aligned_next(every, unit, &from)
    } else {
        aligned_next(every, unit, &from.with_timezone(&Local)).map(|t| t.with_timezone(&Utc))
    }
}

/// Aligned mode: snap to the next boundary multiple of the unit in the
/// zone of `from`. Carries follow plain wall-clock arithmetic, so a minute
/// step of 45 from :50 lands on :30 of the next hour (90 mod 60).
fn aligned_next<Tz: TimeZone>(
    every: u32,
    unit: IntervalUnit,
    from: &DateTime<Tz>,
) -> Result<DateTime<Tz>, CronError> {
    let tz = from.timezone();
    let wall = from.naive_local();
    let date = wall.date();

    let target: NaiveDateTime = match unit {
        IntervalUnit::Seconds => {
            let next_s = (wall.second() / every + 1) * every;
            hms(date, wall.hour(), wall.minute(), 0)? + Duration::seconds(next_s as i64)
        }
        IntervalUnit::Minutes => {
            let next_m = (wall.minute() / every + 1) * every;
            hms(date, wall.hour(), 0, 0)? + Duration::minutes(next_m as i64)
        }
        IntervalUnit::Hours => {
            let next_h = (wall.hour() / every + 1) * every;
            hms(date, 0, 0, 0)? + Duration::hours(next_h as i64)
        }
        IntervalUnit::Days => hms(date, 0, 0, 0)? + Duration::days(every as i64),
    };

    resolve_in_zone(&tz, target)
}

pub fn next_daily(at: &str, from: DateTime<Utc>, utc: bool) -> Result<DateTime<Utc>, CronError> {
    let (hour, minute) = parse_daily_at(at)?;
    if utc {
        daily_in_zone(hour, minute, &from)
    } else {
        daily_in_zone(hour, minute, &from.with_timezone(&Local)).map(|t| t.with_timezone(&Utc))
    }
}

fn daily_in_zone<Tz: TimeZone>(
    hour: u32,
    minute: u32,
    from: &DateTime<Tz>,
) -> Result<DateTime<Tz>, CronError> {
    let tz = from.timezone();
    let today = from.naive_local().date();
    let candidate = resolve_in_zone(&tz, hms(today, hour, minute, 0)?)?;
    if candidate > *from {
        return Ok(candidate);
    }
    let tomorrow = today
        .succ_opt()
        .ok_or_else(|| CronError::SchedulingFailure("date out of range".to_string()))?;
    resolve_in_zone(&tz, hms(tomorrow, hour, minute, 0)?)
}

/// Validate and split an `"H:MM"` / `"HH:MM"` time-of-day string.
pub fn parse_daily_at(at: &str) -> Result<(u32, u32), CronError> {
    let err = |reason: &str| CronError::Parse {
        field: "at",
        token: at.to_string(),
        reason: reason.to_string(),
    };
    let (h, m) = at.split_once(':').ok_or_else(|| err("expected H:MM"))?;
    if h.is_empty() || h.len() > 2 || !h.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err("hour must be 1-2 digits"));
    }
    if m.len() != 2 || !m.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err("minute must be 2 digits"));
    }
    let hour: u32 = h.parse().map_err(|_| err("hour is not an integer"))?;
    let minute: u32 = m.parse().map_err(|_| err("minute is not an integer"))?;
    if hour > 23 {
        return Err(err("hour out of range 0-23"));
    }
    if minute > 59 {
        return Err(err("minute out of range 0-59"));
    }
    Ok((hour, minute))
}

fn hms(date: NaiveDate, h: u32, m: u32, s: u32) -> Result<NaiveDateTime, CronError> {
    date.and_hms_opt(h, m, s).ok_or_else(|| {
        CronError::SchedulingFailure(format!("invalid wall-clock time {h:02}:{m:02}:{s:02}"))
    })
}

/// Map a wall-clock time back into the zone. Ambiguous times (fall back)
/// resolve to the earlier offset; nonexistent times (spring forward) shift
/// forward an hour at a time until they land on a valid instant.
fn resolve_in_zone<Tz: TimeZone>(
    tz: &Tz,
    wall: NaiveDateTime,
) -> Result<DateTime<Tz>, CronError> {
    for shift in 0..=3 {
        let candidate = wall + Duration::hours(shift);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(t) => return Ok(t),
            LocalResult::Ambiguous(earlier, _) => return Ok(earlier),
            LocalResult::None => continue,
        }
    }
    Err(CronError::SchedulingFailure(format!(
        "wall-clock time {wall} does not exist in the target zone"
    )))
}
