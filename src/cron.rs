//! Five-field cron expression parsing and next-instant computation.
//!
//! Grammar: `minute hour day-of-month month day-of-week`, each field
//! `*` | `<term>(,<term>)*` with terms `<val>`, `<val>-<val>`, `<base>/<step>`.
//! Month and weekday accept case-insensitive names (`JAN`–`DEC`,
//! `SUN`–`SAT`); weekday `7` normalizes to `0`; day-of-month may be the
//! single token `L` (last day of the month, no lists or steps).

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::CronError;

/// Candidate minutes scanned before the schedule is declared impossible
/// (four years, e.g. `0 9 30 2 *`).
const MAX_SEARCH_MINUTES: u32 = 4 * 365 * 24 * 60;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Normalized representation of a parsed expression. Field sets are sorted,
/// deduplicated and range-checked; `day_of_month` is empty exactly when
/// `last_day_of_month` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronFields {
    pub minute: Vec<u32>,
    pub hour: Vec<u32>,
    pub day_of_month: Vec<u32>,
    pub month: Vec<u32>,
    /// 0 = Sunday.
    pub day_of_week: Vec<u32>,
    pub last_day_of_month: bool,
    /// True iff the source token was anything other than `*`. Drives the
    /// day-of-month / day-of-week OR rule; a wildcard still produces the
    /// full range but stays distinguishable.
    pub dom_specified: bool,
    pub dow_specified: bool,
}

pub fn parse(expr: &str) -> Result<CronFields, CronError> {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    if tokens.len() != 5 {
        return Err(CronError::Parse {
            field: "expression",
            token: expr.trim().to_string(),
            reason: format!("expected 5 fields, got {}", tokens.len()),
        });
    }

    let minute = parse_field("minute", tokens[0], 0, 59, None)?;
    let hour = parse_field("hour", tokens[1], 0, 23, None)?;

    let (day_of_month, last_day_of_month) = if tokens[2].eq_ignore_ascii_case("L") {
        (Vec::new(), true)
    } else {
        (parse_field("day-of-month", tokens[2], 1, 31, None)?, false)
    };

    let month = parse_field("month", tokens[3], 1, 12, Some(&MONTH_NAMES))?;

    // Weekday range runs to 7 at parse time; 7 folds onto Sunday below.
    let mut day_of_week = parse_field("day-of-week", tokens[4], 0, 7, Some(&WEEKDAY_NAMES))?;
    if day_of_week.contains(&7) {
        day_of_week.retain(|&d| d != 7);
        day_of_week.push(0);
        day_of_week.sort_unstable();
        day_of_week.dedup();
    }

    Ok(CronFields {
        minute,
        hour,
        day_of_month,
        month,
        day_of_week,
        last_day_of_month,
        dom_specified: tokens[2] != "*",
        dow_specified: tokens[4] != "*",
    })
}

fn parse_field(
    field: &'static str,
    token: &str,
    min: u32,
    max: u32,
    names: Option<&[&str]>,
) -> Result<Vec<u32>, CronError> {
    let mut values = Vec::new();
    for element in token.split(',') {
        if element.is_empty() {
            return Err(err(field, token, "empty list element"));
        }
        parse_element(field, element, min, max, names, &mut values)?;
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(err(field, token, "no values"));
    }
    Ok(values)
}

fn parse_element(
    field: &'static str,
    element: &str,
    min: u32,
    max: u32,
    names: Option<&[&str]>,
    out: &mut Vec<u32>,
) -> Result<(), CronError> {
    if let Some((base, step)) = element.split_once('/') {
        if step.is_empty() {
            return Err(err(field, element, "missing step after '/'"));
        }
        let step: u32 = step
            .parse()
            .map_err(|_| err(field, element, "step is not a positive integer"))?;
        if step == 0 {
            return Err(err(field, element, "step must be greater than zero"));
        }
        let (start, end) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = split_range(base) {
            let a = resolve_value(field, a, min, max, names)?;
            let b = resolve_value(field, b, min, max, names)?;
            if a > b {
                return Err(err(field, element, "range start is greater than range end"));
            }
            (a, b)
        } else {
            // A single stepped value expands upward to the field maximum.
            (resolve_value(field, base, min, max, names)?, max)
        };
        out.extend((start..=end).step_by(step as usize));
        return Ok(());
    }

    if element == "*" {
        out.extend(min..=max);
        return Ok(());
    }

    if let Some((a, b)) = split_range(element) {
        let a = resolve_value(field, a, min, max, names)?;
        let b = resolve_value(field, b, min, max, names)?;
        if a > b {
            return Err(err(field, element, "range start is greater than range end"));
        }
        out.extend(a..=b);
        return Ok(());
    }

    out.push(resolve_value(field, element, min, max, names)?);
    Ok(())
}

/// Split `a-b` into endpoints, rejecting empty sides (`10-`, `-10`).
/// Returns `None` when there is no `-` at all.
fn split_range(s: &str) -> Option<(&str, &str)> {
    s.split_once('-')
}

fn resolve_value(
    field: &'static str,
    s: &str,
    min: u32,
    max: u32,
    names: Option<&[&str]>,
) -> Result<u32, CronError> {
    if s.is_empty() {
        return Err(err(field, s, "empty value"));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let v: u32 = s
            .parse()
            .map_err(|_| err(field, s, "value is not an integer"))?;
        if v < min || v > max {
            return Err(err(
                field,
                s,
                &format!("value out of range {min}-{max}"),
            ));
        }
        return Ok(v);
    }
    if let Some(names) = names {
        let upper = s.to_ascii_uppercase();
        if let Some(idx) = names.iter().position(|n| *n == upper) {
            // Offset by the field minimum: months are 1-based, weekdays 0-based.
            return Ok(idx as u32 + min);
        }
        return Err(err(field, s, "unknown name"));
    }
    Err(err(field, s, "expected an integer"))
}

fn err(field: &'static str, token: &str, reason: &str) -> CronError {
    CronError::Parse {
        field,
        token: token.to_string(),
        reason: reason.to_string(),
    }
}

/// Compute the first instant strictly after `from` (rounded up to a whole
/// minute) whose components match `fields` in the selected zone.
pub fn next_after(
    fields: &CronFields,
    from: DateTime<Utc>,
    utc: bool,
) -> Result<DateTime<Utc>, CronError> {
    let start_secs = (from.timestamp().div_euclid(60) + 1) * 60;
    let mut candidate = Utc
        .timestamp_opt(start_secs, 0)
        .single()
        .ok_or_else(|| CronError::SchedulingFailure("candidate timestamp out of range".into()))?;

    for _ in 0..MAX_SEARCH_MINUTES {
        let (minute, hour, day, month, weekday, is_last_dom) = components(candidate, utc);
        if fields.minute.binary_search(&minute).is_ok()
            && fields.hour.binary_search(&hour).is_ok()
            && fields.month.binary_search(&month).is_ok()
            && day_matches(fields, day, weekday, is_last_dom)
        {
            return Ok(candidate);
        }
        candidate = candidate + Duration::minutes(1);
    }

    Err(CronError::ImpossibleSchedule {
        detail: format!("no matching instant within 4 years of {from}"),
    })
}

/// Standard cron day rule: OR when both day-of-month and day-of-week were
/// written explicitly, AND otherwise (a wildcard side always matches).
fn day_matches(fields: &CronFields, day: u32, weekday: u32, is_last_dom: bool) -> bool {
    let dom_match = if fields.last_day_of_month {
        is_last_dom
    } else {
        fields.day_of_month.binary_search(&day).is_ok()
    };
    let dow_match = fields.day_of_week.binary_search(&weekday).is_ok();
    let dom_spec = fields.last_day_of_month || fields.dom_specified;
    if dom_spec && fields.dow_specified {
        dom_match || dow_match
    } else {
        dom_match && dow_match
    }
}

fn components(ts: DateTime<Utc>, utc: bool) -> (u32, u32, u32, u32, u32, bool) {
    if utc {
        (
            ts.minute(),
            ts.hour(),
            ts.day(),
            ts.month(),
            ts.weekday().num_days_from_sunday(),
            is_last_day_of_month(ts.date_naive()),
        )
    } else {
        let local = ts.with_timezone(&Local);
        (
            local.minute(),
            local.hour(),
            local.day(),
            local.month(),
            local.weekday().num_days_from_sunday(),
            is_last_day_of_month(local.date_naive()),
        )
    }
}

fn is_last_day_of_month(date: NaiveDate) -> bool {
    date.succ_opt().map_or(false, |next| next.month() != date.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // ── parsing ──────────────────────────────────────────────────────────────

    #[test]
    fn parses_wildcards() {
        let f = parse("* * * * *").unwrap();
        assert_eq!(f.minute, (0..=59).collect::<Vec<_>>());
        assert_eq!(f.hour, (0..=23).collect::<Vec<_>>());
        assert_eq!(f.day_of_month, (1..=31).collect::<Vec<_>>());
        assert_eq!(f.month, (1..=12).collect::<Vec<_>>());
        assert_eq!(f.day_of_week, (0..=6).collect::<Vec<_>>());
        assert!(!f.dom_specified);
        assert!(!f.dow_specified);
    }

    #[test]
    fn parses_lists_ranges_and_steps() {
        let f = parse("0,30 9-17 1,15 */3 1-5").unwrap();
        assert_eq!(f.minute, vec![0, 30]);
        assert_eq!(f.hour, (9..=17).collect::<Vec<_>>());
        assert_eq!(f.day_of_month, vec![1, 15]);
        assert_eq!(f.month, vec![1, 4, 7, 10]);
        assert_eq!(f.day_of_week, vec![1, 2, 3, 4, 5]);
        assert!(f.dom_specified);
        assert!(f.dow_specified);
    }

    #[test]
    fn single_value_with_step_expands_to_field_max() {
        let f = parse("10/15 * * * *").unwrap();
        assert_eq!(f.minute, vec![10, 25, 40, 55]);
    }

    #[test]
    fn range_with_step() {
        let f = parse("0 0 * * 1-5/2").unwrap();
        assert_eq!(f.day_of_week, vec![1, 3, 5]);
    }

    #[test]
    fn names_resolve_case_insensitively() {
        let f = parse("0 9 * jan,JUL mon-FRI").unwrap();
        assert_eq!(f.month, vec![1, 7]);
        assert_eq!(f.day_of_week, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn weekday_seven_normalizes_to_sunday() {
        let f = parse("0 0 * * 7").unwrap();
        assert_eq!(f.day_of_week, vec![0]);
        let f = parse("0 0 * * 0,7").unwrap();
        assert_eq!(f.day_of_week, vec![0]);
        let f = parse("0 0 * * 5-7").unwrap();
        assert_eq!(f.day_of_week, vec![0, 5, 6]);
    }

    #[test]
    fn last_day_of_month_token() {
        let f = parse("0 0 L * *").unwrap();
        assert!(f.last_day_of_month);
        assert!(f.day_of_month.is_empty());
        assert!(f.dom_specified);
        let f = parse("0 0 l * *").unwrap();
        assert!(f.last_day_of_month);
    }

    #[test]
    fn l_with_list_or_step_is_rejected() {
        assert!(parse("0 0 L,15 * *").is_err());
        assert!(parse("0 0 L/2 * *").is_err());
    }

    #[test]
    fn duplicate_values_deduplicate() {
        let f = parse("5,5,5 * * * *").unwrap();
        assert_eq!(f.minute, vec![5]);
    }

    #[test]
    fn rejects_wrong_field_count() {
        for expr in ["", "* * * *", "* * * * * *"] {
            let e = parse(expr).unwrap_err();
            assert!(e.to_string().contains("expected 5 fields"), "{expr}: {e}");
        }
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse("60 * * * *").is_err());
        assert!(parse("* 24 * * *").is_err());
        assert!(parse("* * 0 * *").is_err());
        assert!(parse("* * 32 * *").is_err());
        assert!(parse("* * * 13 *").is_err());
        assert!(parse("* * * * 8").is_err());
    }

    #[test]
    fn rejects_reversed_range() {
        let e = parse("30-10 * * * *").unwrap_err();
        assert!(e.to_string().contains("range start"), "{e}");
    }

    #[test]
    fn rejects_empty_range_endpoints() {
        assert!(parse("10- * * * *").is_err());
        assert!(parse("-10 * * * *").is_err());
    }

    #[test]
    fn rejects_malformed_steps() {
        assert!(parse("*/ * * * *").is_err());
        assert!(parse("*/abc * * * *").is_err());
        assert!(parse("*/0 * * * *").is_err());
    }

    #[test]
    fn rejects_unknown_names_and_non_integers() {
        let e = parse("0 9 * SMARCH *").unwrap_err();
        assert!(e.to_string().contains("unknown name"), "{e}");
        let e = parse("abc * * * *").unwrap_err();
        assert!(e.to_string().contains("expected an integer"), "{e}");
    }

    #[test]
    fn parse_error_names_the_field_and_token() {
        let e = parse("* * * * 9").unwrap_err();
        let msg = e.to_string();
        assert!(msg.contains("day-of-week"), "{msg}");
        assert!(msg.contains('9'), "{msg}");
    }

    #[test]
    fn parse_is_stable() {
        let a = parse("*/5 8-10 1,15 * MON").unwrap();
        let b = parse("*/5 8-10 1,15 * MON").unwrap();
        assert_eq!(a, b);
    }

    // ── next_after ───────────────────────────────────────────────────────────

    #[test]
    fn rounds_up_to_the_next_whole_minute() {
        let f = parse("* * * * *").unwrap();
        let next = next_after(&f, utc(2025, 1, 15, 10, 0, 0), true).unwrap();
        assert_eq!(next, utc(2025, 1, 15, 10, 1, 0));
        let next = next_after(&f, utc(2025, 1, 15, 10, 0, 30), true).unwrap();
        assert_eq!(next, utc(2025, 1, 15, 10, 1, 0));
    }

    #[test]
    fn weekday_hop_over_weekend() {
        // 2025-01-18 is a Saturday; the next weekday 09:00 is Monday the 20th.
        let f = parse("0 9 * * MON-FRI").unwrap();
        let next = next_after(&f, utc(2025, 1, 18, 10, 0, 0), true).unwrap();
        assert_eq!(next, utc(2025, 1, 20, 9, 0, 0));
    }

    #[test]
    fn dom_dow_or_logic_when_both_specified() {
        // Day 15 OR Monday: from Friday the 10th, Monday the 13th wins.
        let f = parse("0 9 15 * MON").unwrap();
        let next = next_after(&f, utc(2025, 1, 10, 10, 0, 0), true).unwrap();
        assert_eq!(next, utc(2025, 1, 13, 9, 0, 0));
    }

    #[test]
    fn dom_dow_and_logic_when_one_is_wildcard() {
        // Only dow specified: the AND rule with a wildcard day reduces to
        // "every Monday".
        let f = parse("0 9 * * MON").unwrap();
        let next = next_after(&f, utc(2025, 1, 10, 10, 0, 0), true).unwrap();
        assert_eq!(next, utc(2025, 1, 13, 9, 0, 0));

        // Only dom specified: the 15th regardless of weekday.
        let f = parse("0 9 15 * *").unwrap();
        let next = next_after(&f, utc(2025, 1, 10, 10, 0, 0), true).unwrap();
        assert_eq!(next, utc(2025, 1, 15, 9, 0, 0));
    }

    #[test]
    fn explicit_full_range_still_counts_as_specified() {
        // `1-31` is written out, so the OR rule applies even though the set
        // covers every day.
        let f = parse("0 9 1-31 * MON").unwrap();
        assert!(f.dom_specified);
        let next = next_after(&f, utc(2025, 1, 10, 10, 0, 0), true).unwrap();
        // Saturday the 11th matches through the day side of the OR.
        assert_eq!(next, utc(2025, 1, 11, 9, 0, 0));
    }

    #[test]
    fn last_day_of_month_across_leap_years() {
        let f = parse("0 0 L * *").unwrap();
        let cases = [
            (utc(2024, 2, 1, 0, 0, 0), utc(2024, 2, 29, 0, 0, 0)),
            (utc(2025, 2, 1, 0, 0, 0), utc(2025, 2, 28, 0, 0, 0)),
            (utc(2000, 2, 1, 0, 0, 0), utc(2000, 2, 29, 0, 0, 0)),
            (utc(1900, 2, 1, 0, 0, 0), utc(1900, 2, 28, 0, 0, 0)),
            (utc(2025, 4, 1, 0, 0, 0), utc(2025, 4, 30, 0, 0, 0)),
            (utc(2025, 1, 1, 0, 0, 0), utc(2025, 1, 31, 0, 0, 0)),
            (utc(2025, 12, 1, 0, 0, 0), utc(2025, 12, 31, 0, 0, 0)),
        ];
        for (from, want) in cases {
            assert_eq!(next_after(&f, from, true).unwrap(), want, "from {from}");
        }
    }

    #[test]
    fn last_day_rolls_into_next_month_when_passed() {
        let f = parse("0 0 L * *").unwrap();
        let next = next_after(&f, utc(2025, 1, 31, 0, 0, 0), true).unwrap();
        assert_eq!(next, utc(2025, 2, 28, 0, 0, 0));
    }

    #[test]
    fn impossible_schedule_exhausts_the_search_cap() {
        // February 30th does not exist.
        let f = parse("0 9 30 2 *").unwrap();
        let e = next_after(&f, utc(2025, 1, 1, 0, 0, 0), true).unwrap_err();
        assert!(matches!(e, CronError::ImpossibleSchedule { .. }), "{e}");
    }

    #[test]
    fn month_boundary_advance() {
        let f = parse("30 8 1 * *").unwrap();
        let next = next_after(&f, utc(2025, 1, 15, 12, 0, 0), true).unwrap();
        assert_eq!(next, utc(2025, 2, 1, 8, 30, 0));
    }

    #[test]
    fn next_is_strictly_after_from() {
        let f = parse("0 9 * * *").unwrap();
        let from = utc(2025, 1, 15, 9, 0, 0);
        let next = next_after(&f, from, true).unwrap();
        assert!(next > from);
        assert_eq!(next, utc(2025, 1, 16, 9, 0, 0));
    }

    #[test]
    fn next_after_is_pure() {
        let f = parse("*/10 * * * *").unwrap();
        let from = utc(2025, 6, 1, 11, 4, 30);
        assert_eq!(
            next_after(&f, from, true).unwrap(),
            next_after(&f, from, true).unwrap()
        );
    }
}
