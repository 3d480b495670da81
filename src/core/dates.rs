//! Natural-language date resolution.
//!
//! Shared by the planner and the agent router so "plan tomorrow" and a
//! planner invocation for "tomorrow" land on the same day. Resolution is
//! deterministic given `today`.

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Weekday};

/// Resolves a date expression against `today`.
///
/// Recognized forms, in order:
/// - ISO `YYYY-MM-DD`
/// - US `MM/DD/YYYY`
/// - `today`, `tomorrow`, `yesterday`
/// - `this <weekday>` (next occurrence, today counts), `next <weekday>`
///   (strictly after today, at least a week out when today is that day)
/// - `next week` (next Monday)
/// - `in N days`
///
/// An empty expression defaults to `today`. Returns `None` for anything
/// unrecognized.
#[must_use]
pub fn resolve_date(expr: &str, today: NaiveDate) -> Option<NaiveDate> {
    let expr = expr.trim().to_lowercase();
    if expr.is_empty() {
        return Some(today);
    }

    if let Ok(date) = NaiveDate::parse_from_str(&expr, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&expr, "%m/%d/%Y") {
        return Some(date);
    }

    match expr.as_str() {
        "today" => return Some(today),
        "tomorrow" => return today.checked_add_days(Days::new(1)),
        "yesterday" => return today.checked_sub_days(Days::new(1)),
        "next week" => return Some(next_weekday(today, Weekday::Mon)),
        _ => {}
    }

    // A bare weekday means its next occurrence, today included
    if let Some(weekday) = parse_weekday(&expr) {
        return Some(this_weekday(today, weekday));
    }

    if let Some(rest) = expr.strip_prefix("this ") {
        let weekday = parse_weekday(rest)?;
        return Some(this_weekday(today, weekday));
    }
    if let Some(rest) = expr.strip_prefix("next ") {
        let weekday = parse_weekday(rest)?;
        return Some(next_weekday(today, weekday));
    }
    if let Some(rest) = expr.strip_prefix("in ") {
        let rest = rest.strip_suffix(" days").or_else(|| rest.strip_suffix(" day"))?;
        let n: u64 = rest.trim().parse().ok()?;
        return today.checked_add_days(Days::new(n));
    }

    None
}

/// Scans free text for the first resolvable date expression.
///
/// Tries multi-word forms (`next monday`, `in 3 days`, ISO dates) before
/// single tokens, so "plan for next friday afternoon" resolves to the
/// coming Friday rather than failing on "plan".
#[must_use]
pub fn extract_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '/'))
        .collect();

    for window in [3, 2, 1] {
        if tokens.len() < window {
            continue;
        }
        for start in 0..=(tokens.len() - window) {
            let candidate = tokens[start..start + window].join(" ");
            // Bare "today" is meaningful; a bare empty token is not.
            if candidate.trim().is_empty() {
                continue;
            }
            if let Some(date) = resolve_date(&candidate, today) {
                return Some(date);
            }
        }
    }
    None
}

/// Parses an `HH:MM` time-of-day string.
#[must_use]
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Next occurrence of `weekday`, counting today.
fn this_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let today_num = today.weekday().num_days_from_monday();
    let target_num = weekday.num_days_from_monday();
    let delta = (7 + target_num - today_num) % 7;
    today + Days::new(u64::from(delta))
}

/// Next occurrence of `weekday` strictly after today.
fn next_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let today_num = today.weekday().num_days_from_monday();
    let target_num = weekday.num_days_from_monday();
    let mut delta = (7 + target_num - today_num) % 7;
    if delta == 0 {
        delta = 7;
    }
    today + Days::new(u64::from(delta))
}

/// Parses a weekday name (full or three-letter).
fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.trim() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}
