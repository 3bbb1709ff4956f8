use crate::error::{Error, Result};
use time::{format_description::FormatItem, macros::format_description, Date};

const ISO_DAY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse a `YYYY-MM-DD` calendar date. No timezone is involved.
pub fn parse_day(s: &str) -> Result<Date> {
    if s.len() != 10 {
        return Err(Error::validation(format!("invalid date {s:?}")));
    }
    Date::parse(s, ISO_DAY).map_err(|_| Error::validation(format!("invalid date {s:?}")))
}

pub fn format_day(d: Date) -> String {
    // the format has no fallible components
    d.format(ISO_DAY).unwrap_or_default()
}

/// Longest date range, in days, that may be materialized at once.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Fails when `[start, end]` covers more than [`MAX_RANGE_DAYS`] days.
pub fn check_span(start: Date, end: Date) -> Result<()> {
    if (end - start).whole_days() >= MAX_RANGE_DAYS {
        return Err(Error::validation(format!(
            "date range exceeds {MAX_RANGE_DAYS} days"
        )));
    }
    Ok(())
}

/// Inclusive list of `YYYY-MM-DD` strings from `start` to `end`.
/// Empty when `start` is after `end`.
pub fn days_between(start: &str, end: &str) -> Result<Vec<String>> {
    let start = parse_day(start)?;
    let end = parse_day(end)?;
    check_span(start, end)?;
    let mut out = Vec::new();
    let mut cur = start;
    while cur <= end {
        out.push(format_day(cur));
        match cur.next_day() {
            Some(next) => cur = next,
            None => break,
        }
    }
    Ok(out)
}
