//! Date-expression parsing for `d:` search arguments.
//!
//! An expression is either one point (`2004`, `feb`, `15may99`, `20040131`,
//! `2w`) or a range `exprA-exprB` where either side may be missing. Scaled
//! forms (`Nd`, `Nw`, `Nm`, `Ny`) count back from now. Month and day forms
//! without a year mean the most recent such month or day.

use chrono::{Datelike, Local, TimeZone};

use crate::error::{MairixError, Result};

/// A `(start, end)` pair of epoch timestamps; either may be absent for an
/// open-ended range.
pub type DateRange = (Option<i64>, Option<i64>);

#[derive(Debug, Clone, Copy)]
struct Ymd {
    year: i32,
    month: u32,
    day: u32,
}

fn invalid(expr: &str) -> MairixError {
    MairixError::InvalidQuery(format!("cannot parse date expression [{expr}]"))
}

fn month_number(p: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = p.to_ascii_lowercase();
    MONTHS.iter().position(|m| lower.starts_with(m)).map(|i| i as u32 + 1)
}

/// Two-digit years pivot at 70; four-digit years pass through.
fn year_fix(y: i64) -> i32 {
    if y >= 100 {
        y as i32
    } else if y < 70 {
        (y + 2000) as i32
    } else {
        (y + 1900) as i32
    }
}

fn last_day(year: i32, month: u32) -> u32 {
    const DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if month == 2 && year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) {
        29
    } else {
        DAYS[(month - 1) as usize]
    }
}

/// Local midnight-ish timestamp for a date, clamping the day to the end of
/// the month.
fn to_timestamp(d: Ymd, h: u32, min: u32, s: u32) -> i64 {
    let day = d.day.clamp(1, last_day(d.year, d.month));
    Local
        .with_ymd_and_hms(d.year, d.month, day, h, min, s)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// `day` as a shorthand for the most recent such day-of-month.
fn set_day(x: &mut Ymd, day: u32) {
    if day > x.day {
        if x.month == 1 {
            x.month = 12;
            x.year -= 1;
        } else {
            x.month -= 1;
        }
    }
    x.day = day;
}

/// Is `(month, day)` later in the year than `x`?
fn is_later_md(x: &Ymd, month: u32, day: u32) -> bool {
    x.month < month || (x.month == month && x.day < day)
}

/// Split an expression into leading digits, an optional month name, and
/// trailing digits.
fn crack(expr: &str) -> Option<(Option<i64>, Option<u32>, Option<i64>)> {
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let v1 = if i > 0 { Some(expr[..i].parse().ok()?) } else { None };

    let mut j = i;
    while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
        j += 1;
    }
    let month = if j > i {
        if j - i < 3 {
            return None;
        }
        Some(month_number(&expr[i..j])?)
    } else {
        None
    };

    let mut k = j;
    while k < bytes.len() && bytes[k].is_ascii_digit() {
        k += 1;
    }
    if k != bytes.len() {
        return None;
    }
    let v3 = if k > j { Some(expr[j..k].parse().ok()?) } else { None };
    Some((v1, month, v3))
}

/// Apply one side of a date expression to the running start/end dates.
fn scan_date_expr(expr: &str, start: Option<&mut Ymd>, end: Option<&mut Ymd>) -> Result<()> {
    // Scaled relative forms first: <n><dwmy>.
    if let Some(scale_char) = expr.chars().last() {
        if matches!(scale_char, 'd' | 'w' | 'm' | 'y') {
            let digits = &expr[..expr.len() - 1];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                let v: i64 = digits.parse().map_err(|_| invalid(expr))?;
                let seconds = match scale_char {
                    'd' => v * 86_400,
                    'w' => v * 7 * 86_400,
                    'm' => v * 30 * 86_400,
                    _ => v * 365 * 86_400,
                };
                let then = Local::now().timestamp() - seconds;
                let dt = Local
                    .timestamp_opt(then, 0)
                    .earliest()
                    .ok_or_else(|| invalid(expr))?;
                let ymd = Ymd {
                    year: dt.year(),
                    month: dt.month(),
                    day: dt.day(),
                };
                if let Some(s) = start {
                    *s = ymd;
                }
                if let Some(e) = end {
                    *e = ymd;
                }
                return Ok(());
            }
        }
    }

    let (v1, month, v3) = crack(expr).ok_or_else(|| invalid(expr))?;
    match (v1, month, v3) {
        // Pure digits: day, year, or [yy]yymmdd.
        (Some(v), None, None) => match expr.len() {
            1 | 2 => {
                if let Some(s) = start {
                    set_day(s, v as u32);
                }
                if let Some(e) = end {
                    set_day(e, v as u32);
                }
            }
            4 => {
                if let Some(s) = start {
                    *s = Ymd {
                        year: year_fix(v),
                        month: 1,
                        day: 1,
                    };
                }
                if let Some(e) = end {
                    *e = Ymd {
                        year: year_fix(v),
                        month: 12,
                        day: 31,
                    };
                }
            }
            6 | 8 => {
                let ymd = Ymd {
                    year: year_fix(v / 10_000),
                    month: ((v / 100) % 100) as u32,
                    day: (v % 100) as u32,
                };
                if ymd.month == 0 || ymd.month > 12 {
                    return Err(invalid(expr));
                }
                if let Some(s) = start {
                    *s = ymd;
                }
                if let Some(e) = end {
                    *e = ymd;
                }
            }
            _ => return Err(invalid(expr)),
        },
        // Month only: the most recent such month.
        (None, Some(m), None) => {
            if let Some(s) = start {
                if m > s.month {
                    s.year -= 1;
                }
                s.month = m;
                s.day = 1;
            }
            if let Some(e) = end {
                if m > e.month {
                    e.year -= 1;
                }
                e.month = m;
                e.day = last_day(e.year, m);
            }
        }
        // Day then month: most recent such date.
        (Some(d), Some(m), None) if d <= 31 => {
            if let Some(s) = start {
                if is_later_md(s, m, d as u32) {
                    s.year -= 1;
                }
                s.month = m;
                s.day = d as u32;
            }
            if let Some(e) = end {
                if is_later_md(e, m, d as u32) {
                    e.year -= 1;
                }
                e.month = m;
                e.day = d as u32;
            }
        }
        // Year then month.
        (Some(y), Some(m), None) => {
            let year = year_fix(y);
            if let Some(s) = start {
                *s = Ymd {
                    year,
                    month: m,
                    day: 1,
                };
            }
            if let Some(e) = end {
                *e = Ymd {
                    year,
                    month: m,
                    day: last_day(year, m),
                };
            }
        }
        // Month then day (day values), or month then year.
        (None, Some(m), Some(v)) => {
            if v <= 31 && expr.len() < 5 + 2 {
                // Treat a small trailing number as a day-of-month when it
                // cannot be a year.
                if let Some(s) = start {
                    if is_later_md(s, m, v as u32) {
                        s.year -= 1;
                    }
                    s.month = m;
                    s.day = v as u32;
                }
                if let Some(e) = end {
                    if is_later_md(e, m, v as u32) {
                        e.year -= 1;
                    }
                    e.month = m;
                    e.day = v as u32;
                }
            } else {
                let year = year_fix(v);
                if let Some(s) = start {
                    *s = Ymd {
                        year,
                        month: m,
                        day: 1,
                    };
                }
                if let Some(e) = end {
                    *e = Ymd {
                        year,
                        month: m,
                        day: last_day(year, m),
                    };
                }
            }
        }
        // Day, month, year.
        (Some(d), Some(m), Some(y)) if d <= 31 => {
            let ymd = Ymd {
                year: year_fix(y),
                month: m,
                day: d as u32,
            };
            if let Some(s) = start {
                *s = ymd;
            }
            if let Some(e) = end {
                *e = ymd;
            }
        }
        // Year, month, day.
        (Some(y), Some(m), Some(d)) => {
            let ymd = Ymd {
                year: year_fix(y),
                month: m,
                day: d as u32,
            };
            if let Some(s) = start {
                *s = ymd;
            }
            if let Some(e) = end {
                *e = ymd;
            }
        }
        _ => return Err(invalid(expr)),
    }
    Ok(())
}

/// Parse a full date argument into `(start, end)` timestamps. Either bound
/// may be absent for open-ended ranges.
pub fn scan_date_string(input: &str) -> Result<DateRange> {
    let now = Local::now();
    let today = Ymd {
        year: now.year(),
        month: now.month(),
        day: now.day(),
    };
    let mut start_d = today;
    let mut end_d = today;

    match input.split_once('-') {
        None => {
            scan_date_expr(input, Some(&mut start_d), Some(&mut end_d))?;
            Ok((
                Some(to_timestamp(start_d, 0, 0, 0)),
                Some(to_timestamp(end_d, 23, 59, 59)),
            ))
        }
        Some((left, right)) => {
            let mut start = None;
            let mut end = None;
            if !right.is_empty() {
                scan_date_expr(right, None, Some(&mut end_d))?;
                end = Some(to_timestamp(end_d, 23, 59, 59));
                // Anchor a relative start on the end date.
                start_d = end_d;
            }
            if !left.is_empty() {
                scan_date_expr(left, Some(&mut start_d), None)?;
                start = Some(to_timestamp(start_d, 0, 0, 0));
            }
            Ok((start, end))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd_of(ts: i64) -> (i32, u32, u32) {
        let dt = Local.timestamp_opt(ts, 0).unwrap();
        (dt.year(), dt.month(), dt.day())
    }

    #[test]
    fn test_plain_year() {
        let (start, end) = scan_date_string("2004").unwrap();
        assert_eq!(ymd_of(start.unwrap()), (2004, 1, 1));
        assert_eq!(ymd_of(end.unwrap()), (2004, 12, 31));
    }

    #[test]
    fn test_year_range() {
        let (start, end) = scan_date_string("2002-2003").unwrap();
        assert_eq!(ymd_of(start.unwrap()), (2002, 1, 1));
        assert_eq!(ymd_of(end.unwrap()), (2003, 12, 31));
    }

    #[test]
    fn test_open_ranges() {
        let (start, end) = scan_date_string("2004-").unwrap();
        assert!(start.is_some());
        assert!(end.is_none());

        let (start, end) = scan_date_string("-2004").unwrap();
        assert!(start.is_none());
        assert!(end.is_some());
    }

    #[test]
    fn test_yyyymmdd() {
        let (start, end) = scan_date_string("20040131").unwrap();
        assert_eq!(ymd_of(start.unwrap()), (2004, 1, 31));
        assert_eq!(ymd_of(end.unwrap()), (2004, 1, 31));
    }

    #[test]
    fn test_day_month_year_forms() {
        let (start, _) = scan_date_string("15may99").unwrap();
        assert_eq!(ymd_of(start.unwrap()), (1999, 5, 15));

        let (start, end) = scan_date_string("feb2004").unwrap();
        assert_eq!(ymd_of(start.unwrap()), (2004, 2, 1));
        assert_eq!(ymd_of(end.unwrap()), (2004, 2, 29));

        let (start, _) = scan_date_string("2004feb").unwrap();
        assert_eq!(ymd_of(start.unwrap()), (2004, 2, 1));
    }

    #[test]
    fn test_scaled_relative() {
        let (start, end) = scan_date_string("1w").unwrap();
        let expect = Local::now().timestamp() - 7 * 86_400;
        let expect_dt = Local.timestamp_opt(expect, 0).unwrap();
        assert_eq!(
            ymd_of(start.unwrap()),
            (expect_dt.year(), expect_dt.month(), expect_dt.day())
        );
        assert!(end.unwrap() >= start.unwrap());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(scan_date_string("notadate").is_err());
        assert!(scan_date_string("123").is_err());
        assert!(scan_date_string("20049999").is_err());
    }
}
