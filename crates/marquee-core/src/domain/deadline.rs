//! Deadline parser: free text -> expiry instant.
//!
//! Two stages, first match wins:
//! 1. free-form phrases ("tomorrow", "in 3 days", "next friday",
//!    "March 15", "15th of March 2025", "2025-03-15"), normalized to
//!    23:59:59.999 of that day in the reference zone;
//! 2. the strict numeric pattern `M/D/Y` or `M-D-Y` (1-2 digit month and
//!    day, 2-4 digit year, two-digit years are 20YY), at 23:59:59.
//!
//! Anything else is "no deadline". Parsing never fails loudly.

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use regex::{Captures, Regex};

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

static RELATIVE_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(day\s+after\s+tomorrow|tomorrow|tmrw|today|tonight)\b")
        .expect("relative day pattern")
});

static IN_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bin\s+(\d{1,3}|an?|one|two|three|four|five|six|seven|eight|nine|ten)\s+(days?|weeks?)\b",
    )
    .expect("relative count pattern")
});

static NEXT_WEEK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bnext\s+week\b").expect("next week pattern"));

static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(next|this|on)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .expect("weekday pattern")
});

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("iso date pattern")
});

static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?"
    ))
    .expect("month day pattern")
});

static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\b\.?(?:,?\s+(\d{{4}})\b)?"
    ))
    .expect("day month pattern")
});

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[-/](\d{1,2})[-/](\d{2,4})\b").expect("numeric date pattern")
});

/// Parses deadline text relative to a reference time zone.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineParser {
    offset: FixedOffset,
}

impl DeadlineParser {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(FixedOffset::east_opt(0).expect("zero offset"))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// `now` anchors relative phrases such as "tomorrow".
    pub fn parse(&self, text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let today = now.with_timezone(&self.offset).date_naive();
        if let Some(date) = free_form_date(text, today) {
            let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?;
            return self.at(date, end_of_day);
        }

        let date = numeric_date(text)?;
        self.at(date, NaiveTime::from_hms_opt(23, 59, 59)?)
    }

    fn at(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|local| local.with_timezone(&Utc))
    }
}

impl Default for DeadlineParser {
    fn default() -> Self {
        Self::utc()
    }
}

type Resolver = fn(&Captures<'_>, NaiveDate) -> Option<NaiveDate>;

/// Earliest free-form phrase in `text` that names a real date.
fn free_form_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let rules: [(&Regex, Resolver); 7] = [
        (&*RELATIVE_DAY, relative_day as Resolver),
        (&*IN_COUNT, in_count as Resolver),
        (&*NEXT_WEEK, next_week as Resolver),
        (&*WEEKDAY, weekday as Resolver),
        (&*ISO_DATE, iso_date as Resolver),
        (&*MONTH_DAY, month_day as Resolver),
        (&*DAY_MONTH, day_month as Resolver),
    ];

    rules
        .iter()
        .filter_map(|(pattern, resolve)| {
            pattern
                .captures_iter(text)
                .find_map(|caps| Some((caps.get(0)?.start(), resolve(&caps, today)?)))
        })
        .min_by_key(|(start, _)| *start)
        .map(|(_, date)| date)
}

fn relative_day(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let word = caps[1].to_ascii_lowercase();
    let days = match word.as_str() {
        "today" | "tonight" => 0,
        "tomorrow" | "tmrw" => 1,
        _ => 2,
    };
    today.checked_add_days(Days::new(days))
}

fn next_week(_caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    today.checked_add_days(Days::new(7))
}

fn in_count(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let count = match caps[1].to_ascii_lowercase().as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        digits => digits.parse::<u64>().ok()?,
    };
    let unit = if caps[2].to_ascii_lowercase().starts_with("week") {
        7
    } else {
        1
    };
    today.checked_add_days(Days::new(count * unit))
}

/// Plain and "this"/"on" mean the upcoming day, today included.
/// "next" never means today.
fn weekday(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let target: Weekday = caps[2].parse().ok()?;
    let ahead = (7 + target.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    let next = caps
        .get(1)
        .is_some_and(|m| m.as_str().eq_ignore_ascii_case("next"));
    let ahead = if next && ahead == 0 { 7 } else { ahead };
    today.checked_add_days(Days::new(u64::from(ahead)))
}

fn iso_date(caps: &Captures<'_>, _today: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(caps[1].parse().ok()?, caps[2].parse().ok()?, caps[3].parse().ok()?)
}

fn month_day(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let month = month_number(&caps[1])?;
    let day = caps[2].parse().ok()?;
    dated(month, day, caps.get(3).map(|m| m.as_str()), today)
}

fn day_month(caps: &Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let day = caps[1].parse().ok()?;
    let month = month_number(&caps[2])?;
    dated(month, day, caps.get(3).map(|m| m.as_str()), today)
}

/// Without a year the date is the next occurrence on or after today.
fn dated(month: u32, day: u32, year: Option<&str>, today: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(year) => NaiveDate::from_ymd_opt(year.parse().ok()?, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
            match this_year {
                Some(date) if date >= today => Some(date),
                _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
            }
        }
    }
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// The first `M?D?Y` run; an impossible date is `None`, not a search for
/// the next run.
fn numeric_date(text: &str) -> Option<NaiveDate> {
    let caps = NUMERIC.captures(text)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let year_text = &caps[3];
    let year: i32 = year_text.parse().ok()?;
    let year = if year_text.len() == 2 { 2000 + year } else { year };
    NaiveDate::from_ymd_opt(year, month, day)
}
