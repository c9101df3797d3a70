// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! `VEVENT`s of a calendar object, read through [`icalendar`].
//!
//! `TZID` parameters are resolved against the system time zone database;
//! `VTIMEZONE` definitions are not consulted.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use icalendar::{Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, EventLike};
use jiff::civil::{self, Date, Weekday};
use jiff::tz::TimeZone;
use jiff::{Span, Timestamp, Zoned};

const DATE_FORMAT: &str = "%Y%m%d";
const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Errors from reading iCalendar text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IcsError {
    /// The text is not an iCalendar object.
    #[error("invalid iCalendar: {0}")]
    Parse(String),

    /// A `VEVENT` has no `UID`.
    #[error("VEVENT without UID")]
    MissingUid,

    /// A `VEVENT` has no `DTSTART`.
    #[error("VEVENT {uid} without DTSTART")]
    MissingStart {
        /// Uid of the event.
        uid: String,
    },

    /// A property value could not be read.
    #[error("invalid {property} value: {value}")]
    InvalidValue {
        /// Property name.
        property: String,
        /// Offending value.
        value: String,
    },
}

/// A `DATE` or `DATE-TIME` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateOrTime {
    /// The instant, in the value's zone; UTC for dates and floating times.
    pub zoned: Zoned,
    /// Whether the value was a `DATE`.
    pub all_day: bool,
}

impl DateOrTime {
    /// The instant of the value.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.zoned.timestamp()
    }

    /// Occurrence key: `YYYYMMDD` for dates, `YYYYMMDDTHHMMSSZ` otherwise.
    #[must_use]
    pub fn occurrence_key(&self) -> String {
        if self.all_day {
            date_key(self.zoned.date())
        } else {
            utc_key(self.timestamp())
        }
    }
}

pub(crate) fn date_key(date: Date) -> String {
    format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

pub(crate) fn utc_key(ts: Timestamp) -> String {
    let dt = ts.to_zoned(TimeZone::UTC).datetime();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// `FREQ=DAILY`
    Daily,
    /// `FREQ=WEEKLY`
    Weekly,
    /// `FREQ=MONTHLY`
    Monthly,
    /// `FREQ=YEARLY`
    Yearly,
}

/// One `BYDAY` entry, e.g. `MO`, `2TU` or `-1FR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayNum {
    /// Position of the weekday within the month or year, negative from the end.
    pub ordinal: Option<i8>,
    /// The weekday.
    pub weekday: Weekday,
}

/// The supported subset of an `RRULE`.
///
/// Rules using any other part are rejected, so the event is kept as a single
/// occurrence instead of being expanded wrongly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    /// `FREQ`
    pub freq: Frequency,
    /// `INTERVAL`, at least 1.
    pub interval: u32,
    /// `COUNT`
    pub count: Option<u32>,
    /// `UNTIL`, inclusive.
    pub until: Option<DateOrTime>,
    /// `BYDAY`; ordinals only for monthly and yearly rules.
    pub by_day: Vec<WeekdayNum>,
    /// `BYMONTHDAY`, 1 to 31 or -31 to -1.
    pub by_month_day: Vec<i8>,
    /// `BYMONTH`, 1 to 12.
    pub by_month: Vec<i8>,
    /// `BYSETPOS`, applied to the dates of each interval.
    pub by_set_pos: Vec<i16>,
}

/// One `VEVENT` component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VEvent {
    /// `UID`
    pub uid: String,
    /// `DTSTART`
    pub start: DateOrTime,
    /// `DTEND`, or `DTSTART` plus `DURATION`.
    pub end: Option<DateOrTime>,
    /// `SEQUENCE`
    pub sequence: u32,
    /// `RECURRENCE-ID`, set on overrides of a series.
    pub recurrence_id: Option<DateOrTime>,
    /// `RRULE`, set on series masters.
    pub rrule: Option<RecurrenceRule>,
    /// `EXDATE`s
    pub exdates: Vec<DateOrTime>,
    /// `SUMMARY`
    pub summary: Option<String>,
}

impl VEvent {
    /// End instant, from `DTEND`, `DURATION`, or the RFC 5545 defaults.
    #[must_use]
    pub fn end_timestamp(&self) -> Timestamp {
        let start = self.start.timestamp();
        let end = match &self.end {
            Some(end) => end.timestamp(),
            None if self.start.all_day => self
                .start
                .zoned
                .checked_add(Span::new().days(1))
                .map_or(start, |end| end.timestamp()),
            None => start,
        };
        end.max(start)
    }
}

/// Reads all `VEVENT`s of an iCalendar object.
///
/// # Errors
///
/// Returns an error if the text is not iCalendar, or a `VEVENT` lacks its
/// `UID` or `DTSTART` or carries an unreadable date.
pub fn parse_events(text: &str) -> Result<Vec<VEvent>, IcsError> {
    let calendar: Calendar = text.parse().map_err(IcsError::Parse)?;
    calendar
        .components
        .iter()
        .filter_map(|component| match component {
            CalendarComponent::Event(event) => Some(read_event(event)),
            _ => None,
        })
        .collect()
}

fn read_event(event: &icalendar::Event) -> Result<VEvent, IcsError> {
    let uid = event.get_uid().ok_or(IcsError::MissingUid)?.to_string();

    let start = match event.get_start().and_then(date_or_time) {
        Some(start) => start,
        None => match event.property_value("DTSTART") {
            Some(value) => return Err(invalid("DTSTART", value)),
            None => return Err(IcsError::MissingStart { uid }),
        },
    };

    let end = match (event.get_end(), event.property_value("DURATION")) {
        (Some(end), _) => Some(date_or_time(end).ok_or_else(|| {
            invalid("DTEND", event.property_value("DTEND").unwrap_or_default())
        })?),
        (None, Some(duration)) => {
            let span: Span = duration.trim().parse().map_err(|_| invalid("DURATION", duration))?;
            let zoned = start
                .zoned
                .checked_add(span)
                .map_err(|_| invalid("DURATION", duration))?;
            Some(DateOrTime {
                zoned,
                all_day: start.all_day,
            })
        }
        (None, None) => None,
    };

    let sequence = match event.property_value("SEQUENCE") {
        Some(value) => value.trim().parse().map_err(|_| invalid("SEQUENCE", value))?,
        None => 0,
    };

    let rrule = match event.property_value("RRULE") {
        Some(value) => match parse_rrule(value) {
            Ok(rule) => Some(rule),
            Err(reason) => {
                tracing::warn!(uid, rrule = value, reason, "unsupported RRULE, keeping first occurrence");
                None
            }
        },
        None => None,
    };

    Ok(VEvent {
        recurrence_id: date_values(event, "RECURRENCE-ID")?.into_iter().next(),
        exdates: date_values(event, "EXDATE")?,
        summary: event.get_summary().map(ToString::to_string),
        uid,
        start,
        end,
        sequence,
        rrule,
    })
}

fn invalid(property: &str, value: &str) -> IcsError {
    IcsError::InvalidValue {
        property: property.to_string(),
        value: value.to_string(),
    }
}

/// Reads a comma separated date list property, honouring its `TZID`.
fn date_values(event: &icalendar::Event, name: &str) -> Result<Vec<DateOrTime>, IcsError> {
    let Some(property) = event.properties().get(name) else {
        return Ok(Vec::new());
    };
    let tzid = property.params().get("TZID").map(|param| param.value());
    property
        .value()
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| read_date(value, tzid).ok_or_else(|| invalid(name, value)))
        .collect()
}

fn read_date(value: &str, tzid: Option<&str>) -> Option<DateOrTime> {
    let value = if let Some(utc) = value.strip_suffix(['Z', 'z']) {
        let date_time = NaiveDateTime::parse_from_str(utc, DATE_TIME_FORMAT).ok()?;
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(date_time.and_utc()))
    } else if let Ok(date_time) = NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT) {
        DatePerhapsTime::DateTime(match tzid {
            Some(tzid) => CalendarDateTime::WithTimezone {
                date_time,
                tzid: tzid.to_string(),
            },
            None => CalendarDateTime::Floating(date_time),
        })
    } else {
        DatePerhapsTime::Date(NaiveDate::parse_from_str(value, DATE_FORMAT).ok()?)
    };
    date_or_time(value)
}

fn date_or_time(value: DatePerhapsTime) -> Option<DateOrTime> {
    let (date_time, tz, all_day) = match value {
        DatePerhapsTime::Date(date) => {
            let midnight = civil_date(date)?.to_datetime(civil::Time::midnight());
            (midnight, TimeZone::UTC, true)
        }
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(date_time)) => {
            (civil_date_time(date_time)?, TimeZone::UTC, false)
        }
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(date_time)) => {
            (civil_date_time(date_time.naive_utc())?, TimeZone::UTC, false)
        }
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            (civil_date_time(date_time)?, resolve_tz(&tzid), false)
        }
    };
    let zoned = date_time.to_zoned(tz).ok()?;
    Some(DateOrTime { zoned, all_day })
}

fn civil_date(date: NaiveDate) -> Option<Date> {
    let year = i16::try_from(date.year()).ok()?;
    let month = i8::try_from(date.month()).ok()?;
    let day = i8::try_from(date.day()).ok()?;
    Date::new(year, month, day).ok()
}

fn civil_date_time(date_time: NaiveDateTime) -> Option<civil::DateTime> {
    let hour = i8::try_from(date_time.hour()).ok()?;
    let minute = i8::try_from(date_time.minute()).ok()?;
    // leap seconds are folded into the last second
    let second = i8::try_from(date_time.second().min(59)).ok()?;
    let time = civil::Time::new(hour, minute, second, 0).ok()?;
    Some(civil_date(date_time.date())?.to_datetime(time))
}

fn resolve_tz(tzid: &str) -> TimeZone {
    // Some producers prefix ids, e.g. `/mozilla.org/20050126_1/Europe/Berlin`.
    let candidates = [tzid, tzid.trim_start_matches('/')];
    for candidate in candidates {
        if let Ok(tz) = TimeZone::get(candidate) {
            return tz;
        }
    }
    if let Some(tz) = tzid
        .match_indices('/')
        .filter_map(|(idx, _)| tzid.get(idx + 1..))
        .find_map(|tail| TimeZone::get(tail).ok())
    {
        return tz;
    }
    tracing::debug!(tzid, "unknown TZID, reading as UTC");
    TimeZone::UTC
}

/// Reads an `RRULE` value, refusing any part the expander cannot honour.
fn parse_rrule(value: &str) -> Result<RecurrenceRule, String> {
    let mut freq = None;
    let mut interval = 1;
    let mut count = None;
    let mut until = None;
    let mut by_day = Vec::new();
    let mut by_month_day = Vec::new();
    let mut by_month = Vec::new();
    let mut by_set_pos = Vec::new();
    let mut week_start = Weekday::Monday;
    for part in value.split(';').filter(|p| !p.trim().is_empty()) {
        let (key, val) = part
            .split_once('=')
            .ok_or_else(|| format!("malformed part {part}"))?;
        let key = key.trim().to_ascii_uppercase();
        let val = val.trim();
        match key.as_str() {
            "FREQ" => {
                freq = Some(match val.to_ascii_uppercase().as_str() {
                    "DAILY" => Frequency::Daily,
                    "WEEKLY" => Frequency::Weekly,
                    "MONTHLY" => Frequency::Monthly,
                    "YEARLY" => Frequency::Yearly,
                    other => return Err(format!("FREQ={other}")),
                });
            }
            "INTERVAL" => {
                interval = val.parse().map_err(|_| format!("INTERVAL={val}"))?;
                if interval == 0 {
                    return Err("INTERVAL=0".to_string());
                }
            }
            "COUNT" => count = Some(val.parse().map_err(|_| format!("COUNT={val}"))?),
            "UNTIL" => until = Some(read_date(val, None).ok_or_else(|| format!("UNTIL={val}"))?),
            "WKST" => week_start = parse_weekday(val).ok_or_else(|| format!("WKST={val}"))?,
            "BYDAY" => {
                for day in val.split(',') {
                    by_day.push(parse_weekday_num(day.trim()).ok_or_else(|| format!("BYDAY={val}"))?);
                }
            }
            "BYMONTHDAY" => by_month_day = parse_list(val, 31).ok_or_else(|| format!("BYMONTHDAY={val}"))?,
            "BYMONTH" => {
                by_month = parse_list(val, 12)
                    .filter(|months| months.iter().all(|m| *m > 0))
                    .ok_or_else(|| format!("BYMONTH={val}"))?;
            }
            "BYSETPOS" => by_set_pos = parse_list(val, 366).ok_or_else(|| format!("BYSETPOS={val}"))?,
            other => return Err(format!("{other} is not supported")),
        }
    }

    let freq = freq.ok_or_else(|| "missing FREQ".to_string())?;
    let has_ordinal = by_day.iter().any(|day| day.ordinal.is_some());
    if has_ordinal && matches!(freq, Frequency::Daily | Frequency::Weekly) {
        return Err("BYDAY ordinals need a monthly or yearly rule".to_string());
    }
    if !by_month_day.is_empty() && freq == Frequency::Weekly {
        return Err("BYMONTHDAY with a weekly rule".to_string());
    }
    if week_start != Weekday::Monday && freq == Frequency::Weekly && interval > 1 && !by_day.is_empty() {
        return Err("WKST other than MO".to_string());
    }

    Ok(RecurrenceRule {
        freq,
        interval,
        count,
        until,
        by_day,
        by_month_day: by_month_day.into_iter().filter_map(|d| i8::try_from(d).ok()).collect(),
        by_month: by_month.into_iter().filter_map(|m| i8::try_from(m).ok()).collect(),
        by_set_pos,
    })
}

/// Parses a list of non-zero integers within `-max..=max`.
fn parse_list(value: &str, max: u16) -> Option<Vec<i16>> {
    value
        .split(',')
        .map(|item| {
            let n: i16 = item.trim().trim_start_matches('+').parse().ok()?;
            (1..=max).contains(&n.unsigned_abs()).then_some(n)
        })
        .collect()
}

fn parse_weekday_num(value: &str) -> Option<WeekdayNum> {
    let split = value.len().checked_sub(2)?;
    let (ordinal, code) = (value.get(..split)?, value.get(split..)?);
    let ordinal = match ordinal {
        "" => None,
        ordinal => {
            let n: i8 = ordinal.trim_start_matches('+').parse().ok()?;
            if n == 0 || n.unsigned_abs() > 53 {
                return None;
            }
            Some(n)
        }
    };
    Some(WeekdayNum {
        ordinal,
        weekday: parse_weekday(code)?,
    })
}

fn parse_weekday(code: &str) -> Option<Weekday> {
    Some(match code.to_ascii_uppercase().as_str() {
        "MO" => Weekday::Monday,
        "TU" => Weekday::Tuesday,
        "WE" => Weekday::Wednesday,
        "TH" => Weekday::Thursday,
        "FR" => Weekday::Friday,
        "SA" => Weekday::Saturday,
        "SU" => Weekday::Sunday,
        _ => return None,
    })
}
