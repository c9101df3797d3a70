// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};

use jiff::civil::Date;
use jiff::{Span, Timestamp};

use crate::ics::{DateOrTime, Frequency, IcsError, RecurrenceRule, VEvent, WeekdayNum, parse_events};
use crate::model::{CalendarEvent, CalendarId, DateWindow};

/// Upper bound of generated recurrence candidates per series.
const MAX_CANDIDATES: usize = 50_000;

/// Turns one calendar object into concrete events.
///
/// Single events are returned as they are, whatever the window. A series
/// master yields one event per occurrence overlapping `window`, with
/// `EXDATE`s removed and `RECURRENCE-ID` overrides in place of the generated
/// occurrence.
///
/// # Errors
///
/// Returns an error if the object cannot be read.
pub fn expand_object(
    text: &str,
    calendar_id: &CalendarId,
    window: &DateWindow,
) -> Result<Vec<CalendarEvent>, IcsError> {
    let mut groups: Vec<(String, Option<VEvent>, Vec<VEvent>)> = Vec::new();
    for event in parse_events(text)? {
        let idx = match groups.iter().position(|(uid, _, _)| *uid == event.uid) {
            Some(idx) => idx,
            None => {
                groups.push((event.uid.clone(), None, Vec::new()));
                groups.len() - 1
            }
        };
        let Some((_, master, overrides)) = groups.get_mut(idx) else {
            continue;
        };
        if event.recurrence_id.is_some() {
            overrides.push(event);
        } else if master.is_none() {
            *master = Some(event);
        } else {
            tracing::debug!(uid = event.uid, "duplicate VEVENT ignored");
        }
    }

    let mut events = Vec::new();
    for (_, master, overrides) in groups {
        match master {
            Some(master) if master.rrule.is_some() => {
                expand_series(&master, overrides, calendar_id, window, &mut events);
            }
            Some(master) => {
                events.push(single(&master, calendar_id));
                events.extend(overrides.iter().map(|o| instance_override(o, calendar_id)));
            }
            None => events.extend(overrides.iter().map(|o| instance_override(o, calendar_id))),
        }
    }
    Ok(events)
}

fn single(event: &VEvent, calendar_id: &CalendarId) -> CalendarEvent {
    CalendarEvent {
        uid: event.uid.clone(),
        calendar_id: calendar_id.clone(),
        start: event.start.timestamp(),
        end: event.end_timestamp(),
        all_day: event.start.all_day,
        sequence: event.sequence,
        recurrence_id: None,
        summary: event.summary.clone(),
    }
}

fn occurrence(
    event: &VEvent,
    key: String,
    start: Timestamp,
    end: Timestamp,
    calendar_id: &CalendarId,
) -> CalendarEvent {
    CalendarEvent {
        uid: format!("{}/{key}", event.uid),
        calendar_id: calendar_id.clone(),
        start,
        end,
        all_day: event.start.all_day,
        sequence: event.sequence,
        recurrence_id: Some(key),
        summary: event.summary.clone(),
    }
}

fn instance_override(event: &VEvent, calendar_id: &CalendarId) -> CalendarEvent {
    let key = event
        .recurrence_id
        .as_ref()
        .map(DateOrTime::occurrence_key)
        .unwrap_or_default();
    occurrence(
        event,
        key,
        event.start.timestamp(),
        event.end_timestamp(),
        calendar_id,
    )
}

fn expand_series(
    master: &VEvent,
    overrides: Vec<VEvent>,
    calendar_id: &CalendarId,
    window: &DateWindow,
    out: &mut Vec<CalendarEvent>,
) {
    let Some(rule) = &master.rrule else {
        return;
    };

    let first = master.start.timestamp();
    let tz = master.start.zoned.time_zone().clone();
    let start_date = master.start.zoned.date();
    let length = master.end_timestamp().duration_since(first);
    let until = rule.until.as_ref().map(DateOrTime::timestamp);
    let last_date = until
        .map_or(window.end, |until| until.min(window.end))
        .to_zoned(tz.clone())
        .date();
    let excluded: HashSet<String> = master.exdates.iter().map(DateOrTime::occurrence_key).collect();
    let mut overrides: HashMap<String, VEvent> = overrides
        .into_iter()
        .filter_map(|o| Some((o.recurrence_id.as_ref()?.occurrence_key(), o)))
        .collect();

    // COUNT needs every occurrence from DTSTART; otherwise start near the window
    let mut period = match rule.count {
        Some(_) => 0,
        None => {
            let lookback = window.start.checked_sub(length).unwrap_or(window.start);
            first_period(rule, start_date, lookback.to_zoned(tz.clone()).date())
        }
    };
    let mut produced: u32 = 0;
    let mut candidates = 0usize;
    'periods: loop {
        let Some((anchor, dates)) = period_dates(rule, start_date, period) else {
            break;
        };
        if anchor > last_date {
            break;
        }
        period += 1;
        candidates += 1;

        for date in dates {
            candidates += 1;
            if candidates > MAX_CANDIDATES {
                tracing::warn!(uid = master.uid, "recurrence expansion cut off");
                break 'periods;
            }

            let Ok(zoned) = date.to_datetime(master.start.zoned.time()).to_zoned(tz.clone()) else {
                continue;
            };
            let start = zoned.timestamp();
            if start < first {
                continue;
            }
            if until.is_some_and(|until| start > until)
                || rule.count.is_some_and(|count| produced >= count)
                || start >= window.end
            {
                break 'periods;
            }
            produced += 1;

            let key = if master.start.all_day {
                crate::ics::date_key(date)
            } else {
                crate::ics::utc_key(start)
            };
            if excluded.contains(&key) {
                continue;
            }

            if let Some(moved) = overrides.remove(&key) {
                let (start, end) = (moved.start.timestamp(), moved.end_timestamp());
                if window.overlaps(start, end) {
                    out.push(occurrence(&moved, key, start, end, calendar_id));
                }
                continue;
            }

            let end = start.checked_add(length).unwrap_or(start);
            if window.overlaps(start, end) {
                out.push(occurrence(master, key, start, end, calendar_id));
            }
        }
    }

    // overrides moved into the window from an occurrence past its end
    let mut rest: Vec<(String, VEvent)> = overrides.into_iter().collect();
    rest.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (key, moved) in rest {
        let (start, end) = (moved.start.timestamp(), moved.end_timestamp());
        if !excluded.contains(&key) && window.overlaps(start, end) {
            out.push(occurrence(&moved, key, start, end, calendar_id));
        }
    }
}

/// Index of the last interval starting before `target`, so expansion can
/// skip the intervals of a long running series.
fn first_period(rule: &RecurrenceRule, start: Date, target: Date) -> i64 {
    if target <= start {
        return 0;
    }
    let days = || start.until(target).map_or(0, |span| i64::from(span.get_days()));
    let units = match rule.freq {
        Frequency::Daily => days(),
        Frequency::Weekly => days() / 7,
        Frequency::Monthly => month_index(target) - month_index(start),
        Frequency::Yearly => i64::from(target.year()) - i64::from(start.year()),
    };
    (units / i64::from(rule.interval) - 1).max(0)
}

fn month_index(date: Date) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month()) - 1
}

fn add_days(date: Date, days: i64) -> Option<Date> {
    date.checked_add(Span::new().try_days(days).ok()?).ok()
}

/// First day and sorted dates of the `period`-th interval of the rule,
/// `None` once out of range.
fn period_dates(rule: &RecurrenceRule, start: Date, period: i64) -> Option<(Date, Vec<Date>)> {
    let step = period.checked_mul(i64::from(rule.interval))?;
    let (anchor, mut dates) = match rule.freq {
        Frequency::Daily => {
            let date = add_days(start, step)?;
            let keep = in_months(rule, date) && in_month_days(rule, date) && on_weekdays(rule, date);
            (date, if keep { vec![date] } else { Vec::new() })
        }
        Frequency::Weekly => {
            let monday = i64::from(start.weekday().to_monday_zero_offset());
            let week = add_days(start, step.checked_mul(7)?.checked_sub(monday)?)?;
            let dates = if rule.by_day.is_empty() {
                vec![add_days(start, step.checked_mul(7)?)?]
            } else {
                days_from(week, 7).into_iter().filter(|d| on_weekdays(rule, *d)).collect()
            };
            let dates = dates.into_iter().filter(|d| in_months(rule, *d)).collect();
            (week, dates)
        }
        Frequency::Monthly => {
            let first = month_at(month_index(start).checked_add(step)?)?;
            let dates = if in_months(rule, first) {
                month_dates(rule, first, start.day())
            } else {
                Vec::new()
            };
            (first, dates)
        }
        Frequency::Yearly => {
            let year = i16::try_from(i64::from(start.year()).checked_add(step)?).ok()?;
            let first = Date::new(year, 1, 1).ok()?;
            let whole_year = rule.by_month.is_empty() && rule.by_month_day.is_empty();
            let dates = if whole_year && !rule.by_day.is_empty() {
                weekdays_in(&days_from(first, first.days_in_year()), &rule.by_day)
            } else {
                let months: Vec<i8> = match (rule.by_month.is_empty(), rule.by_month_day.is_empty()) {
                    (false, _) => rule.by_month.clone(),
                    (true, false) => (1..=12).collect(),
                    (true, true) => vec![start.month()],
                };
                months
                    .into_iter()
                    .filter_map(|month| Date::new(year, month, 1).ok())
                    .flat_map(|first| month_dates(rule, first, start.day()))
                    .collect()
            };
            (first, dates)
        }
    };

    dates.sort_unstable();
    dates.dedup();
    if !rule.by_set_pos.is_empty() {
        let mut picked: Vec<Date> = rule
            .by_set_pos
            .iter()
            .filter_map(|pos| nth(&dates, i64::from(*pos)))
            .collect();
        picked.sort_unstable();
        picked.dedup();
        dates = picked;
    }
    Some((anchor, dates))
}

/// Dates of one month for monthly rules and the months of yearly rules.
fn month_dates(rule: &RecurrenceRule, first: Date, default_day: i8) -> Vec<Date> {
    if !rule.by_month_day.is_empty() {
        rule.by_month_day
            .iter()
            .filter_map(|day| month_day(first, *day))
            .filter(|d| on_weekdays(rule, *d))
            .collect()
    } else if !rule.by_day.is_empty() {
        weekdays_in(&days_from(first, i16::from(first.days_in_month())), &rule.by_day)
    } else {
        month_day(first, default_day).into_iter().collect()
    }
}

/// Picks the `BYDAY` weekdays out of `scope`, honouring ordinals.
fn weekdays_in(scope: &[Date], by_day: &[WeekdayNum]) -> Vec<Date> {
    let mut out = Vec::new();
    for day in by_day {
        let matching: Vec<Date> = scope.iter().copied().filter(|d| d.weekday() == day.weekday).collect();
        match day.ordinal {
            None => out.extend(matching),
            Some(n) => out.extend(nth(&matching, i64::from(n))),
        }
    }
    out
}

/// 1-based position, negative from the end.
fn nth(dates: &[Date], pos: i64) -> Option<Date> {
    let len = i64::try_from(dates.len()).ok()?;
    let idx = if pos > 0 { pos - 1 } else { len + pos };
    dates.get(usize::try_from(idx).ok()?).copied()
}

fn days_from(first: Date, count: i16) -> Vec<Date> {
    first
        .series(Span::new().days(1))
        .take(usize::try_from(count).unwrap_or(0))
        .collect()
}

fn month_at(index: i64) -> Option<Date> {
    let year = i16::try_from(index.div_euclid(12)).ok()?;
    let month = i8::try_from(index.rem_euclid(12) + 1).ok()?;
    Date::new(year, month, 1).ok()
}

/// Day of the month of `first`, negative from the end; `None` if the month is
/// too short.
fn month_day(first: Date, day: i8) -> Option<Date> {
    let len = first.days_in_month();
    let day = if day > 0 { day } else { len + day + 1 };
    if !(1..=len).contains(&day) {
        return None;
    }
    Date::new(first.year(), first.month(), day).ok()
}

fn in_months(rule: &RecurrenceRule, date: Date) -> bool {
    rule.by_month.is_empty() || rule.by_month.contains(&date.month())
}

fn in_month_days(rule: &RecurrenceRule, date: Date) -> bool {
    rule.by_month_day.is_empty()
        || rule
            .by_month_day
            .iter()
            .any(|day| month_day(date.first_of_month(), *day) == Some(date))
}

fn on_weekdays(rule: &RecurrenceRule, date: Date) -> bool {
    rule.by_day.is_empty() || rule.by_day.iter().any(|day| day.weekday == date.weekday())
}
