// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use calpush_core::{CalendarId, DateWindow};
use clap::{Arg, ArgMatches, arg, value_parser};
use jiff::{SignedDuration, Timestamp};

/// Days covered by the display window when no bound is given.
const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct CommonArgs;

impl CommonArgs {
    pub fn pretty() -> Arg {
        arg!(--pretty "Pretty-print JSON output")
    }

    pub fn get_pretty(matches: &ArgMatches) -> bool {
        matches.get_flag("pretty")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowArgs;

impl WindowArgs {
    pub fn start() -> Arg {
        arg!(--start <TIME> "Start of the expansion window (RFC 3339), defaults to now")
            .value_parser(value_parser!(Timestamp))
    }

    pub fn end() -> Arg {
        arg!(--end <TIME> "End of the expansion window (RFC 3339), defaults to 30 days after start")
            .value_parser(value_parser!(Timestamp))
    }

    pub fn get(matches: &ArgMatches) -> DateWindow {
        let start = matches
            .get_one::<Timestamp>("start")
            .copied()
            .unwrap_or_else(Timestamp::now);
        let end = matches.get_one::<Timestamp>("end").copied().unwrap_or_else(|| {
            start
                .checked_add(SignedDuration::from_hours(24 * DEFAULT_WINDOW_DAYS))
                .unwrap_or(start)
        });
        DateWindow::new(start, end)
    }
}

/// A calendar on the command line, `owner/calendar` with an optional `=token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarArg {
    pub id: CalendarId,
    pub token: Option<String>,
}

impl CalendarArg {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (path, token) = match s.split_once('=') {
            Some((path, token)) if !token.is_empty() => (path, Some(token.to_string())),
            Some((path, _)) => (path, None),
            None => (s, None),
        };
        let id = CalendarId::from_wire_path(path)
            .ok_or_else(|| format!("expected owner/calendar, got '{path}'"))?;
        Ok(Self { id, token })
    }
}
