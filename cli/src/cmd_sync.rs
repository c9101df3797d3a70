// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;

use calpush_core::{Calendar, CalendarId, CalendarKind, DateWindow, Reconciler};
use clap::{ArgMatches, Command, arg};
use tokio_util::sync::CancellationToken;

use crate::arg::{CalendarArg, CommonArgs, WindowArgs};
use crate::cli::{Context, to_json};

#[derive(Debug, Clone)]
pub struct CmdSync {
    pub calendar: CalendarId,
    pub token: Option<String>,
    pub kind: CalendarKind,
    pub window: DateWindow,
    pub pretty: bool,
}

impl CmdSync {
    pub const NAME: &str = "sync";

    pub fn command() -> Command {
        Command::new(Self::NAME)
            .about("Fetch the changes of one calendar since a sync token and print the delta")
            .arg(
                arg!(<CALENDAR> "Calendar as owner/calendar, optionally suffixed with =TOKEN")
                    .value_parser(CalendarArg::parse),
            )
            .arg(arg!(-t --token <TOKEN> "Sync token to fetch changes since"))
            .arg(arg!(--temp "Treat the calendar as part of the temp collection"))
            .arg(WindowArgs::start())
            .arg(WindowArgs::end())
            .arg(CommonArgs::pretty())
    }

    pub fn from(matches: &ArgMatches) -> Result<Self, Box<dyn Error>> {
        let calendar = matches
            .get_one::<CalendarArg>("CALENDAR")
            .cloned()
            .ok_or("calendar is required")?;
        let token = matches.get_one::<String>("token").cloned().or(calendar.token);
        let kind = if matches.get_flag("temp") {
            CalendarKind::Temp
        } else {
            CalendarKind::Primary
        };

        Ok(Self {
            calendar: calendar.id,
            token,
            kind,
            window: WindowArgs::get(matches),
            pretty: CommonArgs::get_pretty(matches),
        })
    }

    pub async fn run(self, ctx: &Context) -> Result<(), Box<dyn Error>> {
        tracing::debug!(?self, "reconciling calendar...");
        let mut calendar = Calendar::new(self.calendar);
        match self.token {
            Some(token) => calendar = calendar.with_sync_token(token),
            None => tracing::warn!("no sync token given, the delta will be empty"),
        }

        let reconciler = Reconciler::new(ctx.client.clone())
            .with_max_concurrency(ctx.config.sync.expansion_concurrency);
        let delta = reconciler
            .reconcile(&calendar, self.kind, self.window, &CancellationToken::new())
            .await?;

        println!("{}", to_json(&delta, self.pretty)?);
        Ok(())
    }
}
