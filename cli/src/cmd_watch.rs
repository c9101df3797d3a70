// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::sync::Arc;

use calpush_core::{
    Calendar, CalendarKind, ConnectionSupervisor, DateWindow, MemoryReplica, SyncError, SyncEvent,
};
use clap::{ArgMatches, Command, arg};
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;

use crate::arg::{CalendarArg, WindowArgs};
use crate::cli::Context;

#[derive(Debug, Clone)]
pub struct CmdWatch {
    pub calendars: Vec<CalendarArg>,
    pub kind: CalendarKind,
    pub window: DateWindow,
}

impl CmdWatch {
    pub const NAME: &str = "watch";

    pub fn command() -> Command {
        Command::new(Self::NAME)
            .about("Follow server push for some calendars and print what changes, until Ctrl-C")
            .arg(
                arg!(<CALENDAR> ... "Calendars as owner/calendar, optionally suffixed with =TOKEN")
                    .value_parser(CalendarArg::parse),
            )
            .arg(arg!(--temp "Treat the calendars as part of the temp collection"))
            .arg(WindowArgs::start())
            .arg(WindowArgs::end())
    }

    pub fn from(matches: &ArgMatches) -> Result<Self, Box<dyn Error>> {
        let calendars: Vec<CalendarArg> = matches
            .get_many::<CalendarArg>("CALENDAR")
            .ok_or("at least one calendar is required")?
            .cloned()
            .collect();
        let kind = if matches.get_flag("temp") {
            CalendarKind::Temp
        } else {
            CalendarKind::Primary
        };

        Ok(Self {
            calendars,
            kind,
            window: WindowArgs::get(matches),
        })
    }

    pub async fn run(self, ctx: &Context) -> Result<(), Box<dyn Error>> {
        tracing::debug!(?self, "starting watch...");
        let replica = Arc::new(MemoryReplica::new());
        for arg in &self.calendars {
            let mut calendar = Calendar::new(arg.id.clone());
            match &arg.token {
                Some(token) => calendar = calendar.with_sync_token(token.clone()),
                None => tracing::warn!(calendar = %arg.id, "no sync token, changes will not be fetched"),
            }
            replica.insert(self.kind, calendar);
        }

        let supervisor =
            ConnectionSupervisor::for_caldav(ctx.client.clone(), &ctx.config.sync, replica.clone());
        supervisor.set_window(self.window);
        let mut events = supervisor.subscribe();

        let ids = self.calendars.iter().map(|arg| arg.id.clone()).collect();
        if let Err(e) = supervisor.set_selected_calendars(ids) {
            tracing::debug!(err = %e, "selection will be registered once connected");
        }
        supervisor.set_authenticated(true);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let result = loop {
            tokio::select! {
                res = &mut ctrl_c => {
                    res?;
                    println!("{}", "Stopped.".italic());
                    break Ok(());
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        println!("{}", format_event(&event));
                        if let SyncEvent::Offline { attempts } = event {
                            break Err(format!("push channel offline after {attempts} attempts").into());
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event stream lagged");
                    }
                    Err(RecvError::Closed) => break Ok(()),
                },
            }
        };

        supervisor.shutdown();
        result
    }
}

fn format_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::Connected => format!("{} connected", "●".green()),
        SyncEvent::Disconnected => format!("{} disconnected", "●".yellow()),
        SyncEvent::Offline { attempts } => {
            format!("{} offline after {attempts} attempts", "●".red())
        }
        SyncEvent::CalendarSynced {
            calendar,
            kind,
            deleted,
            upserted,
        } => format!(
            "{} {calendar} ({kind}): {} {}",
            "►".green(),
            format!("+{upserted}").green(),
            format!("-{deleted}").red()
        ),
        SyncEvent::CalendarFailed {
            calendar,
            kind,
            error,
        } => format!(
            "{} {calendar} ({kind}): {error}{}",
            "✗".red(),
            failure_hint(error)
        ),
    }
}

fn failure_hint(error: &SyncError) -> &'static str {
    if error.is_auth_failure() {
        " (check credentials)"
    } else if matches!(error, SyncError::SyncTokenRejected(_)) {
        " (sync token expired, full resync needed)"
    } else if error.is_transient() {
        " (retried on next change)"
    } else {
        ""
    }
}
