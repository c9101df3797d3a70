// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;

use clap::{ArgMatches, Command};
use colored::Colorize;
use jiff::Timestamp;

use crate::arg::CommonArgs;
use crate::cli::{Context, to_json};

#[derive(Debug, Clone, Copy)]
pub struct CmdTicket {
    pub pretty: bool,
}

impl CmdTicket {
    pub const NAME: &str = "ticket";

    pub fn command() -> Command {
        Command::new(Self::NAME)
            .about("Request a push ticket and print it as JSON")
            .arg(CommonArgs::pretty())
    }

    pub fn from(matches: &ArgMatches) -> Self {
        Self {
            pretty: CommonArgs::get_pretty(matches),
        }
    }

    pub async fn run(self, ctx: &Context) -> Result<(), Box<dyn Error>> {
        tracing::debug!(?self, "requesting ticket...");
        let ticket = ctx.client.fetch_ticket().await?;
        println!("{}", to_json(&ticket, self.pretty)?);

        if !ticket.is_valid_at(Timestamp::now()) {
            eprintln!(
                "{} the ticket expired at {}; check the clock of this machine",
                "Warning:".yellow(),
                ticket.valid_until
            );
        }
        Ok(())
    }
}
