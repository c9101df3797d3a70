// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Command-line front end of the calpush synchronization engine.

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    clippy::dbg_macro,
    clippy::pedantic
)]
#![allow(clippy::missing_errors_doc)]

mod arg;
mod cli;
mod cmd_sync;
mod cmd_ticket;
mod cmd_watch;
mod config;

pub use crate::cli::{Cli, Commands, run};
pub use crate::config::{Config, parse_config};
