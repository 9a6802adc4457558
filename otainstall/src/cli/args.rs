/*
 * SPDX-FileCopyrightText: 2026 otainstall contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::{install, verify};

#[derive(Debug, Subcommand)]
pub enum Command {
    Install(install::InstallCli),
    VerifySlot(verify::VerifySlotCli),
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", default_value_t = LevelFilter::INFO)]
    pub log_level: LevelFilter,
}

fn init_logging(cli: &Cli) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.log_level.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);
    logging_initialized.store(true, Ordering::SeqCst);

    match cli.command {
        Command::Install(c) => install::install_main(&c, cancel_signal),
        Command::VerifySlot(c) => verify::verify_slot_main(&c),
    }
}
