/*
 * SPDX-FileCopyrightText: 2026 otainstall contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::{boot_control::BootctlTool, cli::status, props::Properties, verify};

pub fn verify_slot_main(cli: &VerifySlotCli) -> Result<()> {
    let props = Properties::load_system();

    let boot_control = BootctlTool::connect(&cli.bootctl)
        .context("Error getting bootctrl module")?;

    verify::verify_and_mark(&boot_control, &props, &cli.care_map)?;

    status!("Slot verification complete");

    Ok(())
}

/// Verify the freshly flashed partitions on the first boot after an A/B
/// update, then mark the current slot as having booted successfully.
#[derive(Debug, Parser)]
pub struct VerifySlotCli {
    /// Path to the care map listing the block ranges to read.
    #[arg(
        long,
        value_name = "FILE",
        default_value = "/data/ota_package/care_map.txt"
    )]
    care_map: PathBuf,

    /// Boot control utility used to query and mark slots.
    #[arg(long, value_name = "PROGRAM", default_value = "bootctl")]
    bootctl: PathBuf,
}
