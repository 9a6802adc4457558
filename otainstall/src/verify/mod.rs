/*
 * SPDX-FileCopyrightText: 2026 otainstall contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! First-boot partition verification after an A/B slot switch.
//!
//! dm-verity must be in enforcing mode, so that a corrupted read reboots the
//! device and lets the bootloader mark the slot unbootable. Any other verity
//! mode means read errors would be tolerated instead of enforced, which
//! breaks the trust assumption, so verification fails outright.

pub mod blocks;

use std::{fs, io, path::Path};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    boot_control::{BootControl, SlotSuccess},
    format::care_map::{self, CareMap},
    props::Properties,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to query boot control")]
    BootControl(#[source] io::Error),
    #[error("Found dm-verity in EIO mode, skip verification")]
    VerityEio,
    #[error("Unexpected dm-verity mode: {0:?}, expecting enforcing")]
    UnexpectedVerityMode(String),
    #[error("Error reading care map contents")]
    ReadCareMap(#[source] io::Error),
    #[error("Invalid care map")]
    ParseCareMap(#[from] care_map::Error),
    #[error("Failed to verify all blocks in care map file")]
    Scan(#[from] blocks::Error),
    #[error("Error marking booted successfully: {0}")]
    MarkFailed(String),
}

type Result<T> = std::result::Result<T, Error>;

/// Verify the current slot's partitions and mark it as successfully booted.
///
/// A slot already marked successful is left alone. An `Invalid` answer from
/// the query is deliberately treated like `False`: verification proceeds
/// rather than assuming the mark exists.
pub fn verify_and_mark(
    boot_control: &dyn BootControl,
    props: &Properties,
    care_map_path: &Path,
) -> Result<()> {
    let current_slot = boot_control.current_slot().map_err(Error::BootControl)?;
    let is_successful = boot_control
        .is_slot_marked_successful(current_slot)
        .map_err(Error::BootControl)?;

    info!("Booting slot {current_slot}: isSlotMarkedSuccessful={is_successful:?}");

    if is_successful == SlotSuccess::True {
        return Ok(());
    }

    let verity_mode = props.get("ro.boot.veritymode");
    if verity_mode.eq_ignore_ascii_case("eio") {
        // Verity should not be in EIO mode if the slot has never booted
        // successfully before.
        return Err(Error::VerityEio);
    } else if verity_mode != "enforcing" {
        return Err(Error::UnexpectedVerityMode(verity_mode.to_owned()));
    }

    verify_image(props, care_map_path)?;

    let result = boot_control
        .mark_boot_successful()
        .map_err(Error::BootControl)?;
    if !result.success {
        return Err(Error::MarkFailed(result.err_msg));
    }

    info!("Marked slot {current_slot} as booted successfully.");

    Ok(())
}

/// Scan every partition listed in the care map. A device flashed before the
/// current boot may not have one; that only warrants a warning, not a
/// verification failure.
fn verify_image(props: &Properties, care_map_path: &Path) -> Result<()> {
    let contents = match fs::read_to_string(care_map_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Warning: care map {care_map_path:?} not found.");
            return Ok(());
        }
        Err(e) => return Err(Error::ReadCareMap(e)),
    };

    let care_map = CareMap::parse(&contents)?;
    let slot_suffix = props.get("ro.boot.slot_suffix");

    for entry in &care_map.entries {
        blocks::scan_partition(&entry.device_prefix, slot_suffix, &entry.ranges)?;
    }

    Ok(())
}
