// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io,
    path::{Path, PathBuf},
    process::Command,
};

use tracing::debug;

/// Result of a slot-successful query. The underlying facility can fail to
/// answer, which is distinct from "no".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSuccess {
    True,
    False,
    Invalid,
}

#[derive(Clone, Debug)]
pub struct CommandResult {
    pub success: bool,
    pub err_msg: String,
}

/// The boot-control facility: slot queries and the mark-successful
/// operation.
pub trait BootControl {
    fn current_slot(&self) -> io::Result<u32>;

    fn is_slot_marked_successful(&self, slot: u32) -> io::Result<SlotSuccess>;

    fn mark_boot_successful(&self) -> io::Result<CommandResult>;
}

/// Drives the boot-control HAL through the `bootctl` utility.
pub struct BootctlTool {
    program: PathBuf,
}

impl BootctlTool {
    /// Connect to the boot-control facility. Fails if the HAL cannot be
    /// reached at all.
    pub fn connect(program: &Path) -> io::Result<Self> {
        let tool = Self {
            program: program.to_owned(),
        };

        let output = tool.run(&["hal-info"])?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Boot control HAL is unavailable via {program:?}"),
            ));
        }

        Ok(tool)
    }

    fn run(&self, args: &[&str]) -> io::Result<std::process::Output> {
        debug!("Running {:?} {args:?}", self.program);

        Command::new(&self.program).args(args).output()
    }
}

impl BootControl for BootctlTool {
    fn current_slot(&self) -> io::Result<u32> {
        let output = self.run(&["get-current-slot"])?;
        if !output.status.success() {
            return Err(io::Error::other("bootctl get-current-slot failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);

        stdout.trim().parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid slot number: {:?}", stdout.trim()),
            )
        })
    }

    fn is_slot_marked_successful(&self, slot: u32) -> io::Result<SlotSuccess> {
        let slot = slot.to_string();
        let output = self.run(&["is-slot-marked-successful", &slot])?;

        Ok(match output.status.code() {
            Some(0) => SlotSuccess::True,
            Some(1) => SlotSuccess::False,
            _ => SlotSuccess::Invalid,
        })
    }

    fn mark_boot_successful(&self) -> io::Result<CommandResult> {
        let output = self.run(&["mark-boot-successful"])?;

        Ok(CommandResult {
            success: output.status.success(),
            err_msg: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}
