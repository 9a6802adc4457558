/*
 * SPDX-FileCopyrightText: 2026 otainstall contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod child;
pub mod command;
pub mod driver;
pub mod gate;

/// Version of the argument protocol spoken to legacy update binaries.
pub const RECOVERY_API_VERSION: u32 = 3;

/// Share of the progress bar reserved for package verification, shown over
/// this many seconds.
pub const VERIFICATION_PROGRESS_FRACTION: f32 = 0.25;
pub const VERIFICATION_PROGRESS_TIME: i32 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallResult {
    Success,
    /// The package is structurally or cryptographically invalid.
    Corrupt,
    /// A policy or operational failure.
    Error,
    /// The applier asked for the install to be re-driven.
    Retry,
}
