// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Top-level install sequence: mount, map, verify, gate, run the applier,
//! and write the install log.

use std::{
    fs::{self, File},
    io::{Cursor, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use memmap2::Mmap;
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use zip::ZipArchive;

use crate::{
    crypto::PackageVerifier,
    format::metadata::{self, Metadata},
    install::{
        child::{self, ChildOutcome, StatusPipe},
        command, gate, InstallResult, VERIFICATION_PROGRESS_FRACTION, VERIFICATION_PROGRESS_TIME,
    },
    mount::Mounter,
    props::Properties,
    ui::{Background, RecoveryUi},
};

// Error codes recorded in the install log for later analysis.
const ZIP_VERIFICATION_FAILURE: u32 = 21;
const ZIP_OPEN_FAILURE: u32 = 22;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageVariant {
    /// The payload is applied to the inactive slot by an external streaming
    /// applier.
    Ab,
    /// The package carries its own update binary.
    Legacy,
}

#[derive(Clone, Debug)]
pub struct InstallConfig {
    pub variant: PackageVariant,
    /// The A/B streaming applier.
    pub applier: PathBuf,
    /// Where the legacy update binary is extracted to.
    pub scratch_binary: PathBuf,
    /// Status record left behind by the package preparation step.
    pub uncrypt_status: PathBuf,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            variant: PackageVariant::Ab,
            applier: PathBuf::from("/sbin/update_engine_sideload"),
            scratch_binary: PathBuf::from("/tmp/update_binary"),
            uncrypt_status: PathBuf::from("/cache/recovery/uncrypt_status"),
        }
    }
}

/// Everything the driver needs from the outside world.
pub struct InstallContext<'a> {
    pub ui: &'a dyn RecoveryUi,
    pub props: &'a Properties,
    pub mounter: &'a dyn Mounter,
    pub verifier: &'a dyn PackageVerifier,
    pub config: InstallConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstallOutcome {
    pub result: InstallResult,
    pub wipe_cache: bool,
}

impl InstallOutcome {
    fn failed(result: InstallResult) -> Self {
        Self {
            result,
            wipe_cache: false,
        }
    }
}

/// Install a package and write the install log to `install_file`. This is a
/// single atomic attempt; on [`InstallResult::Retry`] the caller re-drives
/// with an incremented `retry_count`.
pub fn install_package(
    ctx: &InstallContext,
    package: &Path,
    install_file: &Path,
    needs_mount: bool,
    retry_count: u32,
) -> InstallOutcome {
    let start = Instant::now();

    let mut log_buffer = vec![];
    let outcome = really_install(ctx, package, needs_mount, retry_count, &mut log_buffer);

    let time_total = start.elapsed().as_secs();

    append_uncrypt_status(ctx, &mut log_buffer);

    let log_header = [
        package.display().to_string(),
        if outcome.result == InstallResult::Success {
            "1"
        } else {
            "0"
        }
        .to_owned(),
        format!("time_total: {time_total}"),
        format!("retry: {retry_count}"),
    ];
    let log_content = log_header.join("\n") + "\n" + &log_buffer.join("\n");

    if let Err(e) = write_install_log(install_file, &log_content) {
        error!("failed to write {install_file:?}: {e}");
    }

    // A copy always goes to the system log.
    info!("{log_content}");

    outcome
}

fn really_install(
    ctx: &InstallContext,
    package: &Path,
    needs_mount: bool,
    retry_count: u32,
    log_buffer: &mut Vec<String>,
) -> InstallOutcome {
    let ui = ctx.ui;

    ui.set_background(Background::Installing);
    ui.print("Finding update package...\n");
    // Give verification its own share of the progress bar.
    ui.show_progress(VERIFICATION_PROGRESS_FRACTION, VERIFICATION_PROGRESS_TIME);
    info!("Update location: {package:?}");

    ui.print("Opening update package...\n");

    // A leading '@' names the filesystem to bring online; the mapped file is
    // the remainder of the path.
    let package = match package.to_str().and_then(|p| p.strip_prefix('@')) {
        Some(rest) => Path::new(rest),
        None => package,
    };
    if needs_mount {
        if let Err(e) = ctx.mounter.ensure_mounted(package) {
            warn!("Failed to mount filesystem for {package:?}: {e}");
        }
    }

    let map = match map_package(package) {
        Ok(map) => map,
        Err(e) => {
            error!("failed to map file {package:?}: {e}");
            return InstallOutcome::failed(InstallResult::Corrupt);
        }
    };

    if !verify_package(ctx, &map) {
        log_buffer.push(format!("error: {ZIP_VERIFICATION_FAILURE}"));
        return InstallOutcome::failed(InstallResult::Corrupt);
    }

    let mut zip = match ZipArchive::new(Cursor::new(&map[..])) {
        Ok(zip) => zip,
        Err(e) => {
            error!("Can't open {package:?}: {e}");
            log_buffer.push(format!("error: {ZIP_OPEN_FAILURE}"));
            return InstallOutcome::failed(InstallResult::Corrupt);
        }
    };

    read_source_target_build(&mut zip, log_buffer);

    ui.print("Installing update...\n");
    if retry_count > 0 {
        ui.print(&format!("Retry attempt: {retry_count}\n"));
    }
    ui.set_enable_reboot(false);
    let outcome = try_update_binary(ctx, package, &mut zip, retry_count, log_buffer);
    ui.set_enable_reboot(true);
    ui.print("\n");

    // The map and archive are dropped here on every path out of the steps
    // above; failure paths released them the same way.
    outcome
}

fn map_package(package: &Path) -> std::io::Result<Mmap> {
    let file = File::open(package)?;

    // Safety: recovery owns the package file for the duration of the
    // install; nothing else mutates it.
    unsafe { Mmap::map(&file) }
}

fn verify_package(ctx: &InstallContext, package: &[u8]) -> bool {
    ctx.ui.print("Verifying update package...\n");

    let start = Instant::now();
    let result = ctx.verifier.verify(package);
    let elapsed = start.elapsed().as_secs_f64();

    ctx.ui.print(&format!(
        "Update package verification took {elapsed:.1} s (result {}).\n",
        if result.is_ok() { 0 } else { 1 },
    ));

    if let Err(e) = result {
        error!("Signature verification failed: {e}");
        error!("error: {ZIP_VERIFICATION_FAILURE}");
        return false;
    }

    true
}

/// Record the source and target build numbers in the install log, when the
/// metadata carries them.
fn read_source_target_build(
    zip: &mut ZipArchive<Cursor<&[u8]>>,
    log_buffer: &mut Vec<String>,
) {
    let Ok(raw) = metadata::read_from_package(zip) else {
        return;
    };
    let metadata = Metadata::parse(&raw);

    for (key, label) in [
        ("pre-build-incremental", "source_build"),
        ("post-build-incremental", "target_build"),
    ] {
        let value = metadata.get(key);
        if value.is_empty() {
            continue;
        }

        match value.parse::<i64>() {
            Ok(n) => log_buffer.push(format!("{label}: {n}")),
            Err(_) => error!("Failed to parse build number in {key}={value}"),
        }
    }
}

fn try_update_binary(
    ctx: &InstallContext,
    package: &Path,
    zip: &mut ZipArchive<Cursor<&[u8]>>,
    retry_count: u32,
    log_buffer: &mut Vec<String>,
) -> InstallOutcome {
    if ctx.config.variant == PackageVariant::Ab {
        let raw = match metadata::read_from_package(zip) {
            Ok(raw) => raw,
            Err(e) => {
                error!("{e}");
                return InstallOutcome::failed(InstallResult::Corrupt);
            }
        };

        if let Err(e) = gate::check_ab_package(&Metadata::parse(&raw), ctx.props) {
            error!("{e}");
            return InstallOutcome::failed(InstallResult::Error);
        }
    }

    let pipe = match StatusPipe::new() {
        Ok(pipe) => pipe,
        Err(e) => {
            error!("{e}");
            return InstallOutcome::failed(InstallResult::Error);
        }
    };

    let argv = match ctx.config.variant {
        PackageVariant::Ab => {
            command::ab_command(package, zip, &ctx.config.applier, pipe.write_fd())
        }
        PackageVariant::Legacy => command::legacy_command(
            package,
            zip,
            &ctx.config.scratch_binary,
            pipe.write_fd(),
            retry_count,
        ),
    };
    let argv = match argv {
        Ok(argv) => argv,
        Err(e) => {
            error!("{e}");
            return InstallOutcome::failed(e.result());
        }
    };

    match child::run_applier(ctx.ui, &argv, pipe, log_buffer) {
        Ok(ChildOutcome { result, wipe_cache }) => InstallOutcome { result, wipe_cache },
        Err(e) => {
            error!("{e}");
            InstallOutcome::failed(InstallResult::Error)
        }
    }
}

/// The uncrypt step of a previous boot stage leaves a status record behind;
/// carry it into the install log.
fn append_uncrypt_status(ctx: &InstallContext, log_buffer: &mut Vec<String>) {
    let path = &ctx.config.uncrypt_status;

    if let Err(e) = ctx.mounter.ensure_mounted(path) {
        warn!("Can't mount {path:?}: {e}");
        return;
    }

    match fs::read_to_string(path) {
        Ok(status) if status.starts_with("uncrypt_") => {
            log_buffer.push(status.trim().to_owned());
        }
        Ok(status) => warn!("corrupted uncrypt_status: {status:?}"),
        Err(e) => warn!("failed to read uncrypt status: {e}"),
    }
}

/// Write the install log, atomically replacing any previous one.
fn write_install_log(install_file: &Path, content: &str) -> std::io::Result<()> {
    let parent = install_file.parent().unwrap_or_else(|| Path::new("."));

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file
        .persist(install_file)
        .map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_log_is_written_atomically() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("last_install");

        fs::write(&path, "previous contents").unwrap();
        write_install_log(&path, "/cache/ota.zip\n1\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "/cache/ota.zip\n1\n");
    }

    #[test]
    fn source_target_build_logging() {
        use zip::{write::FileOptions, CompressionMethod, ZipWriter};

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(
                metadata::PATH_METADATA,
                FileOptions::default().compression_method(CompressionMethod::Stored),
            )
            .unwrap();
        writer
            .write_all(b"pre-build-incremental=2943039\npost-build-incremental=bogus\n")
            .unwrap();
        let data = writer.finish().unwrap().into_inner();

        let mut zip = ZipArchive::new(Cursor::new(&data[..])).unwrap();
        let mut log_buffer = vec![];
        read_source_target_build(&mut zip, &mut log_buffer);

        // The unparsable target build is logged and skipped.
        assert_eq!(log_buffer, vec!["source_build: 2943039"]);
    }
}
