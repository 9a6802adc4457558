/*
 * SPDX-FileCopyrightText: 2026 otainstall contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::{
    cli::{status, warning},
    crypto::{self, TrustedKeyVerifier},
    install::{
        driver::{self, InstallConfig, InstallContext, PackageVariant},
        InstallResult,
    },
    mount::{FstabMounter, Mounter, NullMounter},
    props::Properties,
    ui::TextUi,
};

/// Give up after this many applier-requested retries.
const RETRY_LIMIT: u32 = 4;

pub fn install_main(cli: &InstallCli, cancel_signal: &Arc<AtomicBool>) -> Result<()> {
    let props = Properties::load_system();

    let certs = crypto::load_trusted_certs(&cli.keys)
        .with_context(|| format!("Failed to load trusted keys: {:?}", cli.keys))?;
    let verifier = TrustedKeyVerifier::new(certs, cancel_signal.clone());

    let mounter: Box<dyn Mounter> = match &cli.fstab {
        Some(path) => Box::new(
            FstabMounter::load(path)
                .with_context(|| format!("Failed to load fstab: {path:?}"))?,
        ),
        None => Box::new(NullMounter),
    };

    let config = InstallConfig {
        variant: if cli.legacy {
            PackageVariant::Legacy
        } else {
            PackageVariant::Ab
        },
        applier: cli.applier.clone(),
        ..Default::default()
    };

    let ctx = InstallContext {
        ui: &TextUi,
        props: &props,
        mounter: mounter.as_ref(),
        verifier: &verifier,
        config,
    };

    let mut retry_count = cli.retry_count;

    loop {
        let outcome = driver::install_package(
            &ctx,
            &cli.package,
            &cli.install_log,
            cli.needs_mount,
            retry_count,
        );

        match outcome.result {
            InstallResult::Success => {
                if outcome.wipe_cache {
                    status!("Package requested a cache wipe after install");
                }
                status!("Package installed: {:?}", cli.package);
                return Ok(());
            }
            InstallResult::Retry if retry_count < RETRY_LIMIT => {
                retry_count += 1;
                warning!("Applier requested a retry (attempt {retry_count})");
            }
            InstallResult::Retry => {
                bail!("Installation failed after {retry_count} retries");
            }
            InstallResult::Corrupt => {
                bail!("Update package is corrupt: {:?}", cli.package);
            }
            InstallResult::Error => {
                bail!("Installation failed: {:?}", cli.package);
            }
        }
    }
}

/// Apply an OTA update package.
#[derive(Debug, Parser)]
pub struct InstallCli {
    /// Path to update package. A leading '@' names the filesystem to mount,
    /// with the package at the remainder of the path.
    #[arg(short, long, value_name = "FILE")]
    package: PathBuf,

    /// Path to write the install result log.
    #[arg(
        long,
        value_name = "FILE",
        default_value = "/cache/recovery/last_install"
    )]
    install_log: PathBuf,

    /// Path to trusted signing certificates (concatenated PEM).
    #[arg(long, value_name = "FILE", default_value = "/res/keys")]
    keys: PathBuf,

    /// Treat the package as a legacy update carrying its own update binary.
    #[arg(long)]
    legacy: bool,

    /// Path to the A/B payload applier.
    #[arg(
        long,
        value_name = "FILE",
        default_value = "/sbin/update_engine_sideload"
    )]
    applier: PathBuf,

    /// Recovery fstab used to bring filesystems online. Without it, every
    /// path is assumed to be premounted.
    #[arg(long, value_name = "FILE")]
    fstab: Option<PathBuf>,

    /// Mount the filesystem containing the package first.
    #[arg(long)]
    needs_mount: bool,

    /// Number of earlier attempts for this package.
    #[arg(long, value_name = "N", default_value_t = 0)]
    retry_count: u32,
}
