// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Policy predicates deciding whether an A/B package may be applied to this
//! device. Downgrading is not allowed unless explicitly enabled in the
//! package, and only for packages that pin their source build.

use thiserror::Error;

use crate::{format::metadata::Metadata, props::Properties};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Package is for product {package:?} but expected {device:?}")]
    WrongDevice { package: String, device: String },
    #[error("Package is for serial {0:?}")]
    WrongSerial(String),
    #[error("Package is not A/B")]
    NotAb,
    #[error("Package is for source build {package:?} but expected {runtime:?}")]
    WrongIncremental { package: String, runtime: String },
    #[error("Package is for source build {package:?} but expected {runtime:?}")]
    WrongFingerprint { package: String, runtime: String },
    #[error(
        "Update package is older than the current build, expected a build newer \
         than timestamp {runtime} but package has timestamp {package} and \
         downgrade not allowed"
    )]
    DowngradeNotAllowed { package: i64, runtime: i64 },
    #[error("Downgrade package must have a pre-build version set, not allowed")]
    DowngradeWithoutSource,
}

type Result<T> = std::result::Result<T, Error>;

/// Check whether the package's metadata permits installing it on this
/// device. The first failing predicate wins.
pub fn check_ab_package(metadata: &Metadata, props: &Properties) -> Result<()> {
    let device = props.get("ro.product.device");
    let pkg_device = metadata.get("pre-device");
    if pkg_device.is_empty() || pkg_device != device {
        return Err(Error::WrongDevice {
            package: pkg_device.to_owned(),
            device: device.to_owned(),
        });
    }

    // The package may omit the serial number, but a non-empty value has to
    // match.
    let serial = props.get("ro.serialno");
    let pkg_serial = metadata.get("serialno");
    if !pkg_serial.is_empty() && pkg_serial != serial {
        return Err(Error::WrongSerial(pkg_serial.to_owned()));
    }

    if metadata.get("ota-type") != "AB" {
        return Err(Error::NotAb);
    }

    // Incremental updates have to match the build they were diffed against.
    let incremental = props.get("ro.build.version.incremental");
    let pkg_incremental = metadata.get("pre-build-incremental");
    if !pkg_incremental.is_empty() && pkg_incremental != incremental {
        return Err(Error::WrongIncremental {
            package: pkg_incremental.to_owned(),
            runtime: incremental.to_owned(),
        });
    }

    let fingerprint = props.get("ro.build.fingerprint");
    let pkg_fingerprint = metadata.get("pre-build");
    if !pkg_fingerprint.is_empty() && pkg_fingerprint != fingerprint {
        return Err(Error::WrongFingerprint {
            package: pkg_fingerprint.to_owned(),
            runtime: fingerprint.to_owned(),
        });
    }

    // A full update to the version we are already running is allowed, in case
    // the current copy of it is bad. Anything older, or a package without a
    // parsable timestamp, counts as a downgrade.
    let build_timestamp = props.get_i64("ro.build.date.utc", i64::MAX);
    let pkg_timestamp = metadata.get("post-timestamp").parse::<i64>().ok();

    if pkg_timestamp.map_or(true, |t| t < build_timestamp) {
        if metadata.get("ota-downgrade") != "yes" {
            return Err(Error::DowngradeNotAllowed {
                package: pkg_timestamp.unwrap_or(0),
                runtime: build_timestamp,
            });
        }
        if pkg_fingerprint.is_empty() {
            return Err(Error::DowngradeWithoutSource);
        }
    }

    Ok(())
}
