// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Builds the argument vector used to invoke the external update applier.
//!
//! A/B packages are applied in place: the applier receives the package path,
//! the byte offset of `payload.bin` inside it, and the payload properties
//! blob. Legacy packages carry their own applier, which is extracted to a
//! scratch path and executed from there.

use std::{
    ffi::{OsStr, OsString},
    fs::{self, OpenOptions},
    io::{self, Read, Seek},
    os::{
        fd::RawFd,
        unix::{ffi::OsStrExt, fs::OpenOptionsExt},
    },
    path::Path,
};

use thiserror::Error;
use zip::{result::ZipError, ZipArchive};

use crate::install::{InstallResult, RECOVERY_API_VERSION};

pub const AB_OTA_PAYLOAD: &str = "payload.bin";
pub const AB_OTA_PAYLOAD_PROPERTIES: &str = "payload_properties.txt";
pub const UPDATE_BINARY_NAME: &str = "META-INF/com/google/android/update-binary";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot find {0} in update package")]
    MissingEntry(&'static str),
    #[error("Cannot extract {0} from update package")]
    Extract(&'static str, #[source] io::Error),
    #[error("Cannot make update binary at {0:?}")]
    CreateBinary(std::path::PathBuf, #[source] io::Error),
    #[error("Cannot copy update binary to {0:?}")]
    WriteBinary(std::path::PathBuf, #[source] io::Error),
    #[error("Zip error")]
    Zip(#[from] ZipError),
}

impl Error {
    /// How this failure surfaces to the install caller.
    pub fn result(&self) -> InstallResult {
        match self {
            Self::MissingEntry(_) | Self::Extract(_, _) | Self::Zip(_) => InstallResult::Corrupt,
            Self::CreateBinary(_, _) | Self::WriteBinary(_, _) => InstallResult::Error,
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

fn entry_by_name<'a, R: Read + Seek>(
    zip: &'a mut ZipArchive<R>,
    name: &'static str,
) -> Result<zip::read::ZipFile<'a>> {
    match zip.by_name(name) {
        Ok(entry) => Ok(entry),
        Err(ZipError::FileNotFound) => Err(Error::MissingEntry(name)),
        Err(e) => Err(e.into()),
    }
}

/// Build the applier invocation for an A/B package: the payload is consumed
/// directly out of the package file, so only its offset and the properties
/// blob are extracted here.
pub fn ab_command(
    package: &Path,
    zip: &mut ZipArchive<impl Read + Seek>,
    applier: &Path,
    status_fd: RawFd,
) -> Result<Vec<OsString>> {
    let properties = zip_entry_bytes(zip, AB_OTA_PAYLOAD_PROPERTIES)?;
    let payload_offset = entry_by_name(zip, AB_OTA_PAYLOAD)?.data_start();

    // The properties blob is passed verbatim; it is not ours to re-encode.
    let mut headers = OsString::from("--headers=");
    headers.push(OsStr::from_bytes(&properties));

    Ok(vec![
        applier.as_os_str().to_owned(),
        format!("--payload=file://{}", package.display()).into(),
        format!("--offset={payload_offset}").into(),
        headers,
        format!("--status_fd={status_fd}").into(),
    ])
}

fn zip_entry_bytes(
    zip: &mut ZipArchive<impl Read + Seek>,
    name: &'static str,
) -> Result<Vec<u8>> {
    let mut entry = entry_by_name(zip, name)?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| Error::Extract(name, e))?;

    Ok(buf)
}

/// Build the applier invocation for a legacy package: extract the embedded
/// update binary to `scratch_binary` (mode 0755) and invoke it with the
/// traditional positional arguments.
pub fn legacy_command(
    package: &Path,
    zip: &mut ZipArchive<impl Read + Seek>,
    scratch_binary: &Path,
    status_fd: RawFd,
    retry_count: u32,
) -> Result<Vec<OsString>> {
    let mut entry = entry_by_name(zip, UPDATE_BINARY_NAME)?;

    // A leftover binary from an earlier attempt must not survive; removal
    // failure only matters if the create below also fails.
    let _ = fs::remove_file(scratch_binary);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o755)
        .open(scratch_binary)
        .map_err(|e| Error::CreateBinary(scratch_binary.to_owned(), e))?;

    io::copy(&mut entry, &mut file)
        .map_err(|e| Error::WriteBinary(scratch_binary.to_owned(), e))?;

    let mut cmd = vec![
        scratch_binary.as_os_str().to_owned(),
        RECOVERY_API_VERSION.to_string().into(),
        status_fd.to_string().into(),
        package.as_os_str().to_owned(),
    ];
    if retry_count > 0 {
        cmd.push("retry".into());
    }

    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use assert_matches::assert_matches;
    use zip::{write::FileOptions, CompressionMethod, ZipWriter};

    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            FileOptions::default().compression_method(CompressionMethod::Stored);

        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }

        ZipArchive::new(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn ab_command_arguments() {
        let mut zip = build_zip(&[
            (AB_OTA_PAYLOAD_PROPERTIES, b"FILE_HASH=abcd\nFILE_SIZE=4\n"),
            (AB_OTA_PAYLOAD, b"payload-bytes"),
        ]);

        let expected_offset = zip.by_name(AB_OTA_PAYLOAD).unwrap().data_start();

        let cmd = ab_command(
            Path::new("/cache/ota.zip"),
            &mut zip,
            Path::new("/sbin/update_engine_sideload"),
            5,
        )
        .unwrap();

        assert_eq!(
            cmd,
            vec![
                OsString::from("/sbin/update_engine_sideload"),
                OsString::from("--payload=file:///cache/ota.zip"),
                OsString::from(format!("--offset={expected_offset}")),
                OsString::from("--headers=FILE_HASH=abcd\nFILE_SIZE=4\n"),
                OsString::from("--status_fd=5"),
            ],
        );
    }

    #[test]
    fn ab_command_missing_entries() {
        let mut zip = build_zip(&[(AB_OTA_PAYLOAD, b"payload-bytes")]);
        let err = ab_command(Path::new("/p.zip"), &mut zip, Path::new("/sbin/a"), 3)
            .unwrap_err();
        assert_matches!(err, Error::MissingEntry(AB_OTA_PAYLOAD_PROPERTIES));
        assert_eq!(err.result(), InstallResult::Corrupt);

        let mut zip = build_zip(&[(AB_OTA_PAYLOAD_PROPERTIES, b"FILE_SIZE=4\n")]);
        assert_matches!(
            ab_command(Path::new("/p.zip"), &mut zip, Path::new("/sbin/a"), 3),
            Err(Error::MissingEntry(AB_OTA_PAYLOAD))
        );
    }

    #[test]
    fn legacy_command_extracts_binary() {
        let temp_dir = tempfile::tempdir().unwrap();
        let scratch = temp_dir.path().join("update_binary");

        let mut zip = build_zip(&[(UPDATE_BINARY_NAME, b"#!/bin/sh\nexit 0\n")]);

        let cmd = legacy_command(Path::new("/cache/ota.zip"), &mut zip, &scratch, 4, 0)
            .unwrap();

        assert_eq!(
            cmd,
            vec![
                scratch.as_os_str().to_owned(),
                OsString::from("3"),
                OsString::from("4"),
                OsString::from("/cache/ota.zip"),
            ],
        );

        assert_eq!(fs::read(&scratch).unwrap(), b"#!/bin/sh\nexit 0\n");

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&scratch).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn legacy_command_retry_argument() {
        let temp_dir = tempfile::tempdir().unwrap();
        let scratch = temp_dir.path().join("update_binary");

        let mut zip = build_zip(&[(UPDATE_BINARY_NAME, b"binary")]);

        let cmd = legacy_command(Path::new("/p.zip"), &mut zip, &scratch, 4, 2).unwrap();
        assert_eq!(cmd.last().unwrap(), &OsString::from("retry"));
    }

    #[test]
    fn legacy_command_missing_binary() {
        let temp_dir = tempfile::tempdir().unwrap();
        let scratch = temp_dir.path().join("update_binary");

        let mut zip = build_zip(&[(AB_OTA_PAYLOAD, b"payload")]);

        let err = legacy_command(Path::new("/p.zip"), &mut zip, &scratch, 4, 0).unwrap_err();
        assert_matches!(err, Error::MissingEntry(UPDATE_BINARY_NAME));
        assert_eq!(err.result(), InstallResult::Corrupt);
    }

    #[test]
    fn legacy_command_unwritable_scratch() {
        let mut zip = build_zip(&[(UPDATE_BINARY_NAME, b"binary")]);

        let err = legacy_command(
            Path::new("/p.zip"),
            &mut zip,
            Path::new("/nonexistent-dir/update_binary"),
            4,
            0,
        )
        .unwrap_err();
        assert_matches!(err, Error::CreateBinary(_, _));
        assert_eq!(err.result(), InstallResult::Error);
    }
}
