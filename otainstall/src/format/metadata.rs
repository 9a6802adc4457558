// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::BTreeMap,
    io::{self, Read, Seek},
};

use thiserror::Error;
use zip::{result::ZipError, ZipArchive};

/// Path of the metadata entry inside an OTA package.
pub const PATH_METADATA: &str = "META-INF/com/android/metadata";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot find {PATH_METADATA} in update package")]
    MissingEntry,
    #[error("Failed to read metadata from update package")]
    Read(#[source] io::Error),
    #[error("Zip error")]
    Zip(#[from] ZipError),
}

type Result<T> = std::result::Result<T, Error>;

/// Extract the raw metadata entry from an opened package.
pub fn read_from_package(zip: &mut ZipArchive<impl Read + Seek>) -> Result<String> {
    let mut entry = match zip.by_name(PATH_METADATA) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(Error::MissingEntry),
        Err(e) => return Err(e.into()),
    };

    let mut buf = Vec::new();
    entry.read_to_end(&mut buf).map_err(Error::Read)?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Parsed package metadata.
///
/// Lookups mirror the property store: a missing key is an empty string. The
/// gate predicates distinguish "absent" from "present but wrong" purely via
/// emptiness, exactly like the values they compare against.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    values: BTreeMap<String, String>,
}

impl Metadata {
    /// Parse `key=value` lines. Keys and values are trimmed of surrounding
    /// whitespace, lines without `=` are ignored, and duplicate keys keep the
    /// last occurrence.
    pub fn parse(data: &str) -> Self {
        let mut values = BTreeMap::new();

        for line in data.split('\n') {
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_owned(), value.trim().to_owned());
            }
        }

        Self { values }
    }

    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map_or("", String::as_str)
    }
}
