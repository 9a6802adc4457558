// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid lines in care map: found {0} lines, expecting 2 or 4 lines")]
    InvalidLineCount(usize),
    #[error("Invalid range count in {0:?}")]
    InvalidRangeCount(String),
    #[error("Invalid range pair {0:?}, {1:?}")]
    InvalidRangePair(String, String),
}

type Result<T> = std::result::Result<T, Error>;

/// One partition to scan: the block device path without its slot suffix,
/// plus the unparsed range spec for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CareMapEntry {
    pub device_prefix: String,
    pub ranges: String,
}

/// Parsed care map file.
///
/// The file is 2 or 4 non-empty lines: a block device line followed by a
/// range spec line, once for system and optionally again for vendor.
#[derive(Clone, Debug, Default)]
pub struct CareMap {
    pub entries: Vec<CareMapEntry>,
}

impl CareMap {
    pub fn parse(data: &str) -> Result<Self> {
        let lines = data.trim().split('\n').collect::<Vec<_>>();
        if lines.len() != 2 && lines.len() != 4 {
            return Err(Error::InvalidLineCount(lines.len()));
        }

        let entries = lines
            .chunks_exact(2)
            .map(|pair| CareMapEntry {
                device_prefix: pair[0].trim().to_owned(),
                ranges: pair[1].trim().to_owned(),
            })
            .collect();

        Ok(Self { entries })
    }
}

/// A set of half-open block ranges `[start, end)`, parsed from the spec
/// format `<count>,<start>,<end>,...` where `count` is the number of integers
/// that follow and every consecutive pair is one range.
///
/// For example, `4,64536,65343,74149,74150` is [64536, 65343) and
/// [74149, 74150).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSet(Vec<(u64, u64)>);

impl RangeSet {
    pub fn parse(data: &str) -> Result<Self> {
        let pieces = data.split(',').collect::<Vec<_>>();

        let count = pieces[0]
            .parse::<usize>()
            .map_err(|_| Error::InvalidRangeCount(data.to_owned()))?;
        if count == 0 || count % 2 != 0 || count != pieces.len() - 1 {
            return Err(Error::InvalidRangeCount(data.to_owned()));
        }

        let mut ranges = Vec::with_capacity(count / 2);

        for pair in pieces[1..].chunks_exact(2) {
            let invalid = || Error::InvalidRangePair(pair[0].to_owned(), pair[1].to_owned());

            let start = pair[0].parse::<u64>().map_err(|_| invalid())?;
            let end = pair[1].parse::<u64>().map_err(|_| invalid())?;
            if start >= end {
                return Err(invalid());
            }

            ranges.push((start, end));
        }

        Ok(Self(ranges))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.0.iter().copied()
    }

    /// Total number of blocks covered.
    pub fn block_count(&self) -> u64 {
        self.0.iter().map(|(start, end)| end - start).sum()
    }
}
