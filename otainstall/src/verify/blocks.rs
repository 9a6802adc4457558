// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Reads every block listed in a range spec. Reading is the whole point:
//! the device-mapper verity layer validates each block as it is read, so a
//! clean pass over the care map proves the partition intact. The blocks
//! themselves are discarded.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::PathBuf,
};

use thiserror::Error;
use tracing::info;

use crate::format::care_map::{self, RangeSet};

pub const BLOCK_SIZE: u64 = 4096;

/// Read granularity. Ranges can span gigabytes; reading block-sized slices
/// keeps the buffer bounded.
const READ_CHUNK_BLOCKS: u64 = 256;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Error reading partition {0:?}")]
    Open(PathBuf, #[source] io::Error),
    #[error("lseek to {0} failed")]
    Seek(u64, #[source] io::Error),
    #[error("Failed to read blocks {0} to {1}")]
    Read(u64, u64, #[source] io::Error),
    #[error("Error in parsing range string")]
    Ranges(#[from] care_map::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Scan one partition: compose the slotted device path, parse the range
/// spec, and read every listed block. Returns the number of blocks read.
pub fn scan_partition(device_prefix: &str, slot_suffix: &str, ranges: &str) -> Result<u64> {
    let device = PathBuf::from(format!("{device_prefix}{slot_suffix}"));
    let ranges = RangeSet::parse(ranges)?;

    let file = File::open(&device).map_err(|e| Error::Open(device.clone(), e))?;
    let blocks = read_blocks(file, &ranges)?;

    info!("Finished reading {blocks} blocks on {device:?}");

    Ok(blocks)
}

/// Read every block of every range, in order, discarding the data.
pub fn read_blocks(mut reader: impl Read + Seek, ranges: &RangeSet) -> Result<u64> {
    let mut buf = vec![0u8; (READ_CHUNK_BLOCKS * BLOCK_SIZE) as usize];
    let mut blocks = 0;

    for (start, end) in ranges.iter() {
        reader
            .seek(SeekFrom::Start(start * BLOCK_SIZE))
            .map_err(|e| Error::Seek(start, e))?;

        let mut remaining = (end - start) * BLOCK_SIZE;
        while remaining > 0 {
            let n = remaining.min(buf.len() as u64) as usize;
            reader
                .read_exact(&mut buf[..n])
                .map_err(|e| Error::Read(start, end, e))?;
            remaining -= n as u64;
        }

        blocks += end - start;
    }

    Ok(blocks)
}
