// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use nix::mount::MsFlags;
use tracing::{debug, info};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Brings the filesystem containing a path online. The install flow only
/// needs this one operation; unmounting is the recovery shell's problem.
pub trait Mounter {
    fn ensure_mounted(&self, path: &Path) -> io::Result<()>;
}

/// For environments where every relevant filesystem is premounted.
pub struct NullMounter;

impl Mounter for NullMounter {
    fn ensure_mounted(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct FstabEntry {
    source: String,
    mount_point: PathBuf,
    fs_type: String,
    options: String,
}

/// Mounts volumes listed in a recovery fstab. A path resolves to the volume
/// whose mount point is its longest prefix; volumes already present in
/// `/proc/mounts` are left alone.
pub struct FstabMounter {
    entries: Vec<FstabEntry>,
    mounts_path: PathBuf,
}

impl FstabMounter {
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;

        Ok(Self {
            entries: parse_fstab(&data),
            mounts_path: PathBuf::from(PROC_MOUNTS),
        })
    }

    fn volume_for(&self, path: &Path) -> Option<&FstabEntry> {
        self.entries
            .iter()
            .filter(|entry| path.starts_with(&entry.mount_point))
            .max_by_key(|entry| entry.mount_point.as_os_str().len())
    }

    fn is_mounted(&self, mount_point: &Path) -> io::Result<bool> {
        let data = fs::read_to_string(&self.mounts_path)?;
        let found = mounted_points(&data).any(|mp| mp == mount_point);

        Ok(found)
    }
}

impl Mounter for FstabMounter {
    fn ensure_mounted(&self, path: &Path) -> io::Result<()> {
        let entry = self.volume_for(path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No fstab volume contains {path:?}"),
            )
        })?;

        if self.is_mounted(&entry.mount_point)? {
            debug!("Already mounted: {:?}", entry.mount_point);
            return Ok(());
        }

        let (flags, data) = parse_mount_options(&entry.options);

        info!(
            "Mounting {} at {:?} ({})",
            entry.source, entry.mount_point, entry.fs_type
        );

        nix::mount::mount(
            Some(entry.source.as_str()),
            &entry.mount_point,
            Some(entry.fs_type.as_str()),
            flags,
            Some(data.as_str()),
        )
        .map_err(io::Error::from)
    }
}

fn parse_fstab(data: &str) -> Vec<FstabEntry> {
    let mut entries = vec![];

    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields = line.split_ascii_whitespace().collect::<Vec<_>>();
        if fields.len() < 4 {
            debug!("Skipping malformed fstab line: {line:?}");
            continue;
        }

        entries.push(FstabEntry {
            source: fields[0].to_owned(),
            mount_point: PathBuf::from(fields[1]),
            fs_type: fields[2].to_owned(),
            options: fields[3].to_owned(),
        });
    }

    entries
}

/// Split an fstab options column into mount flags and the filesystem data
/// string for everything we don't recognize as a flag.
fn parse_mount_options(options: &str) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = vec![];

    for option in options.split(',') {
        match option {
            "defaults" | "" => {}
            "ro" => flags |= MsFlags::MS_RDONLY,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            other => data.push(other),
        }
    }

    (flags, data.join(","))
}

fn mounted_points(data: &str) -> impl Iterator<Item = &Path> {
    data.lines()
        .filter_map(|line| line.split_ascii_whitespace().nth(1))
        .map(Path::new)
}
