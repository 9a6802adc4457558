// SPDX-FileCopyrightText: 2026 otainstall contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{collections::BTreeMap, fs};

use tracing::debug;

/// Property files read by [`Properties::load_system`], in load order. Later
/// files win on duplicate keys.
const PROP_FILES: &[&str] = &[
    "/default.prop",
    "/prop.default",
    "/system/build.prop",
    "/vendor/build.prop",
];

const KERNEL_CMDLINE: &str = "/proc/cmdline";

/// Read-only view of the runtime system properties.
///
/// Lookups follow `property_get` semantics: a missing key is an empty string,
/// not an error.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load properties from the standard property files and the kernel
    /// command line. Missing or unreadable files are skipped.
    pub fn load_system() -> Self {
        let mut props = Self::new();

        for path in PROP_FILES {
            match fs::read_to_string(path) {
                Ok(data) => props.parse_prop_file(&data),
                Err(e) => debug!("Skipping property file {path}: {e}"),
            }
        }

        if let Ok(data) = fs::read_to_string(KERNEL_CMDLINE) {
            props.parse_kernel_cmdline(&data);
        }

        props
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Get a property value. Unset properties are empty strings.
    pub fn get(&self, name: &str) -> &str {
        self.values.get(name).map_or("", String::as_str)
    }

    /// Get a property value as a signed 64-bit integer, falling back to
    /// `default` when the property is unset or does not parse.
    pub fn get_i64(&self, name: &str, default: i64) -> i64 {
        self.get(name).trim().parse().unwrap_or(default)
    }

    fn parse_prop_file(&mut self, data: &str) {
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim());
            }
        }
    }

    /// `androidboot.<x>=<v>` tokens on the kernel command line surface as
    /// `ro.boot.<x>` properties. This is where the slot suffix and verity
    /// mode come from.
    fn parse_kernel_cmdline(&mut self, data: &str) {
        for token in data.split_ascii_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };

            if let Some(name) = key.strip_prefix("androidboot.") {
                self.set(format!("ro.boot.{name}"), value);
            }
        }
    }
}
