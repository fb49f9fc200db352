/*
 *  loader/discovery.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Discovery scanner - enumerates candidate driver components
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Candidate sources, highest priority first:
//!
//! 1. Built-in null drivers, when the test override is set (nothing else)
//! 2. `ZE_ENABLE_ALT_DRIVERS` libraries, when set (nothing else)
//! 3. Entries of `*.yaml` manifests in the manifest directories
//! 4. Well-known vendor libraries and `zeloader_driver_*` plugins in the
//!    search directories
//!
//! Scanning touches no driver code. A scan is lazy, a fresh one can be
//! started at any time, and each component is yielded at most once per scan
//! (the first source naming it wins).
//!
//! A scanner built from the process environment re-reads the null-driver
//! variables whenever it picks a source, so a test may switch the override
//! between init requests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::types::{BuiltinDriver, ComponentLocator, DeviceTypeFlags};
use crate::config::{null_drivers_from_env, read_manifest, LoaderConfig};

/// Vendor driver libraries looked up by exact name, with the classes they serve
#[cfg(target_os = "linux")]
const WELL_KNOWN_LIBRARIES: &[(&str, DeviceTypeFlags)] = &[
    ("libze_intel_gpu.so.1", DeviceTypeFlags::GPU),
    ("libze_intel_vpu.so.1", DeviceTypeFlags::NPU),
    ("libze_intel_npu.so.1", DeviceTypeFlags::NPU),
];

#[cfg(target_os = "windows")]
const WELL_KNOWN_LIBRARIES: &[(&str, DeviceTypeFlags)] = &[
    ("ze_intel_gpu64.dll", DeviceTypeFlags::GPU),
    ("ze_intel_vpu64.dll", DeviceTypeFlags::NPU),
    ("ze_intel_npu64.dll", DeviceTypeFlags::NPU),
];

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
const WELL_KNOWN_LIBRARIES: &[(&str, DeviceTypeFlags)] = &[];

/// Plugin file name prefix and suffix for this platform
#[cfg(target_os = "linux")]
const PLUGIN_PATTERN: (&str, &str) = ("libzeloader_driver_", ".so");

#[cfg(target_os = "macos")]
const PLUGIN_PATTERN: (&str, &str) = ("libzeloader_driver_", ".dylib");

#[cfg(target_os = "windows")]
const PLUGIN_PATTERN: (&str, &str) = ("zeloader_driver_", ".dll");

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const PLUGIN_PATTERN: (&str, &str) = ("libzeloader_driver_", ".so");

/// Which candidate source a scan draws from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiscoverySource {
    /// Built-in null drivers only
    NullDrivers(Vec<BuiltinDriver>),
    /// `ZE_ENABLE_ALT_DRIVERS` libraries only
    AltDrivers,
    /// Manifests, then the search directories
    Platform,
}

/// Enumerates candidate driver components
#[derive(Debug, Clone)]
pub struct DiscoveryScanner {
    null_drivers: Vec<BuiltinDriver>,
    live_null_override: bool,
    alt_drivers: Vec<PathBuf>,
    manifest_dirs: Vec<PathBuf>,
    search_dirs: Vec<PathBuf>,
}

impl DiscoveryScanner {
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            null_drivers: config.null_drivers.clone(),
            live_null_override: config.live_null_override,
            alt_drivers: config.alt_drivers.clone(),
            manifest_dirs: config.manifest_dirs.clone(),
            search_dirs: config.search_dirs.clone(),
        }
    }

    /// The highest priority source that is currently configured
    pub fn source(&self) -> DiscoverySource {
        let null_drivers = if self.live_null_override {
            null_drivers_from_env()
        } else {
            self.null_drivers.clone()
        };

        if !null_drivers.is_empty() {
            DiscoverySource::NullDrivers(null_drivers)
        } else if !self.alt_drivers.is_empty() {
            DiscoverySource::AltDrivers
        } else {
            DiscoverySource::Platform
        }
    }

    /// Start a scan for components that might serve `requested`
    ///
    /// Candidates whose source states classes disjoint from `requested`
    /// are left out; a later scan for those classes yields them.
    pub fn scan(&self, requested: DeviceTypeFlags) -> impl Iterator<Item = ComponentLocator> + '_ {
        self.scan_source(self.source(), requested)
    }

    /// [`scan`](Self::scan) restricted to an already chosen source
    pub fn scan_source(
        &self,
        source: DiscoverySource,
        requested: DeviceTypeFlags,
    ) -> impl Iterator<Item = ComponentLocator> + '_ {
        let candidates: Box<dyn Iterator<Item = ComponentLocator> + '_> = match source {
            DiscoverySource::NullDrivers(drivers) => {
                debug!("Discovery restricted to built-in null drivers");
                Box::new(drivers.into_iter().map(ComponentLocator::builtin))
            }
            DiscoverySource::AltDrivers => {
                debug!("Discovery restricted to {} alternate drivers", self.alt_drivers.len());
                Box::new(self.alt_drivers.iter().map(|path| ComponentLocator::library(path, None)))
            }
            DiscoverySource::Platform => Box::new(
                self.manifest_dirs.iter()
                    .flat_map(|dir| manifest_candidates(dir))
                    .chain(self.search_dirs.iter().flat_map(|dir| library_candidates(dir)))
            ),
        };

        let mut seen = HashSet::new();
        candidates
            .filter(move |locator| seen.insert(locator.kind().clone()))
            .filter(move |locator| locator.may_serve(requested))
    }
}

/// Files in `dir` accepted by `keep`, sorted by name; unreadable dirs yield nothing
fn sorted_entries(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.file_name().and_then(|n| n.to_str()).is_some_and(&keep))
        .collect();

    files.sort();
    files
}

fn manifest_candidates(dir: &Path) -> Vec<ComponentLocator> {
    let mut candidates = Vec::new();

    for path in sorted_entries(dir, |name| name.ends_with(".yaml") || name.ends_with(".yml")) {
        let manifest = match read_manifest(&path) {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!("Skipping manifest {}: {}", path.display(), e);
                continue;
            }
        };

        for entry in manifest.drivers {
            // relative library paths are relative to the manifest
            let library = if entry.library.is_relative() {
                dir.join(&entry.library)
            } else {
                entry.library.clone()
            };
            debug!(
                "Manifest {} lists {}",
                path.display(),
                entry.name.as_deref().unwrap_or(&library.to_string_lossy())
            );
            candidates.push(ComponentLocator::library(library, entry.type_hint()));
        }
    }

    candidates
}

fn library_candidates(dir: &Path) -> Vec<ComponentLocator> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut candidates: Vec<ComponentLocator> = WELL_KNOWN_LIBRARIES
        .iter()
        .map(|(name, types)| (dir.join(name), *types))
        .filter(|(path, _)| path.exists())
        .map(|(path, types)| ComponentLocator::library(path, Some(types)))
        .collect();

    let (prefix, suffix) = PLUGIN_PATTERN;
    candidates.extend(
        sorted_entries(dir, |name| name.starts_with(prefix) && name.ends_with(suffix))
            .into_iter()
            .map(|path| ComponentLocator::library(path, None))
    );

    for candidate in &candidates {
        debug!("Found driver candidate at: {}", candidate);
    }

    candidates
}

/// File name the `zeloader-driver-<name>` plugin crate builds to on this platform
pub fn plugin_filename(driver: &str) -> String {
    let (prefix, suffix) = PLUGIN_PATTERN;
    format!("{}{}{}", prefix, driver.replace('-', "_"), suffix)
}
