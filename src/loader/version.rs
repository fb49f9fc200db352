/*
 *  loader/version.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Version reporter - names and versions of every loaded component
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

use super::ffi::{copy_str_to_buffer, ZeResult, ZelComponentVersion};
use super::registry::{DriverEntry, DriverRegistry};
use super::types::{DriverVersion, SpecVersion};
use crate::{loader_version, LOADER_COMPONENT_NAME, LOADER_SPEC_VERSION};

/// Externally reported name and versions of one component
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComponentVersionRecord {
    pub component_name: String,
    pub library_version: DriverVersion,
    pub spec_version: SpecVersion,
}

impl ComponentVersionRecord {
    /// The loader's own record
    pub fn loader() -> Self {
        Self {
            component_name: LOADER_COMPONENT_NAME.to_string(),
            library_version: loader_version(),
            spec_version: LOADER_SPEC_VERSION,
        }
    }

    pub fn from_entry(entry: &DriverEntry) -> Self {
        Self {
            component_name: entry.name().to_string(),
            library_version: entry.driver_version(),
            spec_version: entry.spec_version(),
        }
    }

    pub fn to_ffi(&self) -> ZelComponentVersion {
        let mut record = ZelComponentVersion {
            spec_version: self.spec_version.encoded(),
            component_lib_version: self.library_version.into(),
            ..Default::default()
        };
        copy_str_to_buffer(&self.component_name, &mut record.component_name);
        record
    }
}

/// Loader record first, then one per registry entry in registry order
pub fn records(registry: &DriverRegistry) -> Vec<ComponentVersionRecord> {
    std::iter::once(ComponentVersionRecord::loader())
        .chain(registry.snapshot().iter().map(|entry| ComponentVersionRecord::from_entry(entry)))
        .collect()
}

/// Two-phase version query
///
/// With no buffer, `count` receives the number of records. With a buffer,
/// `count` is its capacity on input: at least that many records must fit,
/// otherwise nothing is written, `count` receives the required number and
/// `ErrorInvalidSize` is returned. On success `count` is the number written.
pub fn versions(
    registry: &DriverRegistry,
    count: &mut usize,
    out: Option<&mut [ComponentVersionRecord]>,
) -> ZeResult {
    write_counted(&records(registry), count, out, ComponentVersionRecord::clone)
}

/// The [`versions`] protocol over records already collected, each written
/// through `project`
pub fn write_counted<T>(
    records: &[ComponentVersionRecord],
    count: &mut usize,
    out: Option<&mut [T]>,
    project: impl Fn(&ComponentVersionRecord) -> T,
) -> ZeResult {
    let Some(out) = out else {
        *count = records.len();
        return ZeResult::Success;
    };

    let capacity = (*count).min(out.len());
    if capacity < records.len() {
        *count = records.len();
        return ZeResult::ErrorInvalidSize;
    }

    for (slot, record) in out.iter_mut().zip(records) {
        *slot = project(record);
    }
    *count = records.len();
    ZeResult::Success
}
