/*
 *  loader/dispatch.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Dispatch trampoline - routes calls to the driver owning a handle
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

use std::sync::Arc;

use super::ffi::{counted_buffer, RawHandle, ZeDeviceProperties, ZeDriverProperties, ZeResult};
use super::registry::{DriverEntry, DriverRegistry};
use super::types::{DeviceTypeFlags, DriverId, SpecVersion};

/// A driver instance, tagged with the registry entry that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverHandle {
    owner: DriverId,
    raw: RawHandle,
}

/// A device, tagged with the registry entry whose driver produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    owner: DriverId,
    raw: RawHandle,
}

impl DriverHandle {
    pub(crate) fn new(owner: DriverId, raw: RawHandle) -> Self {
        Self { owner, raw }
    }

    pub fn owner(&self) -> DriverId {
        self.owner
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl DeviceHandle {
    pub(crate) fn new(owner: DriverId, raw: RawHandle) -> Self {
        Self { owner, raw }
    }

    pub fn owner(&self) -> DriverId {
        self.owner
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

/// Owning entry for a handle's tag
pub fn resolve(registry: &DriverRegistry, owner: DriverId) -> Result<Arc<DriverEntry>, ZeResult> {
    registry.get(owner).ok_or(ZeResult::ErrorInvalidNullHandle)
}

/// Every driver instance, registry order then per-driver order
pub fn drivers(registry: &DriverRegistry) -> Vec<DriverHandle> {
    collect_drivers(registry.snapshot().iter())
}

/// Driver instances of entries initialized for any class in `types`
pub fn drivers_matching(registry: &DriverRegistry, types: DeviceTypeFlags) -> Vec<DriverHandle> {
    collect_drivers(registry.snapshot().iter().filter(|entry| entry.serves(types)))
}

fn collect_drivers<'a>(entries: impl Iterator<Item = &'a Arc<DriverEntry>>) -> Vec<DriverHandle> {
    entries
        .flat_map(|entry| {
            let owner = entry.id();
            entry.drivers().iter().map(move |raw| DriverHandle::new(owner, *raw))
        })
        .collect()
}

pub fn driver_properties(registry: &DriverRegistry, driver: &DriverHandle) -> Result<ZeDriverProperties, ZeResult> {
    let entry = resolve(registry, driver.owner)?;
    let mut properties = ZeDriverProperties::default();
    ZeResult::from_raw((entry.dispatch().driver_get_properties)(driver.raw.as_ptr(), &mut properties))
        .into_result()?;
    Ok(properties)
}

/// Spec version the owning driver reported at load time
pub fn driver_api_version(registry: &DriverRegistry, driver: &DriverHandle) -> Result<SpecVersion, ZeResult> {
    resolve(registry, driver.owner).map(|entry| entry.spec_version())
}

/// Devices of one driver instance, tagged with the same owner
pub fn devices(registry: &DriverRegistry, driver: &DriverHandle) -> Result<Vec<DeviceHandle>, ZeResult> {
    let entry = resolve(registry, driver.owner)?;
    let device_get = entry.dispatch().device_get;

    let mut count = 0u32;
    ZeResult::from_raw(device_get(driver.raw.as_ptr(), &mut count, std::ptr::null_mut())).into_result()?;

    let mut raw = counted_buffer(count)?;
    if count > 0 {
        ZeResult::from_raw(device_get(driver.raw.as_ptr(), &mut count, raw.as_mut_ptr())).into_result()?;
        raw.truncate(count as usize);
    }

    Ok(raw.into_iter().map(|device| DeviceHandle::new(driver.owner, RawHandle(device))).collect())
}

pub fn device_properties(registry: &DriverRegistry, device: &DeviceHandle) -> Result<ZeDeviceProperties, ZeResult> {
    let entry = resolve(registry, device.owner)?;
    let mut properties = ZeDeviceProperties::default();
    ZeResult::from_raw((entry.dispatch().device_get_properties)(device.raw.as_ptr(), &mut properties))
        .into_result()?;
    Ok(properties)
}
