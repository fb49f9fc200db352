/*
 *  loader/registry.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Driver registry - the append-only table of loaded drivers
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

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, warn};

use super::component::{ComponentImage, DispatchTable, LoadedComponent};
use super::ffi::{RawHandle, ZeResult, ZelHandleObject};
use super::types::{ComponentLocator, DeviceTypeFlags, DriverId, DriverVersion, SpecVersion};

/// One successfully loaded driver component
///
/// Created once, published fully formed, never removed.
pub struct DriverEntry {
    id: DriverId,
    locator: ComponentLocator,
    name: String,
    device_types: DeviceTypeFlags,
    driver_version: DriverVersion,
    spec_version: SpecVersion,
    abi_version: (u32, u32, u32),
    dispatch: DispatchTable,
    identity: usize,

    /// Driver instances the component enumerated when it was published
    drivers: Vec<RawHandle>,

    /// Classes the driver's init entry point has accepted so far
    initialized: AtomicU32,

    /// Handle objects given out to C callers, keyed by raw handle value.
    /// Boxed so their addresses stay put for the life of the entry.
    handle_objects: Mutex<HashMap<usize, Box<ZelHandleObject>>>,

    _image: ComponentImage,
}

impl DriverEntry {
    pub fn id(&self) -> DriverId {
        self.id
    }

    pub fn locator(&self) -> &ComponentLocator {
        &self.locator
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Classes the driver declared
    pub fn device_types(&self) -> DeviceTypeFlags {
        self.device_types
    }

    /// Classes the driver has been initialized for
    pub fn initialized_types(&self) -> DeviceTypeFlags {
        DeviceTypeFlags::from_bits_retain(self.initialized.load(Ordering::Acquire))
    }

    pub fn driver_version(&self) -> DriverVersion {
        self.driver_version
    }

    pub fn spec_version(&self) -> SpecVersion {
        self.spec_version
    }

    pub fn abi_version(&self) -> (u32, u32, u32) {
        self.abi_version
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn drivers(&self) -> &[RawHandle] {
        &self.drivers
    }

    /// Whether this entry has been initialized for any of `types`
    pub fn serves(&self, types: DeviceTypeFlags) -> bool {
        self.initialized_types().intersects(types)
    }

    /// Initialize the driver for declared classes in `requested` it has not
    /// been initialized for yet
    ///
    /// Only the init coordinator calls this, under its lock.
    pub(crate) fn extend_init(&self, requested: DeviceTypeFlags) -> Result<(), ZeResult> {
        let missing = (self.device_types & requested) - self.initialized_types();
        if missing.is_empty() {
            return Ok(());
        }

        let result = ZeResult::from_raw((self.dispatch.init)(missing.bits()));
        if !result.is_success() {
            warn!("Driver {} refused init for {}: {:?}", self.name, missing.label(), result);
            return Err(result);
        }

        self.initialized.fetch_or(missing.bits(), Ordering::AcqRel);
        debug!("Driver {} now initialized for {}", self.name, self.initialized_types().label());
        Ok(())
    }

    /// Stable handle object for a raw handle this driver produced
    pub fn intern(&self, raw: RawHandle) -> *mut ZelHandleObject {
        let mut objects = self.handle_objects.lock().unwrap_or_else(PoisonError::into_inner);
        let object = objects
            .entry(raw.as_ptr() as usize)
            .or_insert_with(|| Box::new(ZelHandleObject { owner: self.id.0, raw: raw.as_ptr() }));
        &mut **object as *mut ZelHandleObject
    }
}

impl fmt::Debug for DriverEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverEntry")
            .field("id", &self.id)
            .field("locator", &self.locator)
            .field("name", &self.name)
            .field("device_types", &self.device_types)
            .field("driver_version", &self.driver_version)
            .field("spec_version", &self.spec_version)
            .field("drivers", &self.drivers.len())
            .finish()
    }
}

/// Ordered, append-only table of loaded drivers
///
/// Readers take a shared lock only long enough to clone an `Arc`; calls
/// into drivers never run under the registry lock.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    entries: RwLock<Vec<Arc<DriverEntry>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validated, initialized component and return its id
    pub(crate) fn publish(
        &self,
        component: LoadedComponent,
        drivers: Vec<RawHandle>,
        initialized: DeviceTypeFlags,
    ) -> DriverId {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let id = DriverId(entries.len() as u32);

        entries.push(Arc::new(DriverEntry {
            id,
            locator: component.locator,
            name: component.name,
            device_types: component.device_types,
            driver_version: component.driver_version,
            spec_version: component.spec_version,
            abi_version: component.abi_version,
            dispatch: component.dispatch,
            identity: component.identity,
            drivers,
            initialized: AtomicU32::new(initialized.bits()),
            handle_objects: Mutex::new(HashMap::new()),
            _image: component.image,
        }));

        id
    }

    pub fn get(&self, id: DriverId) -> Option<Arc<DriverEntry>> {
        self.read().get(id.index()).cloned()
    }

    /// Entries in insertion order
    pub fn snapshot(&self) -> Vec<Arc<DriverEntry>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered entry backed by the same component, if any
    pub fn find_identity(&self, identity: usize) -> Option<Arc<DriverEntry>> {
        self.read().iter().find(|entry| entry.identity == identity).cloned()
    }

    /// Number of driver instances initialized for any class in `types`
    pub fn count_matching(&self, types: DeviceTypeFlags) -> u32 {
        self.read()
            .iter()
            .filter(|entry| entry.serves(types))
            .map(|entry| entry.drivers.len() as u32)
            .sum()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<DriverEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}
