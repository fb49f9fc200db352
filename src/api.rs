/*
 *  api.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Exported C entry points
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

//! C surface of the loader
//!
//! Each export is a thin wrapper running its `*_impl` function against
//! [`Loader::global`] with panics caught at the boundary. The `*_impl`
//! functions take the loader explicitly so they can be tested against
//! owned instances.
//!
//! Handles given to C callers are loader-owned [`ZelHandleObject`]s that
//! carry the id of the registry entry owning the driver-side handle.
//!
//! A panic caught at the boundary prints nothing: the first export call
//! installs a panic hook that stays quiet while a guarded body runs and
//! hands every other panic to the hook it replaced.

#![allow(non_snake_case)]

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Once;

use log::debug;

use crate::loader::ffi::{
    fill_counted,
    RawHandle,
    ZeDeviceHandle,
    ZeDeviceProperties,
    ZeDriverHandle,
    ZeDriverProperties,
    ZeInitDriverTypeDesc,
    ZeResult,
    ZelComponentVersion,
    ZelHandleObject,
    ZE_STRUCTURE_TYPE_INIT_DRIVER_TYPE_DESC,
};
use crate::loader::version::write_counted;
use crate::loader::{ComponentVersionRecord, DeviceHandle, DeviceTypeFlags, DriverHandle, DriverId, InitState, Loader};

thread_local! {
    /// Set while this thread runs a guarded entry point body
    static IN_GUARD: Cell<bool> = const { Cell::new(false) };
}

fn install_quiet_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !IN_GUARD.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Marks the current thread as inside a guarded body until dropped
struct GuardScope {
    outer: bool,
}

impl GuardScope {
    fn enter() -> Self {
        install_quiet_panic_hook();
        Self { outer: IN_GUARD.replace(true) }
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        IN_GUARD.set(self.outer);
    }
}

/// Run an entry point body, turning a panic into `ErrorUnknown`
macro_rules! ffi_guard {
    ($code:block) => {{
        let _scope = GuardScope::enter();
        match catch_unwind(AssertUnwindSafe(|| $code)) {
            Ok(result) => result,
            Err(_) => {
                debug!("Panic caught at the C boundary");
                ZeResult::ErrorUnknown
            }
        }
    }};
}

/// # Safety
/// `handle` must be null or a handle object from this loader.
unsafe fn driver_from_c(handle: ZeDriverHandle) -> Result<DriverHandle, ZeResult> {
    if handle.is_null() {
        return Err(ZeResult::ErrorInvalidNullHandle);
    }
    // SAFETY: non-null driver handles are only produced by `intern`
    let object = unsafe { &*handle };
    Ok(DriverHandle::new(DriverId(object.owner), RawHandle(object.raw)))
}

/// # Safety
/// As for [`driver_from_c`].
unsafe fn device_from_c(handle: ZeDeviceHandle) -> Result<DeviceHandle, ZeResult> {
    if handle.is_null() {
        return Err(ZeResult::ErrorInvalidNullHandle);
    }
    // SAFETY: as for driver handles
    let object = unsafe { &*handle };
    Ok(DeviceHandle::new(DriverId(object.owner), RawHandle(object.raw)))
}

/// Loader-owned handle objects for driver-side handles of one owner
fn intern_all(loader: &Loader, owner: DriverId, raw: impl Iterator<Item = RawHandle>) -> Result<Vec<*mut ZelHandleObject>, ZeResult> {
    let entry = loader.registry().get(owner).ok_or(ZeResult::ErrorInvalidNullHandle)?;
    Ok(raw.map(|handle| entry.intern(handle)).collect())
}

fn intern_drivers(loader: &Loader, drivers: &[DriverHandle]) -> Result<Vec<*mut ZelHandleObject>, ZeResult> {
    let mut objects = Vec::with_capacity(drivers.len());
    for driver in drivers {
        objects.extend(intern_all(loader, driver.owner(), std::iter::once(driver.raw()))?);
    }
    Ok(objects)
}

fn status(result: Result<(), ZeResult>) -> ZeResult {
    match result {
        Ok(()) => ZeResult::Success,
        Err(code) => code,
    }
}

// ============================================================================
// Implementations
// ============================================================================

pub fn init_impl(loader: &Loader, flags: u32) -> ZeResult {
    loader.init(flags)
}

/// # Safety
/// `count` and `desc` must be valid or null; `drivers`, when non-null, must
/// have room for `*count` handles.
pub unsafe fn init_drivers_impl(
    loader: &Loader,
    count: *mut u32,
    drivers: *mut ZeDriverHandle,
    desc: *const ZeInitDriverTypeDesc,
) -> ZeResult {
    if count.is_null() || desc.is_null() {
        return ZeResult::ErrorInvalidNullPointer;
    }

    let desc = unsafe { &*desc };
    if desc.stype != ZE_STRUCTURE_TYPE_INIT_DRIVER_TYPE_DESC {
        debug!("Init descriptor has structure type {:#x}", desc.stype);
        return ZeResult::ErrorInvalidArgument;
    }
    // no extension structure is understood yet, so `p_next` is not walked
    let flags = desc.flags;
    if let Err(code) = loader.init_drivers(flags) {
        return code;
    }

    // init accepted the flags, so the same normalization cannot fail here
    let requested = DeviceTypeFlags::normalize(flags, loader.config().flag_policy)
        .unwrap_or(DeviceTypeFlags::ANY);

    status((|| {
        let objects = intern_drivers(loader, &loader.drivers_matching(requested))?;
        ZeResult::from_raw(unsafe { fill_counted(&objects, count, drivers) }).into_result()
    })())
}

/// # Safety
/// As for [`init_drivers_impl`].
pub unsafe fn driver_get_impl(loader: &Loader, count: *mut u32, drivers: *mut ZeDriverHandle) -> ZeResult {
    if count.is_null() {
        return ZeResult::ErrorInvalidNullPointer;
    }
    if loader.init_state() == InitState::Uninitialized {
        return ZeResult::ErrorUninitialized;
    }

    status((|| {
        let objects = intern_drivers(loader, &loader.drivers())?;
        ZeResult::from_raw(unsafe { fill_counted(&objects, count, drivers) }).into_result()
    })())
}

/// # Safety
/// `driver` must be null or a handle from this loader; `version` must be
/// valid or null.
pub unsafe fn driver_get_api_version_impl(loader: &Loader, driver: ZeDriverHandle, version: *mut u32) -> ZeResult {
    status((|| {
        let driver = unsafe { driver_from_c(driver) }?;
        if version.is_null() {
            return Err(ZeResult::ErrorInvalidNullPointer);
        }
        let spec = loader.driver_api_version(&driver)?;
        unsafe { *version = spec.encoded() };
        Ok(())
    })())
}

/// # Safety
/// As for [`driver_get_api_version_impl`].
pub unsafe fn driver_get_properties_impl(
    loader: &Loader,
    driver: ZeDriverHandle,
    properties: *mut ZeDriverProperties,
) -> ZeResult {
    status((|| {
        let driver = unsafe { driver_from_c(driver) }?;
        if properties.is_null() {
            return Err(ZeResult::ErrorInvalidNullPointer);
        }
        let props = loader.driver_properties(&driver)?;
        unsafe { *properties = props };
        Ok(())
    })())
}

/// # Safety
/// `driver` must be null or a handle from this loader; `count` must be
/// valid or null; `devices`, when non-null, must have room for `*count`.
pub unsafe fn device_get_impl(
    loader: &Loader,
    driver: ZeDriverHandle,
    count: *mut u32,
    devices: *mut ZeDeviceHandle,
) -> ZeResult {
    status((|| {
        let driver = unsafe { driver_from_c(driver) }?;
        if count.is_null() {
            return Err(ZeResult::ErrorInvalidNullPointer);
        }
        let found = loader.devices(&driver)?;
        let objects = intern_all(loader, driver.owner(), found.iter().map(|device| device.raw()))?;
        ZeResult::from_raw(unsafe { fill_counted(&objects, count, devices) }).into_result()
    })())
}

/// # Safety
/// `device` must be null or a handle from this loader; `properties` must
/// be valid or null.
pub unsafe fn device_get_properties_impl(
    loader: &Loader,
    device: ZeDeviceHandle,
    properties: *mut ZeDeviceProperties,
) -> ZeResult {
    status((|| {
        let device = unsafe { device_from_c(device) }?;
        if properties.is_null() {
            return Err(ZeResult::ErrorInvalidNullPointer);
        }
        let props = loader.device_properties(&device)?;
        unsafe { *properties = props };
        Ok(())
    })())
}

/// # Safety
/// `count` must be valid or null; `versions`, when non-null, must have room
/// for `*count` records.
pub unsafe fn loader_get_versions_impl(
    loader: &Loader,
    count: *mut usize,
    versions: *mut ZelComponentVersion,
) -> ZeResult {
    if count.is_null() {
        return ZeResult::ErrorInvalidNullPointer;
    }

    // sized and filled from one snapshot, so a concurrent publish cannot
    // make the two disagree
    let records = loader.version_records();
    let mut written = unsafe { *count };
    let out = if versions.is_null() {
        None
    } else {
        Some(unsafe { std::slice::from_raw_parts_mut(versions, written) })
    };

    let result = write_counted(&records, &mut written, out, ComponentVersionRecord::to_ffi);
    unsafe { *count = written };
    result
}

/// # Safety
/// `version` must be valid or null.
pub unsafe fn get_loader_version_impl(loader: &Loader, version: *mut ZelComponentVersion) -> ZeResult {
    if version.is_null() {
        return ZeResult::ErrorInvalidNullPointer;
    }
    unsafe { *version = loader.loader_version().to_ffi() };
    ZeResult::Success
}

// ============================================================================
// Exports
// ============================================================================

#[unsafe(no_mangle)]
pub extern "C" fn zeInit(flags: u32) -> ZeResult {
    ffi_guard!({ init_impl(Loader::global(), flags) })
}

/// # Safety
/// See [`init_drivers_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zeInitDrivers(
    pCount: *mut u32,
    phDrivers: *mut ZeDriverHandle,
    desc: *const ZeInitDriverTypeDesc,
) -> ZeResult {
    ffi_guard!({ unsafe { init_drivers_impl(Loader::global(), pCount, phDrivers, desc) } })
}

/// # Safety
/// See [`driver_get_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zeDriverGet(pCount: *mut u32, phDrivers: *mut ZeDriverHandle) -> ZeResult {
    ffi_guard!({ unsafe { driver_get_impl(Loader::global(), pCount, phDrivers) } })
}

/// # Safety
/// See [`driver_get_api_version_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zeDriverGetApiVersion(hDriver: ZeDriverHandle, version: *mut u32) -> ZeResult {
    ffi_guard!({ unsafe { driver_get_api_version_impl(Loader::global(), hDriver, version) } })
}

/// # Safety
/// See [`driver_get_properties_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zeDriverGetProperties(
    hDriver: ZeDriverHandle,
    pDriverProperties: *mut ZeDriverProperties,
) -> ZeResult {
    ffi_guard!({ unsafe { driver_get_properties_impl(Loader::global(), hDriver, pDriverProperties) } })
}

/// # Safety
/// See [`device_get_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zeDeviceGet(
    hDriver: ZeDriverHandle,
    pCount: *mut u32,
    phDevices: *mut ZeDeviceHandle,
) -> ZeResult {
    ffi_guard!({ unsafe { device_get_impl(Loader::global(), hDriver, pCount, phDevices) } })
}

/// # Safety
/// See [`device_get_properties_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zeDeviceGetProperties(
    hDevice: ZeDeviceHandle,
    pDeviceProperties: *mut ZeDeviceProperties,
) -> ZeResult {
    ffi_guard!({ unsafe { device_get_properties_impl(Loader::global(), hDevice, pDeviceProperties) } })
}

/// # Safety
/// See [`loader_get_versions_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zelLoaderGetVersions(
    num_elems: *mut usize,
    versions: *mut ZelComponentVersion,
) -> ZeResult {
    ffi_guard!({ unsafe { loader_get_versions_impl(Loader::global(), num_elems, versions) } })
}

/// # Safety
/// See [`get_loader_version_impl`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn zelGetLoaderVersion(version: *mut ZelComponentVersion) -> ZeResult {
    ffi_guard!({ unsafe { get_loader_version_impl(Loader::global(), version) } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::loader::ffi::{c_buffer_to_string, ZE_DEVICE_TYPE_VPU};
    use crate::loader::types::BuiltinDriver;
    use std::ptr;

    fn null_loader(null_drivers: Vec<BuiltinDriver>) -> Loader {
        Loader::new(LoaderConfig { null_drivers, ..Default::default() })
    }

    #[test]
    fn test_init_drivers_counted_fill() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu, BuiltinDriver::NullNpu]);
        let desc = ZeInitDriverTypeDesc::new(u32::MAX);

        let mut count = 0u32;
        let result = unsafe { init_drivers_impl(&loader, &mut count, ptr::null_mut(), &desc) };
        assert_eq!(result, ZeResult::Success);
        assert_eq!(count, 2);

        let mut handles = [ptr::null_mut(); 2];
        let result = unsafe { init_drivers_impl(&loader, &mut count, handles.as_mut_ptr(), &desc) };
        assert_eq!(result, ZeResult::Success);
        assert!(handles.iter().all(|h| !h.is_null()));

        // the same driver always maps to the same handle object
        let mut again = [ptr::null_mut(); 2];
        let mut count = 2u32;
        unsafe { driver_get_impl(&loader, &mut count, again.as_mut_ptr()) };
        assert_eq!(handles, again);
    }

    #[test]
    fn test_init_drivers_null_pointers() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu]);
        let desc = ZeInitDriverTypeDesc::new(1);
        let mut count = 0u32;

        assert_eq!(
            unsafe { init_drivers_impl(&loader, ptr::null_mut(), ptr::null_mut(), &desc) },
            ZeResult::ErrorInvalidNullPointer
        );
        assert_eq!(
            unsafe { init_drivers_impl(&loader, &mut count, ptr::null_mut(), ptr::null()) },
            ZeResult::ErrorInvalidNullPointer
        );
        assert_eq!(loader.init_state(), InitState::Uninitialized);
    }

    #[test]
    fn test_driver_get_before_init() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu]);
        let mut count = 0u32;
        assert_eq!(
            unsafe { driver_get_impl(&loader, &mut count, ptr::null_mut()) },
            ZeResult::ErrorUninitialized
        );

        assert_eq!(init_impl(&loader, 0), ZeResult::Success);
        assert_eq!(unsafe { driver_get_impl(&loader, &mut count, ptr::null_mut()) }, ZeResult::Success);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_device_walk_through_c_handles() {
        let loader = null_loader(vec![BuiltinDriver::NullNpu]);
        init_impl(&loader, 0);

        let mut count = 1u32;
        let mut driver: ZeDriverHandle = ptr::null_mut();
        unsafe { driver_get_impl(&loader, &mut count, &mut driver) };

        let mut version = 0u32;
        assert_eq!(unsafe { driver_get_api_version_impl(&loader, driver, &mut version) }, ZeResult::Success);
        assert_eq!(version, crate::LOADER_SPEC_VERSION.encoded());

        let mut props = ZeDriverProperties::default();
        assert_eq!(unsafe { driver_get_properties_impl(&loader, driver, &mut props) }, ZeResult::Success);

        let mut device_count = 0u32;
        unsafe { device_get_impl(&loader, driver, &mut device_count, ptr::null_mut()) };
        assert_eq!(device_count, 1);

        let mut device: ZeDeviceHandle = ptr::null_mut();
        unsafe { device_get_impl(&loader, driver, &mut device_count, &mut device) };

        let mut device_props = ZeDeviceProperties::default();
        assert_eq!(unsafe { device_get_properties_impl(&loader, device, &mut device_props) }, ZeResult::Success);
        assert_eq!(device_props.device_type, ZE_DEVICE_TYPE_VPU);
    }

    #[test]
    fn test_null_handles_rejected() {
        let loader = null_loader(Vec::new());
        let mut version = 0u32;
        let mut count = 0u32;
        let mut props = ZeDeviceProperties::default();

        assert_eq!(
            unsafe { driver_get_api_version_impl(&loader, ptr::null_mut(), &mut version) },
            ZeResult::ErrorInvalidNullHandle
        );
        assert_eq!(
            unsafe { device_get_impl(&loader, ptr::null_mut(), &mut count, ptr::null_mut()) },
            ZeResult::ErrorInvalidNullHandle
        );
        assert_eq!(
            unsafe { device_get_properties_impl(&loader, ptr::null_mut(), &mut props) },
            ZeResult::ErrorInvalidNullHandle
        );

        // well formed but owned by nothing
        let mut stray = ZelHandleObject { owner: 9, raw: ptr::null_mut() };
        assert_eq!(
            unsafe { driver_get_api_version_impl(&loader, &mut stray, &mut version) },
            ZeResult::ErrorInvalidNullHandle
        );
    }

    #[test]
    fn test_versions_two_phase() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu]);
        init_impl(&loader, 0);

        let mut count = 0usize;
        assert_eq!(unsafe { loader_get_versions_impl(&loader, &mut count, ptr::null_mut()) }, ZeResult::Success);
        assert_eq!(count, 2);

        let mut records = vec![ZelComponentVersion::default(); count];
        assert_eq!(
            unsafe { loader_get_versions_impl(&loader, &mut count, records.as_mut_ptr()) },
            ZeResult::Success
        );
        assert_eq!(c_buffer_to_string(&records[0].component_name), "loader");
        assert!(records[0].component_lib_version.major >= 1);
        assert_eq!(c_buffer_to_string(&records[1].component_name), "null-gpu");

        let mut small = vec![ZelComponentVersion::default(); 1];
        let mut count = 1usize;
        assert_eq!(
            unsafe { loader_get_versions_impl(&loader, &mut count, small.as_mut_ptr()) },
            ZeResult::ErrorInvalidSize
        );
        assert_eq!(count, 2);
        assert_eq!(c_buffer_to_string(&small[0].component_name), "");

        assert_eq!(
            unsafe { loader_get_versions_impl(&loader, ptr::null_mut(), ptr::null_mut()) },
            ZeResult::ErrorInvalidNullPointer
        );
    }

    #[test]
    fn test_versions_sized_and_filled_from_one_snapshot() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu]);

        let mut count = 0usize;
        unsafe { loader_get_versions_impl(&loader, &mut count, ptr::null_mut()) };
        assert_eq!(count, 1);

        // a driver is published between the size and fill calls
        init_impl(&loader, 0);

        let mut records = vec![ZelComponentVersion::default(); count];
        assert_eq!(
            unsafe { loader_get_versions_impl(&loader, &mut count, records.as_mut_ptr()) },
            ZeResult::ErrorInvalidSize
        );
        assert_eq!(count, 2);
        assert_eq!(c_buffer_to_string(&records[0].component_name), "");

        // an oversized buffer gets exactly the current records
        let mut records = vec![ZelComponentVersion::default(); 4];
        let mut count = records.len();
        assert_eq!(
            unsafe { loader_get_versions_impl(&loader, &mut count, records.as_mut_ptr()) },
            ZeResult::Success
        );
        assert_eq!(count, 2);
        assert_eq!(c_buffer_to_string(&records[1].component_name), "null-gpu");
        assert_eq!(c_buffer_to_string(&records[2].component_name), "");
    }

    #[test]
    fn test_init_descriptor_structure_type_checked() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu]);
        let mut count = 0u32;

        let mut desc = ZeInitDriverTypeDesc::new(1);
        desc.stype = 0;
        assert_eq!(
            unsafe { init_drivers_impl(&loader, &mut count, ptr::null_mut(), &desc) },
            ZeResult::ErrorInvalidArgument
        );
        assert_eq!(loader.init_state(), InitState::Uninitialized);

        // an extension chain is accepted and left alone
        let extension = 0xfeed_u32;
        let mut desc = ZeInitDriverTypeDesc::new(1);
        desc.p_next = &extension as *const u32 as *const std::ffi::c_void;
        assert_eq!(
            unsafe { init_drivers_impl(&loader, &mut count, ptr::null_mut(), &desc) },
            ZeResult::Success
        );
        assert_eq!(count, 1);
    }

    fn exploding_entry_point() -> ZeResult {
        panic!("driver blew up");
    }

    #[test]
    fn test_panic_contained_at_boundary() {
        let inside = Cell::new(false);
        let result = ffi_guard!({
            inside.set(IN_GUARD.with(Cell::get));
            exploding_entry_point()
        });
        assert_eq!(result, ZeResult::ErrorUnknown);
        assert!(inside.get());
        assert!(!IN_GUARD.with(Cell::get));

        // nested guards restore the outer state
        let after_inner = Cell::new(false);
        let result = ffi_guard!({
            let inner = ffi_guard!({ exploding_entry_point() });
            after_inner.set(IN_GUARD.with(Cell::get));
            inner
        });
        assert_eq!(result, ZeResult::ErrorUnknown);
        assert!(after_inner.get());
        assert!(!IN_GUARD.with(Cell::get));
    }

    #[test]
    fn test_loader_version() {
        let loader = null_loader(Vec::new());
        let mut version = ZelComponentVersion::default();
        assert_eq!(unsafe { get_loader_version_impl(&loader, &mut version) }, ZeResult::Success);
        assert_eq!(c_buffer_to_string(&version.component_name), "loader");
        assert_eq!(
            unsafe { get_loader_version_impl(&loader, ptr::null_mut()) },
            ZeResult::ErrorInvalidNullPointer
        );
    }
}
