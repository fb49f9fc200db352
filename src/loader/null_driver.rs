/*
 *  loader/null_driver.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Built-in null driver for testing without hardware
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

//! Null driver compiled into the loader
//!
//! This driver simulates a device-compute driver without requiring hardware.
//! It is selected by `ZEL_TEST_NULL_DRIVER_TYPE` / `ZE_ENABLE_NULL_DRIVER`
//! and goes through exactly the same vtable validation and dispatch path as
//! a driver loaded from a shared library. It's useful for:
//! - Unit tests
//! - Integration tests
//! - CI/CD pipelines
//!
//! Three variants exist (GPU only, NPU only, both), each a separate static
//! vtable, so several can be registered side by side.

use std::ffi::{c_char, c_void};

use super::ffi::{
    ZelDriverVTable,
    ZelVersion,
    ZeDeviceProperties,
    ZeDriverProperties,
    ZeResult,
    ZeResultRaw,
    ZEL_DRIVER_ABI_VERSION_MAJOR,
    ZEL_DRIVER_ABI_VERSION_MINOR,
    ZEL_DRIVER_ABI_VERSION_PATCH,
    ZE_DEVICE_TYPE_GPU,
    ZE_DEVICE_TYPE_VPU,
    copy_str_to_buffer,
    fill_counted,
};
use super::types::{BuiltinDriver, DeviceTypeFlags};
use crate::{loader_version, LOADER_SPEC_VERSION};

const NULL_VENDOR_ID: u32 = 0x8086;

/// Simulated device
struct NullDevice {
    device_type: u32,
    device_id: u32,
    name: &'static str,
}

/// Simulated driver instance, the target of a raw driver handle
struct NullDriverInstance {
    variant: BuiltinDriver,
    devices: &'static [&'static NullDevice],
}

static GPU_DEVICE: NullDevice = NullDevice {
    device_type: ZE_DEVICE_TYPE_GPU,
    device_id: 0x0001,
    name: "Null GPU Device",
};

static NPU_DEVICE: NullDevice = NullDevice {
    device_type: ZE_DEVICE_TYPE_VPU,
    device_id: 0x0002,
    name: "Null NPU Device",
};

static GPU_DEVICES: [&NullDevice; 1] = [&GPU_DEVICE];
static NPU_DEVICES: [&NullDevice; 1] = [&NPU_DEVICE];
static ALL_DEVICES: [&NullDevice; 2] = [&GPU_DEVICE, &NPU_DEVICE];

static NULL_GPU: NullDriverInstance = NullDriverInstance {
    variant: BuiltinDriver::NullGpu,
    devices: &GPU_DEVICES,
};

static NULL_NPU: NullDriverInstance = NullDriverInstance {
    variant: BuiltinDriver::NullNpu,
    devices: &NPU_DEVICES,
};

static NULL_ALL: NullDriverInstance = NullDriverInstance {
    variant: BuiltinDriver::NullAll,
    devices: &ALL_DEVICES,
};

impl NullDriverInstance {
    fn device_handles(&self) -> Vec<*mut c_void> {
        self.devices.iter().map(|device| as_raw(*device)).collect()
    }
}

fn as_raw<T>(value: &'static T) -> *mut c_void {
    value as *const T as *mut c_void
}

// ============================================================================
// Entry points shared by every variant
// ============================================================================

extern "C" fn abi_version(major: *mut u32, minor: *mut u32, patch: *mut u32) {
    if !major.is_null() && !minor.is_null() && !patch.is_null() {
        unsafe {
            *major = ZEL_DRIVER_ABI_VERSION_MAJOR;
            *minor = ZEL_DRIVER_ABI_VERSION_MINOR;
            *patch = ZEL_DRIVER_ABI_VERSION_PATCH;
        }
    }
}

extern "C" fn versions(lib_version: *mut ZelVersion, spec_version: *mut u32) {
    if lib_version.is_null() || spec_version.is_null() {
        return;
    }
    unsafe {
        *lib_version = loader_version().into();
        *spec_version = LOADER_SPEC_VERSION.encoded();
    }
}

extern "C" fn driver_get_properties(driver: *mut c_void, properties: *mut ZeDriverProperties) -> ZeResultRaw {
    if driver.is_null() {
        return ZeResult::ErrorInvalidNullHandle.raw();
    }
    if properties.is_null() {
        return ZeResult::ErrorInvalidNullPointer.raw();
    }

    let instance = unsafe { &*(driver as *const NullDriverInstance) };
    let version = loader_version();
    let mut uuid = [0u8; 16];
    uuid[0] = instance.variant.device_types().bits() as u8;

    unsafe {
        *properties = ZeDriverProperties {
            driver_version: (version.major << 24) | (version.minor << 16) | version.patch,
            uuid,
        };
    }
    ZeResult::Success.raw()
}

extern "C" fn device_get(driver: *mut c_void, count: *mut u32, devices: *mut *mut c_void) -> ZeResultRaw {
    if driver.is_null() {
        return ZeResult::ErrorInvalidNullHandle.raw();
    }

    let instance = unsafe { &*(driver as *const NullDriverInstance) };
    let handles = instance.device_handles();
    unsafe { fill_counted(&handles, count, devices) }
}

extern "C" fn device_get_properties(device: *mut c_void, properties: *mut ZeDeviceProperties) -> ZeResultRaw {
    if device.is_null() {
        return ZeResult::ErrorInvalidNullHandle.raw();
    }
    if properties.is_null() {
        return ZeResult::ErrorInvalidNullPointer.raw();
    }

    let device = unsafe { &*(device as *const NullDevice) };
    let mut props = ZeDeviceProperties {
        device_type: device.device_type,
        vendor_id: NULL_VENDOR_ID,
        device_id: device.device_id,
        ..Default::default()
    };
    copy_str_to_buffer(device.name, &mut props.name);

    unsafe { *properties = props };
    ZeResult::Success.raw()
}

fn write_name(instance: &NullDriverInstance, name: *mut c_char, capacity: usize) {
    if name.is_null() || capacity == 0 {
        return;
    }
    let buffer = unsafe { std::slice::from_raw_parts_mut(name, capacity) };
    copy_str_to_buffer(instance.variant.name(), buffer);
}

fn init_instance(instance: &NullDriverInstance, flags: u32) -> ZeResultRaw {
    let served = instance.variant.device_types();
    if DeviceTypeFlags::from_bits_truncate(flags).intersects(served) {
        ZeResult::Success.raw()
    } else {
        ZeResult::ErrorUninitialized.raw()
    }
}

fn driver_get_instance(instance: &'static NullDriverInstance, count: *mut u32, drivers: *mut *mut c_void) -> ZeResultRaw {
    unsafe { fill_counted(&[as_raw(instance)], count, drivers) }
}

// ============================================================================
// Per-variant vtables
// ============================================================================

macro_rules! null_driver_variant {
    ($vtable:ident, $instance:ident, $module:ident) => {
        mod $module {
            use super::*;

            pub extern "C" fn component_info(name: *mut c_char, capacity: usize) {
                write_name(&$instance, name, capacity)
            }

            pub extern "C" fn device_types() -> u32 {
                $instance.variant.device_types().bits()
            }

            pub extern "C" fn init(flags: u32) -> ZeResultRaw {
                init_instance(&$instance, flags)
            }

            pub extern "C" fn driver_get(count: *mut u32, drivers: *mut *mut c_void) -> ZeResultRaw {
                driver_get_instance(&$instance, count, drivers)
            }
        }

        static $vtable: ZelDriverVTable = ZelDriverVTable {
            abi_version: Some(abi_version),
            component_info: Some($module::component_info),
            device_types: Some($module::device_types),
            versions: Some(versions),
            init: Some($module::init),
            driver_get: Some($module::driver_get),
            driver_get_properties: Some(driver_get_properties),
            device_get: Some(device_get),
            device_get_properties: Some(device_get_properties),
        };
    };
}

null_driver_variant!(NULL_GPU_VTABLE, NULL_GPU, gpu);
null_driver_variant!(NULL_NPU_VTABLE, NULL_NPU, npu);
null_driver_variant!(NULL_ALL_VTABLE, NULL_ALL, all);

/// Registration entry for a built-in driver, same contract as `zel_driver_register`
pub fn register(driver: BuiltinDriver) -> *const ZelDriverVTable {
    match driver {
        BuiltinDriver::NullGpu => &NULL_GPU_VTABLE,
        BuiltinDriver::NullNpu => &NULL_NPU_VTABLE,
        BuiltinDriver::NullAll => &NULL_ALL_VTABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ffi::c_buffer_to_string;
    use std::ptr;

    fn vtable(driver: BuiltinDriver) -> &'static ZelDriverVTable {
        unsafe { &*register(driver) }
    }

    #[test]
    fn test_variants_report_their_types() {
        let gpu = vtable(BuiltinDriver::NullGpu);
        let npu = vtable(BuiltinDriver::NullNpu);
        let all = vtable(BuiltinDriver::NullAll);

        assert_eq!((gpu.device_types.unwrap())(), DeviceTypeFlags::GPU.bits());
        assert_eq!((npu.device_types.unwrap())(), DeviceTypeFlags::NPU.bits());
        assert_eq!((all.device_types.unwrap())(), DeviceTypeFlags::all().bits());
    }

    #[test]
    fn test_init_requires_matching_type() {
        let gpu = vtable(BuiltinDriver::NullGpu);
        let init = gpu.init.unwrap();
        assert_eq!(init(DeviceTypeFlags::GPU.bits()), ZeResult::Success.raw());
        assert_eq!(init(DeviceTypeFlags::NPU.bits()), ZeResult::ErrorUninitialized.raw());
    }

    #[test]
    fn test_counted_enumeration() {
        let all = vtable(BuiltinDriver::NullAll);

        let mut count = 0u32;
        let mut driver: *mut c_void = ptr::null_mut();
        assert_eq!((all.driver_get.unwrap())(&mut count, ptr::null_mut()), 0);
        assert_eq!(count, 1);
        assert_eq!((all.driver_get.unwrap())(&mut count, &mut driver), 0);
        assert!(!driver.is_null());

        let mut device_count = 0u32;
        (all.device_get.unwrap())(driver, &mut device_count, ptr::null_mut());
        assert_eq!(device_count, 2);

        // ask for fewer than available
        let mut one = 1u32;
        let mut devices = [ptr::null_mut(); 1];
        (all.device_get.unwrap())(driver, &mut one, devices.as_mut_ptr());
        assert_eq!(one, 1);

        let mut props = ZeDeviceProperties::default();
        assert_eq!((all.device_get_properties.unwrap())(devices[0], &mut props), 0);
        assert_eq!(props.device_type, ZE_DEVICE_TYPE_GPU);
        assert_eq!(props.vendor_id, NULL_VENDOR_ID);
        assert_eq!(props.name_str(), "Null GPU Device");
    }

    #[test]
    fn test_component_name() {
        let npu = vtable(BuiltinDriver::NullNpu);
        let mut name = [0 as c_char; 64];
        (npu.component_info.unwrap())(name.as_mut_ptr(), name.len());
        assert_eq!(c_buffer_to_string(&name), "null-npu");
    }
}
