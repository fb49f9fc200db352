/*
 *  loader/ffi.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  C ABI types shared between the loader, its callers and driver components
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

//! FFI types for the zeloader driver interface
//!
//! This module defines C-compatible types that form the stable ABI
//! between the loader, the applications calling it and the driver
//! components it loads. All types use `#[repr(C)]` to ensure consistent
//! memory layout across compilation units.
//!
//! Driver functions return raw `u32` result codes. They are converted with
//! [`ZeResult::from_raw`] so an unexpected value from a driver can never
//! become an invalid enum discriminant on the Rust side.

use std::ffi::{c_char, c_void};

/// Driver ABI version
pub const ZEL_DRIVER_ABI_VERSION_MAJOR: u32 = 1;
pub const ZEL_DRIVER_ABI_VERSION_MINOR: u32 = 0;
pub const ZEL_DRIVER_ABI_VERSION_PATCH: u32 = 0;

/// Size of fixed component name buffers
pub const ZEL_COMPONENT_STRING_SIZE: usize = 64;

/// Size of fixed device name buffers
pub const ZE_MAX_DEVICE_NAME: usize = 256;

/// Largest driver-reported count the loader will allocate room for
pub const ZEL_MAX_COUNTED_HANDLES: u32 = 1 << 16;

/// Symbol every driver component must export
pub const ZEL_DRIVER_REGISTER_SYMBOL: &[u8] = b"zel_driver_register\0";

/// Structure type tag for [`ZeInitDriverTypeDesc`]
pub const ZE_STRUCTURE_TYPE_INIT_DRIVER_TYPE_DESC: u32 = 0x0002_0021;

/// Legacy init flags
pub const ZE_INIT_FLAG_GPU_ONLY: u32 = 1 << 0;
pub const ZE_INIT_FLAG_VPU_ONLY: u32 = 1 << 1;

/// Device type bits used by the type-filtered init call
pub const ZE_INIT_DRIVER_TYPE_FLAG_GPU: u32 = 1 << 0;
pub const ZE_INIT_DRIVER_TYPE_FLAG_NPU: u32 = 1 << 1;

/// Device type reported in device properties
pub const ZE_DEVICE_TYPE_GPU: u32 = 1;
pub const ZE_DEVICE_TYPE_VPU: u32 = 5;

/// Raw result code as it crosses the driver boundary
pub type ZeResultRaw = u32;

/// Result codes returned by the loader entry points
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZeResult {
    /// Operation completed successfully
    Success = 0,

    /// Asynchronous operation not complete
    NotReady = 1,

    /// Device hung, reset or was removed
    ErrorDeviceLost = 0x7000_0001,

    /// Insufficient host memory
    ErrorOutOfHostMemory = 0x7000_0002,

    /// Driver is not initialized
    ErrorUninitialized = 0x7800_0001,

    /// Version of the driver interface is not supported
    ErrorUnsupportedVersion = 0x7800_0002,

    /// Feature is not supported
    ErrorUnsupportedFeature = 0x7800_0003,

    /// Generic invalid argument
    ErrorInvalidArgument = 0x7800_0004,

    /// Handle argument is not valid
    ErrorInvalidNullHandle = 0x7800_0005,

    /// Null pointer passed where non-null expected
    ErrorInvalidNullPointer = 0x7800_0007,

    /// Size argument is invalid
    ErrorInvalidSize = 0x7800_0008,

    /// Enumerator argument is not valid
    ErrorInvalidEnumeration = 0x7800_000c,

    /// Unknown or internal error
    ErrorUnknown = 0x7fff_fffe,
}

impl ZeResult {
    /// Convert a raw code returned by a driver
    pub fn from_raw(raw: ZeResultRaw) -> Self {
        match raw {
            0 => ZeResult::Success,
            1 => ZeResult::NotReady,
            0x7000_0001 => ZeResult::ErrorDeviceLost,
            0x7000_0002 => ZeResult::ErrorOutOfHostMemory,
            0x7800_0001 => ZeResult::ErrorUninitialized,
            0x7800_0002 => ZeResult::ErrorUnsupportedVersion,
            0x7800_0003 => ZeResult::ErrorUnsupportedFeature,
            0x7800_0004 => ZeResult::ErrorInvalidArgument,
            0x7800_0005 => ZeResult::ErrorInvalidNullHandle,
            0x7800_0007 => ZeResult::ErrorInvalidNullPointer,
            0x7800_0008 => ZeResult::ErrorInvalidSize,
            0x7800_000c => ZeResult::ErrorInvalidEnumeration,
            _ => ZeResult::ErrorUnknown,
        }
    }

    pub fn raw(self) -> ZeResultRaw {
        self as u32
    }

    pub fn is_success(self) -> bool {
        self == ZeResult::Success
    }

    /// `Ok(())` on success, the code itself otherwise
    pub fn into_result(self) -> Result<(), ZeResult> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }
}

/// Structured library version of a component
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Version record reported for one loaded component
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ZelComponentVersion {
    /// Component name (null-terminated)
    pub component_name: [c_char; ZEL_COMPONENT_STRING_SIZE],

    /// API contract revision, encoded `(major << 16) | minor`
    pub spec_version: u32,

    /// Component library version
    pub component_lib_version: ZelVersion,
}

impl Default for ZelComponentVersion {
    fn default() -> Self {
        Self {
            component_name: [0; ZEL_COMPONENT_STRING_SIZE],
            spec_version: 0,
            component_lib_version: ZelVersion::default(),
        }
    }
}

/// Descriptor passed to the type-filtered init call
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ZeInitDriverTypeDesc {
    /// Structure type, expected [`ZE_STRUCTURE_TYPE_INIT_DRIVER_TYPE_DESC`]
    pub stype: u32,

    /// Extension chain, reserved for future parameters
    pub p_next: *const c_void,

    /// Requested device type bits
    pub flags: u32,
}

impl ZeInitDriverTypeDesc {
    pub fn new(flags: u32) -> Self {
        Self {
            stype: ZE_STRUCTURE_TYPE_INIT_DRIVER_TYPE_DESC,
            p_next: std::ptr::null(),
            flags,
        }
    }
}

/// Driver properties as reported by a driver
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeDriverProperties {
    /// Driver implementation version
    pub driver_version: u32,

    /// Vendor specific identity bits
    pub uuid: [u8; 16],
}

/// Device properties as reported by a driver
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ZeDeviceProperties {
    /// `ZE_DEVICE_TYPE_*`
    pub device_type: u32,

    pub vendor_id: u32,

    pub device_id: u32,

    /// Device name (null-terminated)
    pub name: [c_char; ZE_MAX_DEVICE_NAME],
}

impl Default for ZeDeviceProperties {
    fn default() -> Self {
        Self {
            device_type: 0,
            vendor_id: 0,
            device_id: 0,
            name: [0; ZE_MAX_DEVICE_NAME],
        }
    }
}

impl ZeDeviceProperties {
    pub fn name_str(&self) -> String {
        c_buffer_to_string(&self.name)
    }
}

impl std::fmt::Debug for ZeDeviceProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeDeviceProperties")
            .field("device_type", &self.device_type)
            .field("vendor_id", &format_args!("{:#06x}", self.vendor_id))
            .field("device_id", &format_args!("{:#06x}", self.device_id))
            .field("name", &self.name_str())
            .finish()
    }
}

/// Loader-owned handle object handed to C callers
///
/// Every driver or device handle given out through the C entry points
/// points at one of these. The owner id routes later calls to the driver
/// that produced `raw`.
#[repr(C)]
#[derive(Debug)]
pub struct ZelHandleObject {
    pub owner: u32,
    pub raw: *mut c_void,
}

// SAFETY: `raw` is an opaque token only ever passed back to the driver that
// produced it; the loader never dereferences it
unsafe impl Send for ZelHandleObject {}
unsafe impl Sync for ZelHandleObject {}

pub type ZeDriverHandle = *mut ZelHandleObject;
pub type ZeDeviceHandle = *mut ZelHandleObject;

/// Driver-produced handle value, opaque to the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub *mut c_void);

// SAFETY: see `ZelHandleObject`
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Driver vtable - function pointers for every mandatory entry point
///
/// Pointers are nullable on the C side; the component loader rejects a
/// driver whose table has any of them missing.
#[repr(C)]
pub struct ZelDriverVTable {
    /// Get driver ABI version (major, minor, patch)
    pub abi_version: Option<extern "C" fn(
        major: *mut u32,
        minor: *mut u32,
        patch: *mut u32
    )>,

    /// Copy the component name into `name` (at most `capacity` bytes incl. NUL)
    pub component_info: Option<extern "C" fn(
        name: *mut c_char,
        capacity: usize
    )>,

    /// Device classes supported by this driver (`ZE_INIT_DRIVER_TYPE_FLAG_*`)
    pub device_types: Option<extern "C" fn() -> u32>,

    /// Library version and spec version
    pub versions: Option<extern "C" fn(
        lib_version: *mut ZelVersion,
        spec_version: *mut u32
    )>,

    /// Initialize the driver for the given device type bits
    pub init: Option<extern "C" fn(flags: u32) -> ZeResultRaw>,

    /// Counted-array enumeration of driver instances
    pub driver_get: Option<extern "C" fn(
        count: *mut u32,
        drivers: *mut *mut c_void
    ) -> ZeResultRaw>,

    pub driver_get_properties: Option<extern "C" fn(
        driver: *mut c_void,
        properties: *mut ZeDriverProperties
    ) -> ZeResultRaw>,

    /// Counted-array enumeration of devices of one driver instance
    pub device_get: Option<extern "C" fn(
        driver: *mut c_void,
        count: *mut u32,
        devices: *mut *mut c_void
    ) -> ZeResultRaw>,

    pub device_get_properties: Option<extern "C" fn(
        device: *mut c_void,
        properties: *mut ZeDeviceProperties
    ) -> ZeResultRaw>,
}

/// Driver registration function type
///
/// Each driver component must export a function with this signature:
/// ```c
/// const zel_driver_vtable_t *zel_driver_register(void);
/// ```
pub type DriverRegisterFn = extern "C" fn() -> *const ZelDriverVTable;

/// Counted-array convention: null `out` or `*count == 0` reports the total,
/// otherwise up to `*count` entries are written and `*count` is updated.
///
/// # Safety
/// `count` must be valid for reads and writes; `out`, when non-null, must
/// have room for `*count` entries.
pub unsafe fn fill_counted<T: Copy>(items: &[T], count: *mut u32, out: *mut T) -> ZeResultRaw {
    if count.is_null() {
        return ZeResult::ErrorInvalidNullPointer.raw();
    }

    let requested = unsafe { *count };
    if out.is_null() || requested == 0 {
        unsafe { *count = items.len() as u32 };
        return ZeResult::Success.raw();
    }

    let filled = (requested as usize).min(items.len());
    for (i, item) in items.iter().take(filled).enumerate() {
        unsafe { *out.add(i) = *item };
    }
    unsafe { *count = filled as u32 };
    ZeResult::Success.raw()
}

/// Zeroed room for `count` handles reported by a driver
///
/// Counts above [`ZEL_MAX_COUNTED_HANDLES`], or ones the allocator cannot
/// satisfy, come back as `ErrorOutOfHostMemory` instead of aborting.
pub fn counted_buffer(count: u32) -> Result<Vec<*mut c_void>, ZeResult> {
    if count > ZEL_MAX_COUNTED_HANDLES {
        return Err(ZeResult::ErrorOutOfHostMemory);
    }

    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(count as usize)
        .map_err(|_| ZeResult::ErrorOutOfHostMemory)?;
    buffer.resize(count as usize, std::ptr::null_mut());
    Ok(buffer)
}

/// Encode a spec version the way the C surface carries it
pub const fn encode_api_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | minor as u32
}

/// Copy `value` into a fixed C buffer, always null-terminating
pub fn copy_str_to_buffer(value: &str, buffer: &mut [c_char]) {
    if buffer.is_empty() {
        return;
    }

    let bytes = value.as_bytes();
    let len = bytes.len().min(buffer.len() - 1);

    for (i, &byte) in bytes.iter().take(len).enumerate() {
        buffer[i] = byte as c_char;
    }
    buffer[len] = 0;
}

/// Extract a null-terminated string from a C buffer
pub fn c_buffer_to_string(buffer: &[c_char]) -> String {
    let len = buffer.iter()
        .position(|&c| c == 0)
        .unwrap_or(buffer.len());

    let bytes: Vec<u8> = buffer[..len]
        .iter()
        .map(|&c| c as u8)
        .collect();

    String::from_utf8_lossy(&bytes).into_owned()
}
