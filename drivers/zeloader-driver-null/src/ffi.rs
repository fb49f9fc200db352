/*
 *  zeloader Null Driver Plugin - FFI Types
 *
 *  C ABI types matching the zeloader driver interface
 *  These types must match exactly with the loader's FFI types
 */

use std::ffi::{c_char, c_void};

/// Driver ABI version
pub const ZEL_DRIVER_ABI_VERSION_MAJOR: u32 = 1;
pub const ZEL_DRIVER_ABI_VERSION_MINOR: u32 = 0;
pub const ZEL_DRIVER_ABI_VERSION_PATCH: u32 = 0;

pub const ZE_MAX_DEVICE_NAME: usize = 256;

/// Device class bits
pub const ZE_INIT_DRIVER_TYPE_FLAG_GPU: u32 = 1 << 0;
pub const ZE_INIT_DRIVER_TYPE_FLAG_NPU: u32 = 1 << 1;

/// Device type reported in device properties
pub const ZE_DEVICE_TYPE_GPU: u32 = 1;
pub const ZE_DEVICE_TYPE_VPU: u32 = 5;

/// Result codes (subset)
pub type ZeResultRaw = u32;
pub const ZE_RESULT_SUCCESS: ZeResultRaw = 0;
pub const ZE_RESULT_ERROR_UNINITIALIZED: ZeResultRaw = 0x7800_0001;
pub const ZE_RESULT_ERROR_INVALID_NULL_HANDLE: ZeResultRaw = 0x7800_0005;
pub const ZE_RESULT_ERROR_INVALID_NULL_POINTER: ZeResultRaw = 0x7800_0007;
pub const ZE_RESULT_ERROR_UNKNOWN: ZeResultRaw = 0x7fff_fffe;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeDriverProperties {
    pub driver_version: u32,
    pub uuid: [u8; 16],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ZeDeviceProperties {
    pub device_type: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub name: [c_char; ZE_MAX_DEVICE_NAME],
}

/// Driver vtable - must match the loader's layout field for field
#[repr(C)]
pub struct ZelDriverVTable {
    pub abi_version: Option<extern "C" fn(*mut u32, *mut u32, *mut u32)>,
    pub component_info: Option<extern "C" fn(*mut c_char, usize)>,
    pub device_types: Option<extern "C" fn() -> u32>,
    pub versions: Option<extern "C" fn(*mut ZelVersion, *mut u32)>,
    pub init: Option<extern "C" fn(u32) -> ZeResultRaw>,
    pub driver_get: Option<extern "C" fn(*mut u32, *mut *mut c_void) -> ZeResultRaw>,
    pub driver_get_properties: Option<extern "C" fn(*mut c_void, *mut ZeDriverProperties) -> ZeResultRaw>,
    pub device_get: Option<extern "C" fn(*mut c_void, *mut u32, *mut *mut c_void) -> ZeResultRaw>,
    pub device_get_properties: Option<extern "C" fn(*mut c_void, *mut ZeDeviceProperties) -> ZeResultRaw>,
}

/// Helper to copy a Rust string into a fixed C buffer
pub fn copy_str_to_buffer(s: &str, buffer: *mut c_char, max_len: usize) {
    if buffer.is_null() || max_len == 0 {
        return;
    }

    let bytes = s.as_bytes();
    let len = bytes.len().min(max_len - 1);

    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buffer, len);
        *buffer.add(len) = 0;
    }
}
