/*
 *  zeloader Null Driver Plugin - Driver Implementation
 *
 *  Simulated driver instance and devices behind the zeloader driver vtable
 */

use std::ffi::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ffi::*;

const COMPONENT_NAME: &str = "null-plugin";
const VENDOR_ID: u32 = 0x8086;
const SPEC_VERSION: u32 = (1 << 16) | 12;

/// Selects the served classes (`GPU`, `NPU`, `ALL`)
const TYPE_OVERRIDE_VAR: &str = "ZEL_TEST_NULL_DRIVER_TYPE";

const ALL_TYPES: u32 = ZE_INIT_DRIVER_TYPE_FLAG_GPU | ZE_INIT_DRIVER_TYPE_FLAG_NPU;

/// Simulated device
struct NullDevice {
    class: u32,
    device_type: u32,
    device_id: u32,
    name: &'static str,
}

/// The single driver instance
struct NullDriver {
    /// Classes the loader asked us to initialize
    initialized: AtomicU32,
}

static GPU_DEVICE: NullDevice = NullDevice {
    class: ZE_INIT_DRIVER_TYPE_FLAG_GPU,
    device_type: ZE_DEVICE_TYPE_GPU,
    device_id: 0x0101,
    name: "Null Plugin GPU Device",
};

static NPU_DEVICE: NullDevice = NullDevice {
    class: ZE_INIT_DRIVER_TYPE_FLAG_NPU,
    device_type: ZE_DEVICE_TYPE_VPU,
    device_id: 0x0102,
    name: "Null Plugin NPU Device",
};

static DEVICES: [&NullDevice; 2] = [&GPU_DEVICE, &NPU_DEVICE];

static DRIVER: NullDriver = NullDriver {
    initialized: AtomicU32::new(0),
};

/// Served classes, from the environment at the time of the call
fn served_types() -> u32 {
    let value = std::env::var(TYPE_OVERRIDE_VAR).unwrap_or_default();
    match value.trim().to_ascii_uppercase().as_str() {
        "GPU" => ZE_INIT_DRIVER_TYPE_FLAG_GPU,
        "NPU" | "VPU" => ZE_INIT_DRIVER_TYPE_FLAG_NPU,
        _ => ALL_TYPES,
    }
}

fn as_raw<T>(value: &'static T) -> *mut c_void {
    value as *const T as *mut c_void
}

/// Counted-array convention shared with the loader
unsafe fn fill_counted(items: &[*mut c_void], count: *mut u32, out: *mut *mut c_void) -> ZeResultRaw {
    if count.is_null() {
        return ZE_RESULT_ERROR_INVALID_NULL_POINTER;
    }

    let requested = *count;
    if out.is_null() || requested == 0 {
        *count = items.len() as u32;
        return ZE_RESULT_SUCCESS;
    }

    let filled = (requested as usize).min(items.len());
    for (i, item) in items.iter().take(filled).enumerate() {
        *out.add(i) = *item;
    }
    *count = filled as u32;
    ZE_RESULT_SUCCESS
}

/// Helper macro to catch panics at FFI boundary
macro_rules! catch_panic {
    ($code:block) => {
        match catch_unwind(AssertUnwindSafe(|| $code)) {
            Ok(result) => result,
            Err(_) => {
                #[cfg(feature = "debug-logging")]
                log::error!("{}: panic at the driver boundary", COMPONENT_NAME);
                ZE_RESULT_ERROR_UNKNOWN
            }
        }
    };
}

// ============================================================================
// FFI Vtable Implementations
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

extern "C" fn component_info(name: *mut c_char, capacity: usize) {
    copy_str_to_buffer(COMPONENT_NAME, name, capacity);
}

extern "C" fn device_types() -> u32 {
    served_types()
}

extern "C" fn versions(lib_version: *mut ZelVersion, spec_version: *mut u32) {
    if lib_version.is_null() || spec_version.is_null() {
        return;
    }
    unsafe {
        *lib_version = ZelVersion {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(1),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        };
        *spec_version = SPEC_VERSION;
    }
}

extern "C" fn init(flags: u32) -> ZeResultRaw {
    catch_panic!({
        let accepted = flags & served_types();
        if accepted == 0 {
            return ZE_RESULT_ERROR_UNINITIALIZED;
        }
        DRIVER.initialized.fetch_or(accepted, Ordering::SeqCst);

        #[cfg(feature = "debug-logging")]
        log::debug!("{}: initialized for {:#x}", COMPONENT_NAME, accepted);

        ZE_RESULT_SUCCESS
    })
}

extern "C" fn driver_get(count: *mut u32, drivers: *mut *mut c_void) -> ZeResultRaw {
    catch_panic!({
        let handles = [as_raw(&DRIVER)];
        unsafe { fill_counted(&handles, count, drivers) }
    })
}

extern "C" fn driver_get_properties(driver: *mut c_void, properties: *mut ZeDriverProperties) -> ZeResultRaw {
    catch_panic!({
        if driver.is_null() {
            return ZE_RESULT_ERROR_INVALID_NULL_HANDLE;
        }
        if properties.is_null() {
            return ZE_RESULT_ERROR_INVALID_NULL_POINTER;
        }

        let mut uuid = [0u8; 16];
        uuid[..COMPONENT_NAME.len()].copy_from_slice(COMPONENT_NAME.as_bytes());
        unsafe {
            *properties = ZeDriverProperties {
                driver_version: 1 << 24,
                uuid,
            };
        }
        ZE_RESULT_SUCCESS
    })
}

extern "C" fn device_get(driver: *mut c_void, count: *mut u32, devices: *mut *mut c_void) -> ZeResultRaw {
    catch_panic!({
        if driver.is_null() {
            return ZE_RESULT_ERROR_INVALID_NULL_HANDLE;
        }

        let served = served_types();
        let handles: Vec<*mut c_void> = DEVICES.iter()
            .filter(|device| device.class & served != 0)
            .map(|device| as_raw(*device))
            .collect();
        unsafe { fill_counted(&handles, count, devices) }
    })
}

extern "C" fn device_get_properties(device: *mut c_void, properties: *mut ZeDeviceProperties) -> ZeResultRaw {
    catch_panic!({
        if device.is_null() {
            return ZE_RESULT_ERROR_INVALID_NULL_HANDLE;
        }
        if properties.is_null() {
            return ZE_RESULT_ERROR_INVALID_NULL_POINTER;
        }

        let device = unsafe { &*(device as *const NullDevice) };
        let mut props = ZeDeviceProperties {
            device_type: device.device_type,
            vendor_id: VENDOR_ID,
            device_id: device.device_id,
            name: [0; ZE_MAX_DEVICE_NAME],
        };
        copy_str_to_buffer(device.name, props.name.as_mut_ptr(), ZE_MAX_DEVICE_NAME);

        unsafe { *properties = props };
        ZE_RESULT_SUCCESS
    })
}

// ============================================================================
// Plugin Registration
// ============================================================================

/// Static vtable
static VTABLE: ZelDriverVTable = ZelDriverVTable {
    abi_version: Some(abi_version),
    component_info: Some(component_info),
    device_types: Some(device_types),
    versions: Some(versions),
    init: Some(init),
    driver_get: Some(driver_get),
    driver_get_properties: Some(driver_get_properties),
    device_get: Some(device_get),
    device_get_properties: Some(device_get_properties),
};

/// Driver entry point - returns the vtable
#[no_mangle]
pub extern "C" fn zel_driver_register() -> *const ZelDriverVTable {
    &VTABLE
}
