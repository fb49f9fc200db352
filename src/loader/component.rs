/*
 *  loader/component.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Component loader - binds driver components and validates their vtables
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

use std::ffi::c_void;
use std::fmt;

use log::{debug, info};
#[cfg(feature = "plugin-system")]
use libloading::Library;

use super::ffi::{
    ZelDriverVTable,
    ZelVersion,
    ZeDeviceProperties,
    ZeDriverProperties,
    ZeResultRaw,
    ZEL_COMPONENT_STRING_SIZE,
    ZEL_DRIVER_ABI_VERSION_MAJOR,
    ZEL_DRIVER_ABI_VERSION_MINOR,
    ZEL_DRIVER_ABI_VERSION_PATCH,
};
#[cfg(feature = "plugin-system")]
use super::ffi::{DriverRegisterFn, ZEL_DRIVER_REGISTER_SYMBOL};
use super::null_driver;
use super::types::{ComponentLocator, DeviceTypeFlags, DriverVersion, LocatorKind, SpecVersion};
use crate::error::LoadFailure;

/// Resolved entry points of one driver
///
/// Built once from a validated vtable and never changed afterwards.
#[derive(Clone, Copy)]
pub struct DispatchTable {
    pub init: extern "C" fn(flags: u32) -> ZeResultRaw,
    pub driver_get: extern "C" fn(count: *mut u32, drivers: *mut *mut c_void) -> ZeResultRaw,
    pub driver_get_properties: extern "C" fn(driver: *mut c_void, properties: *mut ZeDriverProperties) -> ZeResultRaw,
    pub device_get: extern "C" fn(driver: *mut c_void, count: *mut u32, devices: *mut *mut c_void) -> ZeResultRaw,
    pub device_get_properties: extern "C" fn(device: *mut c_void, properties: *mut ZeDeviceProperties) -> ZeResultRaw,
}

impl DispatchTable {
    /// Names of the dispatched entry points, in table order
    pub const ENTRY_POINTS: [&'static str; 5] = [
        "init",
        "driver_get",
        "driver_get_properties",
        "device_get",
        "device_get_properties",
    ];

    fn from_vtable(vtable: &ZelDriverVTable) -> Result<Self, LoadFailure> {
        Ok(Self {
            init: vtable.init.ok_or(LoadFailure::MissingEntryPoint("init"))?,
            driver_get: vtable.driver_get.ok_or(LoadFailure::MissingEntryPoint("driver_get"))?,
            driver_get_properties: vtable.driver_get_properties
                .ok_or(LoadFailure::MissingEntryPoint("driver_get_properties"))?,
            device_get: vtable.device_get.ok_or(LoadFailure::MissingEntryPoint("device_get"))?,
            device_get_properties: vtable.device_get_properties
                .ok_or(LoadFailure::MissingEntryPoint("device_get_properties"))?,
        })
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("entry_points", &Self::ENTRY_POINTS)
            .finish()
    }
}

/// Keeps the code behind a dispatch table mapped
pub enum ComponentImage {
    /// The shared library (must be kept alive)
    #[cfg(feature = "plugin-system")]
    Library(Library),

    /// Compiled into the loader
    Builtin,
}

impl fmt::Debug for ComponentImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "plugin-system")]
            ComponentImage::Library(_) => f.write_str("Library"),
            ComponentImage::Builtin => f.write_str("Builtin"),
        }
    }
}

/// A component that passed every check, ready to be published
#[derive(Debug)]
pub struct LoadedComponent {
    pub locator: ComponentLocator,
    pub name: String,
    pub device_types: DeviceTypeFlags,
    pub driver_version: DriverVersion,
    pub spec_version: SpecVersion,
    pub abi_version: (u32, u32, u32),
    pub dispatch: DispatchTable,

    /// Address of the driver's vtable; the same component bound through
    /// two different paths yields the same value
    pub identity: usize,

    /// Dropped last so the table never outlives the code it points into
    pub image: ComponentImage,
}

/// Component loader - binds candidates and validates their entry points
pub struct ComponentLoader;

impl ComponentLoader {
    /// Load and validate the component at `locator`
    ///
    /// This performs the following steps:
    /// 1. Bind the component (shared library or built-in)
    /// 2. Resolve the registration symbol and obtain the vtable
    /// 3. Verify ABI version compatibility
    /// 4. Verify every mandatory entry point is present
    /// 5. Read and validate self-reported metadata
    ///
    /// Failures are returned as values and never printed.
    pub fn load(locator: &ComponentLocator) -> Result<LoadedComponent, LoadFailure> {
        debug!("Loading component from: {}", locator);

        let (image, vtable_ptr) = match locator.kind() {
            LocatorKind::Builtin(driver) => (ComponentImage::Builtin, null_driver::register(*driver)),
            LocatorKind::Library(path) => Self::bind_library(path)?,
        };

        if vtable_ptr.is_null() {
            return Err(LoadFailure::NullVTable);
        }

        // SAFETY: the registration function hands out a pointer to a table
        // that lives as long as the component image we still hold
        let vtable = unsafe { &*vtable_ptr };
        let component = Self::validate(locator, vtable, image)?;

        info!(
            "Loaded driver: {} v{} spec {} ({})",
            component.name,
            component.driver_version,
            component.spec_version,
            component.device_types.label()
        );

        Ok(component)
    }

    #[cfg(feature = "plugin-system")]
    fn bind_library(path: &std::path::Path) -> Result<(ComponentImage, *const ZelDriverVTable), LoadFailure> {
        // SAFETY: loading runs the library initializers; driver components
        // are trusted to the same degree the platform loader trusts them
        let library = unsafe { Library::new(path) }
            .map_err(|e| LoadFailure::BindFailed(e.to_string()))?;

        let register_fn: DriverRegisterFn = unsafe { library.get::<DriverRegisterFn>(ZEL_DRIVER_REGISTER_SYMBOL) }
            .map(|symbol| *symbol)
            .map_err(|_| LoadFailure::MissingSymbol("zel_driver_register".to_string()))?;

        let vtable_ptr = register_fn();
        Ok((ComponentImage::Library(library), vtable_ptr))
    }

    #[cfg(not(feature = "plugin-system"))]
    fn bind_library(path: &std::path::Path) -> Result<(ComponentImage, *const ZelDriverVTable), LoadFailure> {
        Err(LoadFailure::Unsupported(path.display().to_string()))
    }

    /// Check a vtable and read the driver's metadata through it
    pub fn validate(
        locator: &ComponentLocator,
        vtable: &ZelDriverVTable,
        image: ComponentImage,
    ) -> Result<LoadedComponent, LoadFailure> {
        // ABI first: nothing else in the table can be trusted on a mismatch
        let abi_version_fn = vtable.abi_version.ok_or(LoadFailure::MissingEntryPoint("abi_version"))?;
        let (mut major, mut minor, mut patch) = (0u32, 0u32, 0u32);
        abi_version_fn(&mut major, &mut minor, &mut patch);

        if major != ZEL_DRIVER_ABI_VERSION_MAJOR {
            return Err(LoadFailure::AbiMismatch {
                driver: (major, minor, patch),
                loader: (
                    ZEL_DRIVER_ABI_VERSION_MAJOR,
                    ZEL_DRIVER_ABI_VERSION_MINOR,
                    ZEL_DRIVER_ABI_VERSION_PATCH,
                ),
            });
        }

        if minor > ZEL_DRIVER_ABI_VERSION_MINOR {
            debug!(
                "Driver ABI {}.{}.{} newer than loader {}.{}.{}",
                major, minor, patch,
                ZEL_DRIVER_ABI_VERSION_MAJOR,
                ZEL_DRIVER_ABI_VERSION_MINOR,
                ZEL_DRIVER_ABI_VERSION_PATCH
            );
        }

        let component_info = vtable.component_info.ok_or(LoadFailure::MissingEntryPoint("component_info"))?;
        let device_types_fn = vtable.device_types.ok_or(LoadFailure::MissingEntryPoint("device_types"))?;
        let versions_fn = vtable.versions.ok_or(LoadFailure::MissingEntryPoint("versions"))?;
        let dispatch = DispatchTable::from_vtable(vtable)?;

        let mut name_buf = [0 as std::ffi::c_char; ZEL_COMPONENT_STRING_SIZE];
        component_info(name_buf.as_mut_ptr(), name_buf.len());
        let name = Self::extract_name(&name_buf)?;

        let device_types = DeviceTypeFlags::from_bits_retain(device_types_fn());
        if device_types.is_empty() {
            return Err(LoadFailure::MalformedMetadata(format!("{}: no device types declared", name)));
        }

        let mut lib_version = ZelVersion::default();
        let mut spec_raw = 0u32;
        versions_fn(&mut lib_version, &mut spec_raw);

        let driver_version = DriverVersion::from(lib_version);
        if driver_version.is_zero() {
            return Err(LoadFailure::MalformedMetadata(format!("{}: library version 0.0.0", name)));
        }

        Ok(LoadedComponent {
            locator: locator.clone(),
            name,
            device_types,
            driver_version,
            spec_version: SpecVersion::from_encoded(spec_raw),
            abi_version: (major, minor, patch),
            dispatch,
            identity: vtable as *const ZelDriverVTable as usize,
            image,
        })
    }

    /// Extract a null-terminated UTF-8 name from a C buffer
    fn extract_name(buffer: &[std::ffi::c_char]) -> Result<String, LoadFailure> {
        let len = buffer.iter()
            .position(|&c| c == 0)
            .ok_or_else(|| LoadFailure::MalformedMetadata("component name not terminated".to_string()))?;

        let bytes: Vec<u8> = buffer[..len]
            .iter()
            .map(|&c| c as u8)
            .collect();

        let name = String::from_utf8(bytes)
            .map_err(|_| LoadFailure::MalformedMetadata("component name is not UTF-8".to_string()))?;

        if name.trim().is_empty() {
            return Err(LoadFailure::MalformedMetadata("empty component name".to_string()));
        }

        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ffi::ZeResult;
    use crate::loader::types::BuiltinDriver;
    use std::ffi::c_char;

    extern "C" fn abi_ok(major: *mut u32, minor: *mut u32, patch: *mut u32) {
        unsafe {
            *major = ZEL_DRIVER_ABI_VERSION_MAJOR;
            *minor = ZEL_DRIVER_ABI_VERSION_MINOR + 1;
            *patch = 0;
        }
    }

    extern "C" fn abi_future(major: *mut u32, minor: *mut u32, patch: *mut u32) {
        unsafe {
            *major = ZEL_DRIVER_ABI_VERSION_MAJOR + 1;
            *minor = 0;
            *patch = 0;
        }
    }

    extern "C" fn info_named(name: *mut c_char, capacity: usize) {
        let buffer = unsafe { std::slice::from_raw_parts_mut(name, capacity) };
        crate::loader::ffi::copy_str_to_buffer("test-driver", buffer);
    }

    extern "C" fn info_empty(_name: *mut c_char, _capacity: usize) {}

    extern "C" fn types_gpu() -> u32 {
        DeviceTypeFlags::GPU.bits()
    }

    extern "C" fn types_none() -> u32 {
        0
    }

    extern "C" fn versions_ok(lib: *mut ZelVersion, spec: *mut u32) {
        unsafe {
            *lib = ZelVersion { major: 2, minor: 3, patch: 4 };
            *spec = 0x0001_0005;
        }
    }

    extern "C" fn versions_zero(_lib: *mut ZelVersion, _spec: *mut u32) {}

    extern "C" fn init_ok(_flags: u32) -> ZeResultRaw {
        ZeResult::Success.raw()
    }

    extern "C" fn driver_get_none(count: *mut u32, _drivers: *mut *mut c_void) -> ZeResultRaw {
        unsafe { *count = 0 };
        ZeResult::Success.raw()
    }

    extern "C" fn driver_props(_d: *mut c_void, _p: *mut ZeDriverProperties) -> ZeResultRaw {
        ZeResult::Success.raw()
    }

    extern "C" fn device_get_none(_d: *mut c_void, count: *mut u32, _devices: *mut *mut c_void) -> ZeResultRaw {
        unsafe { *count = 0 };
        ZeResult::Success.raw()
    }

    extern "C" fn device_props(_d: *mut c_void, _p: *mut ZeDeviceProperties) -> ZeResultRaw {
        ZeResult::Success.raw()
    }

    fn good_vtable() -> ZelDriverVTable {
        ZelDriverVTable {
            abi_version: Some(abi_ok),
            component_info: Some(info_named),
            device_types: Some(types_gpu),
            versions: Some(versions_ok),
            init: Some(init_ok),
            driver_get: Some(driver_get_none),
            driver_get_properties: Some(driver_props),
            device_get: Some(device_get_none),
            device_get_properties: Some(device_props),
        }
    }

    fn locator() -> ComponentLocator {
        ComponentLocator::library("/test/libzeloader_driver_test.so", None)
    }

    #[test]
    fn test_validate_reads_metadata_verbatim() {
        let component = ComponentLoader::validate(&locator(), &good_vtable(), ComponentImage::Builtin).unwrap();
        assert_eq!(component.name, "test-driver");
        assert_eq!(component.device_types, DeviceTypeFlags::GPU);
        assert_eq!(component.driver_version, DriverVersion::new(2, 3, 4));
        assert_eq!(component.spec_version, SpecVersion::new(1, 5));
        // newer minor ABI is accepted
        assert_eq!(component.abi_version.1, ZEL_DRIVER_ABI_VERSION_MINOR + 1);
    }

    #[test]
    fn test_missing_entry_point_rejected() {
        let mut vtable = good_vtable();
        vtable.device_get = None;
        let err = ComponentLoader::validate(&locator(), &vtable, ComponentImage::Builtin).unwrap_err();
        assert_eq!(err, LoadFailure::MissingEntryPoint("device_get"));

        let mut vtable = good_vtable();
        vtable.abi_version = None;
        let err = ComponentLoader::validate(&locator(), &vtable, ComponentImage::Builtin).unwrap_err();
        assert_eq!(err, LoadFailure::MissingEntryPoint("abi_version"));
    }

    #[test]
    fn test_abi_major_mismatch_rejected() {
        let mut vtable = good_vtable();
        vtable.abi_version = Some(abi_future);
        let err = ComponentLoader::validate(&locator(), &vtable, ComponentImage::Builtin).unwrap_err();
        assert!(matches!(err, LoadFailure::AbiMismatch { .. }));
    }

    #[test]
    fn test_malformed_metadata_rejected() {
        let mut vtable = good_vtable();
        vtable.component_info = Some(info_empty);
        assert!(matches!(
            ComponentLoader::validate(&locator(), &vtable, ComponentImage::Builtin),
            Err(LoadFailure::MalformedMetadata(_))
        ));

        let mut vtable = good_vtable();
        vtable.device_types = Some(types_none);
        assert!(matches!(
            ComponentLoader::validate(&locator(), &vtable, ComponentImage::Builtin),
            Err(LoadFailure::MalformedMetadata(_))
        ));

        let mut vtable = good_vtable();
        vtable.versions = Some(versions_zero);
        assert!(matches!(
            ComponentLoader::validate(&locator(), &vtable, ComponentImage::Builtin),
            Err(LoadFailure::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_builtin_loads() {
        let component = ComponentLoader::load(&ComponentLocator::builtin(BuiltinDriver::NullNpu)).unwrap();
        assert_eq!(component.name, "null-npu");
        assert_eq!(component.device_types, DeviceTypeFlags::NPU);
        assert!(component.driver_version.major >= 1);
    }

    #[cfg(feature = "plugin-system")]
    #[test]
    fn test_unbindable_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libzeloader_driver_fake.so");
        std::fs::write(&path, b"not an elf").unwrap();

        let err = ComponentLoader::load(&ComponentLocator::library(&path, None)).unwrap_err();
        assert!(matches!(err, LoadFailure::BindFailed(_)));

        let missing = dir.path().join("absent.so");
        let err = ComponentLoader::load(&ComponentLocator::library(&missing, None)).unwrap_err();
        assert!(matches!(err, LoadFailure::BindFailed(_)));
    }

    #[cfg(all(feature = "plugin-system", target_os = "linux"))]
    #[test]
    fn test_library_without_register_symbol_rejected() {
        // libc is always loadable and never exports zel_driver_register
        let err = ComponentLoader::load(&ComponentLocator::library("libc.so.6", None)).unwrap_err();
        assert_eq!(err, LoadFailure::MissingSymbol("zel_driver_register".to_string()));
    }
}
