/*
 *  loader/mod.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Loader context tying discovery, loading, init and dispatch together
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

//! Driver loading and call dispatch
//!
//! ## Architecture
//!
//! 1. **Discovery** (`discovery.rs`) - finds candidate driver components
//! 2. **Component loader** (`component.rs`) - binds a candidate and checks
//!    its vtable and metadata
//! 3. **Registry** (`registry.rs`) - append-only table of loaded drivers
//! 4. **Init coordinator** (`init.rs`) - both init entry points, one lock
//! 5. **Dispatch** (`dispatch.rs`) - routes handle calls to their owner
//! 6. **Versions** (`version.rs`) - two-phase component version query
//!
//! ## Driver ABI
//!
//! A driver component exports `zel_driver_register`, returning a
//! [`ffi::ZelDriverVTable`]. The built-in null drivers (`null_driver.rs`)
//! hand out the same table type and take the same path.
//!
//! ## Driver Naming Convention
//!
//! - Linux: `libzeloader_driver_<name>.so`
//! - macOS: `libzeloader_driver_<name>.dylib`
//! - Windows: `zeloader_driver_<name>.dll`

pub mod component;
pub mod discovery;
pub mod dispatch;
pub mod ffi;
pub mod init;
pub mod null_driver;
pub mod registry;
pub mod types;
pub mod version;

use std::sync::OnceLock;

use log::{debug, info};

use crate::config::{env, LoaderConfig};

pub use dispatch::{DeviceHandle, DriverHandle};
pub use init::{InitCoordinator, InitState};
pub use registry::{DriverEntry, DriverRegistry};
pub use types::{ComponentLocator, DeviceTypeFlags, DriverId, DriverVersion, FlagPolicy, SpecVersion};
pub use version::ComponentVersionRecord;

use discovery::DiscoveryScanner;
use ffi::{ZeDeviceProperties, ZeDriverProperties, ZeResult};

/// The loader context
///
/// Owns the registry and the init coordinator. Processes use the single
/// [`Loader::global`] instance behind the C entry points; tests construct
/// their own with [`Loader::new`].
#[derive(Debug)]
pub struct Loader {
    config: LoaderConfig,
    registry: DriverRegistry,
    coordinator: InitCoordinator,
}

impl Loader {
    pub fn new(config: LoaderConfig) -> Self {
        if crate::logging::init(&config.logging) {
            info!("zeloader {} built {} ({})", loader_version_string(), crate::BUILD_DATE, crate::BUILD_PROFILE);
        }
        debug!("Loader configuration: {:?}", config);

        let coordinator = InitCoordinator::new(DiscoveryScanner::new(&config), config.flag_policy);
        Self {
            config,
            registry: DriverRegistry::new(),
            coordinator,
        }
    }

    /// The process-wide loader, configured from the environment on first use
    pub fn global() -> &'static Loader {
        static GLOBAL: OnceLock<Loader> = OnceLock::new();
        GLOBAL.get_or_init(|| Loader::new(config_from_process_env()))
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Legacy init entry point
    pub fn init(&self, flags: u32) -> ZeResult {
        self.coordinator.init(&self.registry, flags)
    }

    /// Type-filtered init; the number of loaded drivers matching `flags`
    pub fn init_drivers(&self, flags: u32) -> Result<u32, ZeResult> {
        self.coordinator.init_drivers(&self.registry, flags)
    }

    pub fn init_state(&self) -> InitState {
        self.coordinator.state()
    }

    pub fn drivers(&self) -> Vec<DriverHandle> {
        dispatch::drivers(&self.registry)
    }

    pub fn drivers_matching(&self, types: DeviceTypeFlags) -> Vec<DriverHandle> {
        dispatch::drivers_matching(&self.registry, types)
    }

    pub fn driver_properties(&self, driver: &DriverHandle) -> Result<ZeDriverProperties, ZeResult> {
        dispatch::driver_properties(&self.registry, driver)
    }

    pub fn driver_api_version(&self, driver: &DriverHandle) -> Result<SpecVersion, ZeResult> {
        dispatch::driver_api_version(&self.registry, driver)
    }

    pub fn devices(&self, driver: &DriverHandle) -> Result<Vec<DeviceHandle>, ZeResult> {
        dispatch::devices(&self.registry, driver)
    }

    pub fn device_properties(&self, device: &DeviceHandle) -> Result<ZeDeviceProperties, ZeResult> {
        dispatch::device_properties(&self.registry, device)
    }

    /// Two-phase component version query, see [`version::versions`]
    pub fn versions(&self, count: &mut usize, out: Option<&mut [ComponentVersionRecord]>) -> ZeResult {
        version::versions(&self.registry, count, out)
    }

    /// All component version records, loader first
    pub fn version_records(&self) -> Vec<ComponentVersionRecord> {
        version::records(&self.registry)
    }

    pub fn loader_version(&self) -> ComponentVersionRecord {
        ComponentVersionRecord::loader()
    }
}

fn loader_version_string() -> String {
    crate::loader_version().to_string()
}

/// Environment configuration; an unusable logging level disables nothing
/// but the level itself. The null-driver override is always read live.
fn config_from_process_env() -> LoaderConfig {
    let mut cfg = LoaderConfig::from_env()
        .or_else(|_| LoaderConfig::from_lookup(|key| {
            if key == env::LOADER_LOGGING_LEVEL {
                None
            } else {
                std::env::var(key).ok()
            }
        }))
        .unwrap_or_default();
    cfg.live_null_override = true;
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::types::BuiltinDriver;
    use serial_test::serial;

    fn null_loader(null_drivers: Vec<BuiltinDriver>) -> Loader {
        Loader::new(LoaderConfig { null_drivers, ..Default::default() })
    }

    #[test]
    fn test_end_to_end_null_gpu() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu]);
        assert_eq!(loader.init_state(), InitState::Uninitialized);

        let gpu = loader.init_drivers(DeviceTypeFlags::GPU.bits()).unwrap();
        assert!(gpu > 0);

        let all = loader.init_drivers(DeviceTypeFlags::WILDCARD).unwrap();
        assert!(all >= gpu);

        let drivers = loader.drivers();
        assert_eq!(drivers.len(), 1);

        let devices = loader.devices(&drivers[0]).unwrap();
        let props = loader.device_properties(&devices[0]).unwrap();
        assert_eq!(props.name_str(), "Null GPU Device");

        let mut count = 0;
        loader.versions(&mut count, None);
        assert_eq!(count, 2);
        assert_eq!(loader.version_records()[1].component_name, "null-gpu");
    }

    #[test]
    fn test_legacy_after_filtered_extends() {
        let loader = null_loader(vec![BuiltinDriver::NullGpu, BuiltinDriver::NullNpu]);

        assert_eq!(loader.init_drivers(DeviceTypeFlags::NPU.bits()), Ok(1));
        assert_eq!(loader.registry().len(), 1);

        assert_eq!(loader.init(0), ZeResult::Success);
        assert_eq!(loader.registry().len(), 2);

        // narrower legacy call changes nothing
        assert_eq!(loader.init(ffi::ZE_INIT_FLAG_GPU_ONLY), ZeResult::Success);
        assert_eq!(loader.registry().len(), 2);
        assert_eq!(loader.drivers_matching(DeviceTypeFlags::GPU).len(), 1);
    }

    #[test]
    #[serial]
    fn test_process_config_follows_override() {
        // SAFETY: serialized with every other test touching the environment
        unsafe {
            std::env::remove_var(env::ENABLE_NULL_DRIVER);
            std::env::set_var(env::TEST_NULL_DRIVER_TYPE, "NPU");
            std::env::set_var(env::LOADER_LOGGING_LEVEL, "shouting");
        }
        let loader = Loader::new(config_from_process_env());
        unsafe { std::env::remove_var(env::LOADER_LOGGING_LEVEL) };

        assert!(loader.config().live_null_override);
        assert_eq!(loader.init_drivers(DeviceTypeFlags::NPU.bits()), Ok(1));

        unsafe { std::env::set_var(env::TEST_NULL_DRIVER_TYPE, "GPU") };
        assert_eq!(loader.init_drivers(DeviceTypeFlags::GPU.bits()), Ok(1));
        unsafe { std::env::remove_var(env::TEST_NULL_DRIVER_TYPE) };

        let names: Vec<_> = loader.version_records().into_iter().map(|r| r.component_name).collect();
        assert_eq!(names, vec!["loader", "null-npu", "null-gpu"]);
    }

    #[test]
    fn test_loader_version_record() {
        let loader = null_loader(Vec::new());
        let record = loader.loader_version();
        assert_eq!(record.component_name, crate::LOADER_COMPONENT_NAME);
        assert_eq!(record.spec_version, crate::LOADER_SPEC_VERSION);
    }
}
