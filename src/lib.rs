/*
 *  lib.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Crate root
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

//! Driver discovery and call dispatch for device compute drivers
//!
//! Applications link against this loader instead of a vendor driver. The
//! loader finds the driver components installed on the system, loads the
//! ones serving the device classes the application asks for, and routes
//! every later call to the driver owning the handle it is made on.
//!
//! Two init entry points exist: the legacy [`Loader::init`] and the
//! type-filtered [`Loader::init_drivers`]. Any sequence of calls to them
//! converges on the same set of loaded drivers.
//!
//! The loader never writes to stdout or stderr. Diagnostics go through
//! the `log` facade and only reach a file when `ZEL_ENABLE_LOADER_LOGGING`
//! is set (see [`logging`]).

pub mod api;
pub mod config;
pub mod error;
pub mod loader;
pub mod logging;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

pub use config::{ConfigError, LoaderConfig};
pub use error::LoadFailure;
pub use loader::{
    ComponentVersionRecord,
    DeviceHandle,
    DeviceTypeFlags,
    DriverHandle,
    DriverVersion,
    FlagPolicy,
    InitState,
    Loader,
    SpecVersion,
};
pub use loader::ffi::ZeResult;

/// Component name the loader reports for itself in version queries
pub const LOADER_COMPONENT_NAME: &str = "loader";

/// API contract revision this loader implements
pub const LOADER_SPEC_VERSION: SpecVersion = SpecVersion::new(1, 12);

const fn parse_version_part(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

const LOADER_VERSION: DriverVersion = DriverVersion::new(
    parse_version_part(env!("CARGO_PKG_VERSION_MAJOR")),
    parse_version_part(env!("CARGO_PKG_VERSION_MINOR")),
    parse_version_part(env!("CARGO_PKG_VERSION_PATCH")),
);

/// Library version of this loader build
pub const fn loader_version() -> DriverVersion {
    LOADER_VERSION
}
