/*
 *  loader/types.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Core value types: device type flags, versions, locators
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

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use super::ffi::{
    ZelVersion,
    ZE_INIT_DRIVER_TYPE_FLAG_GPU,
    ZE_INIT_DRIVER_TYPE_FLAG_NPU,
    ZE_INIT_FLAG_GPU_ONLY,
    ZE_INIT_FLAG_VPU_ONLY,
};

bitflags::bitflags! {
    /// Device classes a driver supports, or a caller requests.
    ///
    /// Bits outside the known set are retained when describing a driver so
    /// its metadata is reported verbatim. A wildcard request is [`Self::ANY`],
    /// which keeps every bit and so also matches classes not named here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceTypeFlags: u32 {
        /// Graphics processors
        const GPU = ZE_INIT_DRIVER_TYPE_FLAG_GPU;
        /// Neural processors (formerly VPU)
        const NPU = ZE_INIT_DRIVER_TYPE_FLAG_NPU;
    }
}

/// How out-of-range request flags are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagPolicy {
    /// Zero, the all-bits wildcard and unknown bits all mean "every class"
    #[default]
    Permissive,
    /// Zero and unknown bits are rejected; the all-bits wildcard is still accepted
    Strict,
}

/// The request could not be mapped to a set of device classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrecognizedFlags(pub u32);

impl DeviceTypeFlags {
    /// The wildcard value callers may pass instead of naming classes
    pub const WILDCARD: u32 = u32::MAX;

    /// Every class, including ones this loader has no name for
    pub const ANY: Self = Self::from_bits_retain(u32::MAX);

    /// Normalize a raw request from the type-filtered init call
    pub fn normalize(raw: u32, policy: FlagPolicy) -> Result<Self, UnrecognizedFlags> {
        if raw == Self::WILDCARD {
            return Ok(Self::ANY);
        }

        match Self::from_bits(raw) {
            Some(flags) if !flags.is_empty() => Ok(flags),
            _ => match policy {
                FlagPolicy::Permissive => Ok(Self::ANY),
                FlagPolicy::Strict => Err(UnrecognizedFlags(raw)),
            },
        }
    }

    /// Map legacy init flags onto device classes
    ///
    /// `0` means unrestricted, `GPU_ONLY` and `VPU_ONLY` narrow to one class.
    pub fn from_legacy_init(raw: u32, policy: FlagPolicy) -> Result<Self, UnrecognizedFlags> {
        let known = ZE_INIT_FLAG_GPU_ONLY | ZE_INIT_FLAG_VPU_ONLY;

        if raw == 0 || raw == Self::WILDCARD {
            return Ok(Self::ANY);
        }

        if raw & !known != 0 {
            return match policy {
                FlagPolicy::Permissive => Ok(Self::ANY),
                FlagPolicy::Strict => Err(UnrecognizedFlags(raw)),
            };
        }

        let mut flags = Self::empty();
        if raw & ZE_INIT_FLAG_GPU_ONLY != 0 {
            flags |= Self::GPU;
        }
        if raw & ZE_INIT_FLAG_VPU_ONLY != 0 {
            flags |= Self::NPU;
        }
        Ok(flags)
    }

    /// Parse a class name as used by the test override (`GPU`, `NPU`, `ALL`)
    pub fn from_class_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "GPU" => Some(Self::GPU),
            "NPU" | "VPU" => Some(Self::NPU),
            "ALL" => Some(Self::all()),
            _ => None,
        }
    }

    /// Short lowercase label (`gpu`, `npu`, `gpu|npu`, `any`, `gpu|0x10`)
    pub fn label(&self) -> String {
        if *self == Self::ANY {
            return "any".to_string();
        }

        let mut parts = Vec::new();
        if self.contains(Self::GPU) {
            parts.push("gpu".to_string());
        }
        if self.contains(Self::NPU) {
            parts.push("npu".to_string());
        }
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 || parts.is_empty() {
            parts.push(format!("{:#x}", unknown));
        }
        parts.join("|")
    }
}

impl<'de> Deserialize<'de> for DeviceTypeFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::from_class_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown device class: {}", name)))
    }
}

/// Driver implementation version (major.minor.patch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl DriverVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn is_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl From<ZelVersion> for DriverVersion {
    fn from(v: ZelVersion) -> Self {
        Self::new(v.major, v.minor, v.patch)
    }
}

impl From<DriverVersion> for ZelVersion {
    fn from(v: DriverVersion) -> Self {
        ZelVersion { major: v.major, minor: v.minor, patch: v.patch }
    }
}

/// API contract revision a component claims conformance to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SpecVersion {
    pub major: u16,
    pub minor: u16,
}

impl SpecVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Decode `(major << 16) | minor`
    pub const fn from_encoded(raw: u32) -> Self {
        Self { major: (raw >> 16) as u16, minor: (raw & 0xffff) as u16 }
    }

    pub const fn encoded(&self) -> u32 {
        super::ffi::encode_api_version(self.major, self.minor)
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Drivers compiled into the loader itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinDriver {
    NullGpu,
    NullNpu,
    NullAll,
}

impl BuiltinDriver {
    /// The null driver variant serving the given classes
    pub fn null_for(types: DeviceTypeFlags) -> Self {
        if types == DeviceTypeFlags::GPU {
            BuiltinDriver::NullGpu
        } else if types == DeviceTypeFlags::NPU {
            BuiltinDriver::NullNpu
        } else {
            BuiltinDriver::NullAll
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinDriver::NullGpu => "null-gpu",
            BuiltinDriver::NullNpu => "null-npu",
            BuiltinDriver::NullAll => "null-all",
        }
    }

    pub fn device_types(&self) -> DeviceTypeFlags {
        match self {
            BuiltinDriver::NullGpu => DeviceTypeFlags::GPU,
            BuiltinDriver::NullNpu => DeviceTypeFlags::NPU,
            BuiltinDriver::NullAll => DeviceTypeFlags::all(),
        }
    }
}

/// Where a candidate driver component lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocatorKind {
    /// Shared library on disk
    Library(PathBuf),
    /// Driver compiled into the loader
    Builtin(BuiltinDriver),
}

/// Reference to a discoverable driver component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentLocator {
    kind: LocatorKind,

    /// Classes the source claims the component serves, if it says
    type_hint: Option<DeviceTypeFlags>,
}

impl ComponentLocator {
    pub fn library(path: impl Into<PathBuf>, type_hint: Option<DeviceTypeFlags>) -> Self {
        Self { kind: LocatorKind::Library(path.into()), type_hint }
    }

    pub fn builtin(driver: BuiltinDriver) -> Self {
        Self { kind: LocatorKind::Builtin(driver), type_hint: Some(driver.device_types()) }
    }

    pub fn kind(&self) -> &LocatorKind {
        &self.kind
    }

    pub fn type_hint(&self) -> Option<DeviceTypeFlags> {
        self.type_hint
    }

    /// Whether this candidate could serve any of `requested`
    pub fn may_serve(&self, requested: DeviceTypeFlags) -> bool {
        self.type_hint.is_none_or(|hint| hint.intersects(requested))
    }
}

impl fmt::Display for ComponentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LocatorKind::Library(path) => write!(f, "{}", path.display()),
            LocatorKind::Builtin(driver) => write!(f, "builtin:{}", driver.name()),
        }
    }
}

/// Registry position of a loaded driver, used as the owner tag on handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverId(pub u32);

impl DriverId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "driver#{}", self.0)
    }
}
