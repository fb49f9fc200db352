/*
 *  error.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error types for component loading
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

use thiserror::Error;

use crate::loader::ffi::ZeResult;

/// Why a candidate driver component was rejected
///
/// These never reach the caller of an init entry point; the candidate is
/// skipped and the value is only kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadFailure {
    /// The shared library could not be bound into the process
    #[error("failed to bind component: {0}")]
    BindFailed(String),

    /// A mandatory exported symbol is absent
    #[error("missing exported symbol: {0}")]
    MissingSymbol(String),

    /// The registration function returned a null vtable
    #[error("driver registration returned null vtable")]
    NullVTable,

    /// The driver was built against an incompatible ABI major version
    #[error("ABI version mismatch: driver {driver:?} incompatible with loader {loader:?}")]
    AbiMismatch { driver: (u32, u32, u32), loader: (u32, u32, u32) },

    /// A mandatory entry point is null in the vtable
    #[error("missing mandatory entry point: {0}")]
    MissingEntryPoint(&'static str),

    /// Self-reported metadata could not be used
    #[error("malformed driver metadata: {0}")]
    MalformedMetadata(String),

    /// The component is already registered under another locator
    #[error("component already loaded as {0}")]
    AlreadyLoaded(String),

    /// The driver's own init entry point failed
    #[error("driver init failed: {0:?}")]
    DriverInitFailed(ZeResult),

    /// The loader was built without support for this kind of component
    #[error("component kind not supported by this build: {0}")]
    Unsupported(String),
}
