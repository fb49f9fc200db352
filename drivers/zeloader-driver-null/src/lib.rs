/*
 *  zeloader Null Driver Plugin
 *
 *  A driver component for the zeloader device compute loader that
 *  simulates GPU and NPU devices, for testing without hardware.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # zeloader Null Driver Plugin
//!
//! Installable counterpart of the loader's built-in null drivers.
//!
//! ## Features
//!
//! - One driver instance
//! - One simulated device per served class (GPU, NPU)
//! - Served classes chosen by `ZEL_TEST_NULL_DRIVER_TYPE` (`GPU`, `NPU`,
//!   `ALL`), read each time the loader asks; default `ALL`
//!
//! ## Usage
//!
//! Copy `libzeloader_driver_null.so` into a loader search directory, or
//! point the loader at it directly:
//!
//! ```sh
//! ZE_ENABLE_ALT_DRIVERS=/path/to/libzeloader_driver_null.so ./app
//! ```

mod ffi;
mod plugin;

// Re-export the driver registration function
pub use plugin::zel_driver_register;
