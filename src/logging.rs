/*
 *  logging.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Opt-in diagnostic logging to a file
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

//! The loader runs underneath applications that own their stdout/stderr,
//! so it never logs there. Log records go through the `log` facade; a
//! logger is only installed when `ZEL_ENABLE_LOADER_LOGGING` asks for one,
//! and that logger writes to a file.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use dirs_next::home_dir;
use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::config::LoggingConfig;

pub const LOG_FILE_NAME: &str = "ze_loader.log";

/// Where the log file goes for this configuration
pub fn log_file_path(cfg: &LoggingConfig) -> Option<PathBuf> {
    cfg.log_dir
        .clone()
        .or_else(|| home_dir().map(|home| home.join(".oneapi_logs")))
        .map(|dir| dir.join(LOG_FILE_NAME))
}

/// Install the file logger if enabled.
///
/// Returns true when this call installed the process logger. Any failure
/// (no home dir, unwritable dir, a logger already installed by the
/// application) leaves logging off without reporting anything.
pub fn init(cfg: &LoggingConfig) -> bool {
    if !cfg.enabled {
        return false;
    }

    let Some(path) = log_file_path(cfg) else {
        return false;
    };

    if let Some(dir) = path.parent() {
        if fs::create_dir_all(dir).is_err() {
            return false;
        }
    }

    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(_) => return false,
    };

    let level = cfg.level
        .as_deref()
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Warn);

    Builder::new()
        .filter_module("zeloader", level)
        .target(Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}
