use serde::Deserialize;
use dirs_next::home_dir;
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::loader::types::{BuiltinDriver, DeviceTypeFlags, FlagPolicy};

/// Environment variables understood by the loader
pub mod env {
    pub const TEST_NULL_DRIVER_TYPE: &str = "ZEL_TEST_NULL_DRIVER_TYPE";
    pub const ENABLE_NULL_DRIVER: &str = "ZE_ENABLE_NULL_DRIVER";
    pub const ENABLE_ALT_DRIVERS: &str = "ZE_ENABLE_ALT_DRIVERS";
    pub const DRIVER_MANIFEST_PATH: &str = "ZEL_DRIVER_MANIFEST_PATH";
    pub const LOADER_DRIVER_PATH: &str = "ZEL_LOADER_DRIVER_PATH";
    pub const STRICT_INIT_FLAGS: &str = "ZEL_STRICT_INIT_FLAGS";
    pub const ENABLE_LOADER_LOGGING: &str = "ZEL_ENABLE_LOADER_LOGGING";
    pub const LOADER_LOGGING_LEVEL: &str = "ZEL_LOADER_LOGGING_LEVEL";
    pub const LOADER_LOG_DIR: &str = "ZEL_LOADER_LOG_DIR";
}

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Everything the loader reads from its environment, captured once.
///
/// `Default` is an empty configuration: no search locations, no null driver.
/// Tests build configs directly; processes use [`LoaderConfig::from_env`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderConfig {
    /// Built-in drivers forced by the test/diagnostic override.
    /// Non-empty means no other discovery source is consulted.
    pub null_drivers: Vec<BuiltinDriver>,

    /// Read the null-driver override again on every init request, in place
    /// of `null_drivers`
    pub live_null_override: bool,

    /// Explicit driver libraries; replaces manifests and platform search
    pub alt_drivers: Vec<PathBuf>,

    /// Directories holding `*.yaml` driver manifests, in priority order
    pub manifest_dirs: Vec<PathBuf>,

    /// Directories searched for driver libraries, in priority order
    pub search_dirs: Vec<PathBuf>,

    pub flag_policy: FlagPolicy,

    pub logging: LoggingConfig,
}

/// Opt-in diagnostic logging to a file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: Option<String>,      // e.g., "debug" | "warn"
    pub log_dir: Option<PathBuf>,
}

impl LoaderConfig {
    /// Public entry point: defaults, then environment overrides, then validate.
    ///
    /// The null-driver override stays live: the process environment is
    /// consulted again each time discovery runs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::from_lookup(|key| std::env::var(key).ok())?;
        cfg.live_null_override = true;
        Ok(cfg)
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source,
    /// except that the null-driver override is fixed at the value looked up.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 1) standard locations
        let mut cfg = LoaderConfig {
            manifest_dirs: default_manifest_dirs(),
            search_dirs: default_search_dirs(),
            ..Default::default()
        };

        // 2) environment overrides (highest precedence)
        apply_env_overrides(&mut cfg, &lookup);

        // 3) validate
        validate(&cfg)?;

        Ok(cfg)
    }
}

/// Built-in drivers selected by the null-driver variables, empty when unset
pub fn null_drivers_from_lookup<F>(lookup: &F) -> Vec<BuiltinDriver>
where
    F: Fn(&str) -> Option<String>,
{
    let forced_type = lookup(env::TEST_NULL_DRIVER_TYPE).filter(|v| !v.trim().is_empty());

    if let Some(name) = forced_type.as_deref() {
        // unrecognized class names fall back to every class
        let types = DeviceTypeFlags::from_class_name(name).unwrap_or(DeviceTypeFlags::all());
        vec![BuiltinDriver::null_for(types)]
    } else if lookup(env::ENABLE_NULL_DRIVER).is_some_and(|v| is_truthy(&v)) {
        vec![BuiltinDriver::NullAll]
    } else {
        Vec::new()
    }
}

/// [`null_drivers_from_lookup`] against the process environment as it is now
pub fn null_drivers_from_env() -> Vec<BuiltinDriver> {
    null_drivers_from_lookup(&|key: &str| std::env::var(key).ok())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "on")
}

fn apply_env_overrides<F>(cfg: &mut LoaderConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    cfg.null_drivers = null_drivers_from_lookup(lookup);

    if let Some(list) = lookup(env::ENABLE_ALT_DRIVERS) {
        cfg.alt_drivers = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
    }

    if let Some(dir) = lookup(env::DRIVER_MANIFEST_PATH).filter(|v| !v.is_empty()) {
        cfg.manifest_dirs.insert(0, PathBuf::from(dir));
    }

    if let Some(dir) = lookup(env::LOADER_DRIVER_PATH).filter(|v| !v.is_empty()) {
        cfg.search_dirs.insert(0, PathBuf::from(dir));
    }

    if lookup(env::STRICT_INIT_FLAGS).is_some_and(|v| is_truthy(&v)) {
        cfg.flag_policy = FlagPolicy::Strict;
    }

    cfg.logging.enabled = lookup(env::ENABLE_LOADER_LOGGING).is_some_and(|v| is_truthy(&v));
    cfg.logging.level = lookup(env::LOADER_LOGGING_LEVEL);
    cfg.logging.log_dir = lookup(env::LOADER_LOG_DIR).filter(|v| !v.is_empty()).map(PathBuf::from);
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &LoaderConfig) -> Result<(), ConfigError> {
    if let Some(level) = cfg.logging.level.as_deref() {
        match level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => {},
            other => return Err(ConfigError::Validation(format!(
                "{} must be trace|debug|info|warn|error|off, got {}",
                env::LOADER_LOGGING_LEVEL, other
            ))),
        }
    }
    Ok(())
}

/// Driver library directories, most specific first
fn default_search_dirs() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // development directory (relative to cwd)
    paths.push(PathBuf::from("./target/release"));

    if let Some(home) = home_dir() {
        paths.push(home.join(".local/lib/zeloader/drivers"));
    }

    paths.push(PathBuf::from("/usr/local/lib/zeloader/drivers"));
    paths.push(PathBuf::from("/usr/lib/zeloader/drivers"));
    paths.push(PathBuf::from("/usr/local/lib"));
    paths.push(PathBuf::from("/usr/lib"));
    paths.push(PathBuf::from("/usr/lib/x86_64-linux-gnu"));
    paths.push(PathBuf::from("/usr/lib64"));

    paths
}

fn default_manifest_dirs() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    // XDG-style: ~/.config/zeloader/drivers.d
    if let Some(home) = home_dir() {
        paths.push(home.join(".config/zeloader/drivers.d"));
    }
    paths.push(PathBuf::from("/etc/zeloader/drivers.d"));
    paths
}

/// One driver listed in a manifest file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ManifestEntry {
    /// Path to the driver shared library
    pub library: PathBuf,

    /// Display name, only used in log records
    #[serde(default)]
    pub name: Option<String>,

    /// Classes the driver serves; lets discovery skip it for other requests
    #[serde(default)]
    pub types: Option<Vec<DeviceTypeFlags>>,
}

impl ManifestEntry {
    pub fn type_hint(&self) -> Option<DeviceTypeFlags> {
        self.types
            .as_ref()
            .map(|types| types.iter().fold(DeviceTypeFlags::empty(), |acc, t| acc | *t))
    }
}

/// Contents of a `*.yaml` driver manifest
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct DriverManifest {
    #[serde(default)]
    pub drivers: Vec<ManifestEntry>,
}

/// Read and validate a single manifest file
pub fn read_manifest(path: &Path) -> Result<DriverManifest, ConfigError> {
    let s = fs::read_to_string(path)?;
    let manifest: DriverManifest = serde_yaml::from_str(&s)?;

    for entry in &manifest.drivers {
        if entry.library.as_os_str().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{}: driver entry with empty library path",
                path.display()
            )));
        }
    }

    Ok(manifest)
}
