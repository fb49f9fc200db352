/*
 *  tests/loader_api.rs
 *
 *  Integration tests driving zello_world through the loader's C entry points
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 */

use std::collections::HashMap;
use std::process::{Command, Output};

use tempfile::TempDir;

const LOADER_VARS: &[&str] = &[
    "ZEL_TEST_NULL_DRIVER_TYPE",
    "ZE_ENABLE_NULL_DRIVER",
    "ZE_ENABLE_ALT_DRIVERS",
    "ZEL_DRIVER_MANIFEST_PATH",
    "ZEL_LOADER_DRIVER_PATH",
    "ZEL_STRICT_INIT_FLAGS",
    "ZEL_ENABLE_LOADER_LOGGING",
    "ZEL_LOADER_LOGGING_LEVEL",
    "ZEL_LOADER_LOG_DIR",
];

/// zello_world with a clean loader environment plus `vars`
fn zello_world(vars: &[(&str, &str)], args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_zello_world"));
    for var in LOADER_VARS {
        cmd.env_remove(var);
    }
    for (key, value) in vars {
        cmd.env(key, value);
    }
    cmd.args(args).output().expect("failed to run zello_world")
}

/// `key=value` report lines; the value runs to the end of the line
fn report(output: &Output) -> HashMap<String, String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn init_count(output: &Output) -> u32 {
    report(output)
        .get("init_drivers.count")
        .and_then(|v| v.parse().ok())
        .expect("init_drivers.count missing from report")
}

fn assert_silent(output: &Output) {
    assert!(output.status.success(), "exit status {:?}", output.status);
    assert!(output.stdout.is_empty(), "stdout: {}", String::from_utf8_lossy(&output.stdout));
    assert!(output.stderr.is_empty(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn test_silent_with_null_driver() {
    for class in ["GPU", "NPU", "ALL"] {
        let output = zello_world(&[("ZEL_TEST_NULL_DRIVER_TYPE", class)], &[]);
        assert_silent(&output);
    }
}

#[test]
fn test_silent_without_drivers() {
    let empty = TempDir::new().unwrap();
    let dir = empty.path().to_str().unwrap();
    let output = zello_world(
        &[("ZEL_LOADER_DRIVER_PATH", dir), ("ZEL_DRIVER_MANIFEST_PATH", dir)],
        &[],
    );
    assert_silent(&output);
}

#[test]
fn test_silent_with_missing_alt_driver() {
    let output = zello_world(&[("ZE_ENABLE_ALT_DRIVERS", "/nonexistent/libzeloader_driver_gone.so")], &[]);
    assert_silent(&output);
}

#[test]
fn test_silent_with_garbage_in_search_dir() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("libzeloader_driver_broken.so"), b"not a shared object").unwrap();
    std::fs::write(dir.path().join("broken.yaml"), b"drivers: [[[").unwrap();
    let path = dir.path().to_str().unwrap();

    let output = zello_world(
        &[("ZEL_LOADER_DRIVER_PATH", path), ("ZEL_DRIVER_MANIFEST_PATH", path)],
        &["--types", "wildcard"],
    );
    assert_silent(&output);
}

#[test]
fn test_silent_with_out_of_range_flags() {
    let output = zello_world(&[("ZEL_TEST_NULL_DRIVER_TYPE", "GPU")], &["--types", "0x80", "--legacy", "255"]);
    assert_silent(&output);
}

#[test]
fn test_report_counts_per_class() {
    for (class, types) in [("GPU", "gpu"), ("NPU", "npu"), ("ALL", "all")] {
        let output = zello_world(&[("ZEL_TEST_NULL_DRIVER_TYPE", class)], &["--types", types, "--report"]);
        assert!(output.status.success());
        assert!(init_count(&output) > 0, "no drivers for {}", class);
    }
}

#[test]
fn test_wildcard_never_narrower() {
    for class in ["GPU", "NPU", "ALL"] {
        let vars = [("ZEL_TEST_NULL_DRIVER_TYPE", class)];
        let narrow = zello_world(&vars, &["--types", "gpu", "--report"]);
        let wide = zello_world(&vars, &["--types", "wildcard", "--report"]);
        assert!(init_count(&wide) >= init_count(&narrow), "{}", class);
        assert!(init_count(&wide) > 0);
    }
}

#[test]
fn test_init_order_does_not_matter() {
    let vars = [("ZEL_TEST_NULL_DRIVER_TYPE", "ALL")];
    let drivers_first = report(&zello_world(&vars, &["--order", "drivers-first", "--report"]));
    let legacy_first = report(&zello_world(&vars, &["--order", "legacy-first", "--report"]));

    assert_eq!(drivers_first.get("init_drivers.count"), legacy_first.get("init_drivers.count"));
    assert_eq!(drivers_first.get("drivers"), legacy_first.get("drivers"));
    assert_eq!(drivers_first.get("driver.0.device.0"), legacy_first.get("driver.0.device.0"));
}

#[test]
fn test_legacy_only_enumerates() {
    let output = zello_world(&[("ZEL_TEST_NULL_DRIVER_TYPE", "NPU")], &["--order", "legacy-only", "--report"]);
    let lines = report(&output);
    assert_eq!(lines.get("drivers").map(String::as_str), Some("1"));
    assert!(lines["driver.0.device.0"].starts_with("Null NPU Device"));
}

#[test]
fn test_versions_reported() {
    let output = zello_world(&[("ZEL_TEST_NULL_DRIVER_TYPE", "GPU")], &["--report"]);
    let lines = report(&output);

    let loader = lines.get("version.loader").expect("loader version missing");
    assert!(loader.starts_with(env!("CARGO_PKG_VERSION")));
    assert!(loader.ends_with("spec=1.12"));
    assert!(lines.contains_key("version.null-gpu"));
}

#[test]
fn test_versions_without_drivers() {
    let output = zello_world(&[("ZE_ENABLE_ALT_DRIVERS", "/nonexistent/libzeloader_driver_gone.so")], &["--report"]);
    let lines = report(&output);
    assert_eq!(lines.get("init_drivers.count").map(String::as_str), Some("0"));
    assert!(lines.contains_key("version.loader"));
    assert_eq!(lines.keys().filter(|k| k.starts_with("version.")).count(), 1);
}

#[cfg(feature = "plugin-system")]
fn plugin_file_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "zeloader_driver_null.dll"
    } else if cfg!(target_os = "macos") {
        "libzeloader_driver_null.dylib"
    } else {
        "libzeloader_driver_null.so"
    }
}

/// The null plugin: the one a workspace build left next to zello_world, or
/// a fresh build of the plugin crate
#[cfg(feature = "plugin-system")]
fn null_plugin() -> std::path::PathBuf {
    use std::path::{Path, PathBuf};

    let exe = PathBuf::from(env!("CARGO_BIN_EXE_zello_world"));
    if let Some(beside) = exe.parent().map(|dir| dir.join(plugin_file_name())) {
        if beside.is_file() {
            return beside;
        }
    }

    let target_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("null-plugin");
    let output = Command::new(env!("CARGO"))
        .args(["build", "--quiet", "-p", "zeloader-driver-null", "--manifest-path"])
        .arg(Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"))
        .arg("--target-dir")
        .arg(&target_dir)
        .output()
        .expect("failed to run cargo");
    assert!(
        output.status.success(),
        "building the null plugin failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let built = target_dir.join("debug").join(plugin_file_name());
    assert!(built.is_file(), "{} missing after build", built.display());
    built
}

#[cfg(feature = "plugin-system")]
#[test]
fn test_null_plugin_through_alt_drivers() {
    let plugin = null_plugin();
    let plugin = plugin.to_str().unwrap();

    let output = zello_world(
        &[("ZE_ENABLE_ALT_DRIVERS", plugin), ("ZEL_TEST_NULL_DRIVER_TYPE", "")],
        &["--types", "npu", "--report"],
    );
    assert!(output.status.success());
    assert!(output.stderr.is_empty());

    let lines = report(&output);
    assert_eq!(init_count(&output), 1);
    assert!(lines.contains_key("version.null-plugin"));

    let quiet = zello_world(&[("ZE_ENABLE_ALT_DRIVERS", plugin)], &[]);
    assert_silent(&quiet);
}
