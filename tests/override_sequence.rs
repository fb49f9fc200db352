/*
 *  tests/override_sequence.rs
 *
 *  One process, one loader: the null-driver override changes between init
 *  calls and every call must still find drivers
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 */

use std::ptr;

use zeloader::api::{zeDriverGet, zeInit, zeInitDrivers, zelLoaderGetVersions};
use zeloader::loader::ffi::{
    c_buffer_to_string,
    ZeInitDriverTypeDesc,
    ZelComponentVersion,
    ZE_INIT_FLAG_GPU_ONLY,
    ZE_INIT_FLAG_VPU_ONLY,
};
use zeloader::ZeResult;

const OVERRIDE: &str = "ZEL_TEST_NULL_DRIVER_TYPE";
const GPU: u32 = 1;
const NPU: u32 = 2;
const WILDCARD: u32 = u32::MAX;

fn set_override(class: &str) {
    // SAFETY: this binary holds a single test, no other thread reads the environment
    unsafe { std::env::set_var(OVERRIDE, class) };
}

fn init_drivers(types: u32) -> u32 {
    let desc = ZeInitDriverTypeDesc::new(types);
    let mut count = 0u32;
    let result = unsafe { zeInitDrivers(&mut count, ptr::null_mut(), &desc) };
    assert_eq!(result, ZeResult::Success, "zeInitDrivers({:#x})", types);
    count
}

fn assert_finds(types: u32, class: &str) {
    assert!(init_drivers(types) > 0, "no drivers for {:#x} with override {}", types, class);
}

fn legacy_init(flags: u32) {
    assert_eq!(zeInit(flags), ZeResult::Success, "zeInit({:#x})", flags);
}

#[test]
fn test_override_changes_within_one_process() {
    // SAFETY: as in set_override
    unsafe {
        for var in ["ZEL_TEST_NULL_DRIVER_TYPE", "ZE_ENABLE_NULL_DRIVER", "ZEL_STRICT_INIT_FLAGS"] {
            std::env::remove_var(var);
        }
        // keep the first, override-free init away from real search paths
        std::env::set_var("ZE_ENABLE_ALT_DRIVERS", "/nonexistent/libzeloader_driver_gone.so");
    }

    legacy_init(0);
    let mut count = 0usize;
    assert_eq!(unsafe { zelLoaderGetVersions(&mut count, ptr::null_mut()) }, ZeResult::Success);
    let mut versions = vec![ZelComponentVersion::default(); count];
    assert_eq!(unsafe { zelLoaderGetVersions(&mut count, versions.as_mut_ptr()) }, ZeResult::Success);
    assert_eq!(c_buffer_to_string(&versions[0].component_name), "loader");

    set_override("GPU");
    for types in [GPU, WILDCARD, GPU | NPU] {
        assert_finds(types, "GPU");
    }

    set_override("NPU");
    for types in [NPU, WILDCARD, GPU | NPU] {
        assert_finds(types, "NPU");
    }

    set_override("ALL");
    for types in [NPU, WILDCARD, GPU, GPU | NPU] {
        assert_finds(types, "ALL");
    }

    set_override("ALL");
    assert_finds(WILDCARD, "ALL");
    legacy_init(0);

    set_override("GPU");
    assert_finds(WILDCARD, "GPU");
    legacy_init(ZE_INIT_FLAG_GPU_ONLY);

    set_override("NPU");
    assert_finds(WILDCARD, "NPU");
    legacy_init(ZE_INIT_FLAG_VPU_ONLY);

    set_override("ALL");
    legacy_init(0);
    assert_finds(WILDCARD, "ALL");

    set_override("GPU");
    legacy_init(ZE_INIT_FLAG_GPU_ONLY);
    assert_finds(WILDCARD, "GPU");

    set_override("NPU");
    legacy_init(ZE_INIT_FLAG_VPU_ONLY);
    assert_finds(WILDCARD, "NPU");

    // one null driver per override value, none loaded twice
    let mut drivers = 0u32;
    assert_eq!(unsafe { zeDriverGet(&mut drivers, ptr::null_mut()) }, ZeResult::Success);
    assert_eq!(drivers, 3);

    let mut count = 0usize;
    unsafe { zelLoaderGetVersions(&mut count, ptr::null_mut()) };
    assert_eq!(count, 4);
}
