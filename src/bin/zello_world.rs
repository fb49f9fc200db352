/*
 *  bin/zello_world.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Minimal application driving the loader through its C entry points
 *
 *  Usage:
 *    zello_world
 *    zello_world --types gpu --report
 *    zello_world --order legacy-first --legacy 1 --types wildcard --report
 *
 *  Prints nothing unless --report is given.
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

use std::ptr;

use anyhow::{bail, Context};
use clap::{Arg, ArgAction, Command};

use zeloader::api::{
    zeDeviceGet,
    zeDeviceGetProperties,
    zeDriverGet,
    zeDriverGetApiVersion,
    zeInit,
    zeInitDrivers,
    zelLoaderGetVersions,
};
use zeloader::loader::ffi::{
    c_buffer_to_string,
    ZeDeviceHandle,
    ZeDeviceProperties,
    ZeDriverHandle,
    ZeInitDriverTypeDesc,
    ZelComponentVersion,
};
use zeloader::{SpecVersion, ZeResult};

/// Which init entry points run, and in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    DriversFirst,
    LegacyFirst,
    DriversOnly,
    LegacyOnly,
}

impl Order {
    fn parse(s: &str) -> Self {
        match s {
            "legacy-first" => Order::LegacyFirst,
            "drivers-only" => Order::DriversOnly,
            "legacy-only" => Order::LegacyOnly,
            _ => Order::DriversFirst,
        }
    }
}

/// `gpu`, `npu`, `all`, `wildcard` or a number (`0x` prefix for hex)
fn parse_types(s: &str) -> anyhow::Result<u32> {
    let value = match s.to_ascii_lowercase().as_str() {
        "gpu" => 1,
        "npu" | "vpu" => 2,
        "all" => 3,
        "wildcard" => u32::MAX,
        other => match other.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => other.parse::<u32>(),
        }
        .with_context(|| format!("unrecognized device types: {}", s))?,
    };
    Ok(value)
}

fn check(result: ZeResult, call: &str) -> anyhow::Result<()> {
    if !result.is_success() {
        bail!("{} failed: {:?}", call, result);
    }
    Ok(())
}

struct Report {
    enabled: bool,
}

impl Report {
    fn line(&self, text: impl AsRef<str>) {
        if self.enabled {
            println!("{}", text.as_ref());
        }
    }
}

fn init_drivers(types: u32, report: &Report) -> anyhow::Result<()> {
    let desc = ZeInitDriverTypeDesc::new(types);
    let mut count = 0u32;
    check(unsafe { zeInitDrivers(&mut count, ptr::null_mut(), &desc) }, "zeInitDrivers")?;
    report.line(format!("init_drivers.types={:#x}", types));
    report.line(format!("init_drivers.count={}", count));
    Ok(())
}

fn init_legacy(flags: u32, report: &Report) -> anyhow::Result<()> {
    check(zeInit(flags), "zeInit")?;
    report.line(format!("init.flags={:#x}", flags));
    Ok(())
}

fn walk_drivers(report: &Report) -> anyhow::Result<()> {
    let mut count = 0u32;
    check(unsafe { zeDriverGet(&mut count, ptr::null_mut()) }, "zeDriverGet")?;

    let mut drivers: Vec<ZeDriverHandle> = vec![ptr::null_mut(); count as usize];
    if count > 0 {
        check(unsafe { zeDriverGet(&mut count, drivers.as_mut_ptr()) }, "zeDriverGet")?;
    }
    report.line(format!("drivers={}", count));

    for (i, driver) in drivers.iter().enumerate() {
        let mut api_version = 0u32;
        check(unsafe { zeDriverGetApiVersion(*driver, &mut api_version) }, "zeDriverGetApiVersion")?;
        report.line(format!("driver.{}.api_version={}", i, SpecVersion::from_encoded(api_version)));

        let mut device_count = 0u32;
        check(unsafe { zeDeviceGet(*driver, &mut device_count, ptr::null_mut()) }, "zeDeviceGet")?;
        let mut devices: Vec<ZeDeviceHandle> = vec![ptr::null_mut(); device_count as usize];
        if device_count > 0 {
            check(unsafe { zeDeviceGet(*driver, &mut device_count, devices.as_mut_ptr()) }, "zeDeviceGet")?;
        }

        for (j, device) in devices.iter().enumerate() {
            let mut props = ZeDeviceProperties::default();
            check(unsafe { zeDeviceGetProperties(*device, &mut props) }, "zeDeviceGetProperties")?;
            report.line(format!(
                "driver.{}.device.{}={} type={} vendor={:#06x}",
                i, j, props.name_str(), props.device_type, props.vendor_id
            ));
        }
    }
    Ok(())
}

fn report_versions(report: &Report) -> anyhow::Result<()> {
    let mut count = 0usize;
    check(unsafe { zelLoaderGetVersions(&mut count, ptr::null_mut()) }, "zelLoaderGetVersions")?;

    let mut versions = vec![ZelComponentVersion::default(); count];
    check(unsafe { zelLoaderGetVersions(&mut count, versions.as_mut_ptr()) }, "zelLoaderGetVersions")?;

    for version in versions.iter().take(count) {
        let lib = version.component_lib_version;
        report.line(format!(
            "version.{}={}.{}.{} spec={}",
            c_buffer_to_string(&version.component_name),
            lib.major, lib.minor, lib.patch,
            SpecVersion::from_encoded(version.spec_version)
        ));
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let matches = Command::new("zello_world")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Initialize the loader and walk its drivers")
        .arg(Arg::new("types")
        .short('t')
        .long("types")
        .help("Device types for zeInitDrivers: gpu, npu, all, wildcard or a number")
        .default_value("all")
        .required(false))
        .arg(Arg::new("legacy")
        .short('l')
        .long("legacy")
        .help("Flags for zeInit: 0 all, 1 GPU only, 2 VPU only")
        .value_parser(clap::value_parser!(u32))
        .default_value("0")
        .required(false))
        .arg(Arg::new("order")
        .short('o')
        .long("order")
        .help("Which init calls run, and in what order")
        .value_parser(["drivers-first", "legacy-first", "drivers-only", "legacy-only"])
        .default_value("drivers-first")
        .required(false))
        .arg(Arg::new("report")
        .action(ArgAction::SetTrue)
        .short('r')
        .long("report")
        .help("Print what the loader found as key=value lines")
        .required(false))
        .get_matches();

    let types = parse_types(matches.get_one::<String>("types").map(String::as_str).unwrap_or("all"))?;
    let legacy = matches.get_one::<u32>("legacy").copied().unwrap_or(0);
    let order = Order::parse(matches.get_one::<String>("order").map(String::as_str).unwrap_or("drivers-first"));
    let report = Report { enabled: matches.get_flag("report") };

    match order {
        Order::DriversFirst => {
            init_drivers(types, &report)?;
            init_legacy(legacy, &report)?;
        }
        Order::LegacyFirst => {
            init_legacy(legacy, &report)?;
            init_drivers(types, &report)?;
        }
        Order::DriversOnly => init_drivers(types, &report)?,
        Order::LegacyOnly => init_legacy(legacy, &report)?,
    }

    walk_drivers(&report)?;
    report_versions(&report)?;
    Ok(())
}
