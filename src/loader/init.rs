/*
 *  loader/init.rs
 *
 *  zeloader - device compute driver loader
 *  (c) 2020-26 Stuart Hunter
 *
 *  Init coordinator - merges both init entry points into one request path
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

//! Both init entry points reduce to [`InitCoordinator::request_filter`].
//!
//! The coordinator remembers which classes have been scanned for, per
//! discovery source. A request only does work for classes not yet scanned
//! from the source that is current, so for a fixed source the loaded set
//! depends on the union of all requests and nothing else. Switching the
//! null-driver override selects another source, whose classes start out
//! unscanned:
//!
//! - a candidate is loaded at most once
//! - a rejected candidate is never retried
//! - a validated candidate serving none of the requested classes is parked
//!   and published by the first request that covers one of its classes
//! - a published driver is initialized for further declared classes as
//!   they get requested, and is never dropped

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use log::{debug, info};

use super::component::{ComponentLoader, LoadedComponent};
use super::discovery::{DiscoveryScanner, DiscoverySource};
use super::ffi::{counted_buffer, RawHandle, ZeResult};
use super::registry::DriverRegistry;
use super::types::{ComponentLocator, DeviceTypeFlags, DriverId, FlagPolicy, LocatorKind};
use crate::error::LoadFailure;

/// Process-wide init progress; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    /// Some classes have been requested, not all
    PartiallyInitialized(DeviceTypeFlags),
    /// Every known class has been requested
    Initialized,
}

impl InitState {
    fn from_tried(tried: DeviceTypeFlags) -> Self {
        if tried.is_empty() {
            InitState::Uninitialized
        } else if tried.contains(DeviceTypeFlags::all()) {
            InitState::Initialized
        } else {
            InitState::PartiallyInitialized(tried)
        }
    }

    /// Classes requested so far
    pub fn tried(&self) -> DeviceTypeFlags {
        match self {
            InitState::Uninitialized => DeviceTypeFlags::empty(),
            InitState::PartiallyInitialized(tried) => *tried,
            InitState::Initialized => DeviceTypeFlags::all(),
        }
    }
}

/// What became of a tried candidate
#[derive(Debug)]
enum Outcome {
    Published(DriverId),
    Parked(LoadedComponent),
    Rejected(LoadFailure),
}

#[derive(Debug, Default)]
struct CoordinatorState {
    /// Every class requested so far, whatever the source
    tried: DeviceTypeFlags,
    /// Classes each source has been scanned for
    scanned: HashMap<DiscoverySource, DeviceTypeFlags>,
    outcomes: HashMap<LocatorKind, Outcome>,
}

/// Serializes every registry mutation behind one lock
#[derive(Debug)]
pub struct InitCoordinator {
    scanner: DiscoveryScanner,
    policy: FlagPolicy,
    state: Mutex<CoordinatorState>,
}

impl InitCoordinator {
    pub fn new(scanner: DiscoveryScanner, policy: FlagPolicy) -> Self {
        Self {
            scanner,
            policy,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn policy(&self) -> FlagPolicy {
        self.policy
    }

    pub fn state(&self) -> InitState {
        InitState::from_tried(self.lock().tried)
    }

    /// Legacy init: `0` requests every class, the GPU/VPU-only flags narrow it
    pub fn init(&self, registry: &DriverRegistry, flags: u32) -> ZeResult {
        match DeviceTypeFlags::from_legacy_init(flags, self.policy) {
            Ok(requested) => {
                self.request_filter(registry, requested);
                ZeResult::Success
            }
            Err(e) => {
                debug!("Legacy init rejected flags {:#x}", e.0);
                ZeResult::ErrorInvalidEnumeration
            }
        }
    }

    /// Type-filtered init; returns how many loaded drivers match the request
    pub fn init_drivers(&self, registry: &DriverRegistry, flags: u32) -> Result<u32, ZeResult> {
        let requested = DeviceTypeFlags::normalize(flags, self.policy).map_err(|e| {
            debug!("Driver init rejected flags {:#x}", e.0);
            ZeResult::ErrorInvalidEnumeration
        })?;

        self.request_filter(registry, requested);
        Ok(registry.count_matching(requested))
    }

    /// Make sure every class in `requested` has had its discovery pass
    pub fn request_filter(&self, registry: &DriverRegistry, requested: DeviceTypeFlags) {
        self.request_filter_with(registry, requested, ComponentLoader::load)
    }

    fn request_filter_with<L>(&self, registry: &DriverRegistry, requested: DeviceTypeFlags, load: L)
    where
        L: Fn(&ComponentLocator) -> Result<LoadedComponent, LoadFailure>,
    {
        let mut state = self.lock();
        let source = self.scanner.source();

        let scanned = state.scanned.get(&source).copied().unwrap_or_default();
        let new = requested - scanned;
        if new.is_empty() {
            debug!("Init for {} already done", requested.label());
            return;
        }

        info!("Discovering drivers for {}", new.label());

        // drivers already published may declare classes asked for only now
        for entry in registry.snapshot() {
            let _ = entry.extend_init(new);
        }

        for locator in self.scanner.scan_source(source.clone(), new) {
            let kind = locator.kind().clone();

            let component = match state.outcomes.remove(&kind) {
                Some(Outcome::Parked(component)) if component.device_types.intersects(new) => component,
                Some(outcome) => {
                    match &outcome {
                        Outcome::Published(id) => debug!("{} already published as {}", locator, id),
                        Outcome::Parked(component) => {
                            debug!("{} stays parked ({})", locator, component.device_types.label())
                        }
                        Outcome::Rejected(failure) => debug!("{} stays rejected: {}", locator, failure),
                    }
                    state.outcomes.insert(kind, outcome);
                    continue;
                }
                None => match load(&locator) {
                    Ok(component) => component,
                    Err(failure) => {
                        debug!("Rejected {}: {}", locator, failure);
                        state.outcomes.insert(kind, Outcome::Rejected(failure));
                        continue;
                    }
                },
            };

            if !component.device_types.intersects(new) {
                debug!("Parking {} ({}) until its classes are requested", component.name, component.device_types.label());
                state.outcomes.insert(kind, Outcome::Parked(component));
                continue;
            }

            let outcome = match Self::activate(registry, component, new) {
                Ok(id) => Outcome::Published(id),
                Err(failure) => {
                    debug!("Rejected {}: {}", locator, failure);
                    Outcome::Rejected(failure)
                }
            };
            state.outcomes.insert(kind, outcome);
        }

        state.tried |= requested;
        *state.scanned.entry(source).or_default() |= requested;
        debug!("Init state now {:?}", InitState::from_tried(state.tried));
    }

    /// Initialize a validated component, enumerate its drivers and publish it
    fn activate(
        registry: &DriverRegistry,
        component: LoadedComponent,
        requested: DeviceTypeFlags,
    ) -> Result<DriverId, LoadFailure> {
        if let Some(existing) = registry.find_identity(component.identity) {
            return Err(LoadFailure::AlreadyLoaded(existing.locator().to_string()));
        }

        let flags = component.device_types & requested;
        let result = ZeResult::from_raw((component.dispatch.init)(flags.bits()));
        if !result.is_success() {
            return Err(LoadFailure::DriverInitFailed(result));
        }

        let drivers = Self::enumerate_drivers(&component)?;
        let name = component.name.clone();
        let id = registry.publish(component, drivers, flags);

        info!("Published {} as {} for {}", name, id, flags.label());
        Ok(id)
    }

    /// Two-phase `driver_get` against one component
    fn enumerate_drivers(component: &LoadedComponent) -> Result<Vec<RawHandle>, LoadFailure> {
        let driver_get = component.dispatch.driver_get;

        let mut count = 0u32;
        ZeResult::from_raw(driver_get(&mut count, std::ptr::null_mut()))
            .into_result()
            .map_err(LoadFailure::DriverInitFailed)?;

        let mut raw = counted_buffer(count).map_err(|_| {
            LoadFailure::MalformedMetadata(format!("{}: driver_get reported {} drivers", component.name, count))
        })?;
        if count > 0 {
            ZeResult::from_raw(driver_get(&mut count, raw.as_mut_ptr()))
                .into_result()
                .map_err(LoadFailure::DriverInitFailed)?;
            raw.truncate(count as usize);
        }

        Ok(raw.into_iter().map(RawHandle).collect())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
