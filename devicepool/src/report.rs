// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Reporting: the four listing derivations and the plain-text table writer. Grounded on
//! the teacher's tabular renderers (`tui`'s table components) for column shape, adapted
//! here to a plain `std::io::Write` sink since this crate has no opinion on how its
//! embedding program displays output (table rendering is explicitly out of scope).

use std::collections::HashSet;
use std::io::{self, Write};

use crate::bridge::BridgeDevice;
use crate::queue::AvailabilityQueue;
use crate::registry::AllocationRegistry;
use crate::types::{AllocationState, DeviceHandle, DeviceVariant, Serial};

/// A single row of `listAll`: serial, allocation state, product, variant, SDK version,
/// build id, and battery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub serial: Serial,
    pub state: AllocationState,
    pub product: Option<String>,
    pub variant_label: &'static str,
    pub sdk_version: Option<String>,
    pub build_id: Option<String>,
    pub battery: Option<u8>,
}

impl DeviceDescriptor {
    fn from_handle(handle: &DeviceHandle, state: AllocationState) -> Self {
        let info = handle.info();
        Self {
            serial: handle.serial.clone(),
            state,
            product: info.product,
            variant_label: handle.with_variant(DeviceVariant::label),
            sdk_version: info.sdk_version,
            build_id: info.build_id,
            battery: info.battery,
        }
    }
}

fn sort_descriptors(items: &mut [DeviceDescriptor]) {
    items.sort_by(|a, b| a.state.name().cmp(b.state.name()).then_with(|| a.serial.cmp(&b.serial)));
}

/// Currently allocated devices. Unlike `list_available`, placeholders are not filtered
/// here: `force_allocate` intentionally exposes a not-yet-physically-present `TcpStub`
/// as an allocated entry (the invariant is that an allocated handle always has a
/// registry entry, even before the device shows up). "Placeholders never appear in
/// public listings" is about unclaimed queue capacity, not post-allocation visibility.
#[must_use]
pub fn list_allocated(registry: &AllocationRegistry) -> Vec<DeviceDescriptor> {
    let mut out: Vec<_> = registry
        .values()
        .iter()
        .map(|h| DeviceDescriptor::from_handle(h, AllocationState::Allocated))
        .collect();
    sort_descriptors(&mut out);
    out
}

/// Currently free-to-allocate, real (non-placeholder) devices.
#[must_use]
pub fn list_available(queue: &AvailabilityQueue) -> Vec<DeviceDescriptor> {
    let mut out: Vec<_> = queue
        .snapshot()
        .iter()
        .filter(|h| !h.with_variant(DeviceVariant::is_placeholder))
        .map(|h| DeviceDescriptor::from_handle(h, AllocationState::Available))
        .collect();
    sort_descriptors(&mut out);
    out
}

/// Devices the bridge currently sees that are neither allocated nor queued — present on
/// the transport but outside pool bookkeeping (e.g. still being probed, or ignored).
#[must_use]
pub fn list_unavailable(
    registry: &AllocationRegistry,
    queue: &AvailabilityQueue,
    bridge_devices: &[BridgeDevice],
) -> Vec<DeviceDescriptor> {
    let tracked: HashSet<Serial> = registry
        .values()
        .iter()
        .map(|h| h.serial.clone())
        .chain(queue.snapshot().iter().map(|h| h.serial.clone()))
        .collect();

    let mut out: Vec<_> = bridge_devices
        .iter()
        .filter(|d| !tracked.contains(&d.serial))
        .map(|d| DeviceDescriptor {
            serial: d.serial.clone(),
            state: AllocationState::Unavailable,
            product: d.info.product.clone(),
            variant_label: DeviceVariant::Real.label(),
            sdk_version: d.info.sdk_version.clone(),
            build_id: d.info.build_id.clone(),
            battery: d.info.battery,
        })
        .collect();
    sort_descriptors(&mut out);
    out
}

/// All three listings combined, sorted by allocation-state name ascending then serial
/// ascending.
#[must_use]
pub fn list_all(
    registry: &AllocationRegistry,
    queue: &AvailabilityQueue,
    bridge_devices: &[BridgeDevice],
) -> Vec<DeviceDescriptor> {
    let mut out = list_allocated(registry);
    out.extend(list_available(queue));
    out.extend(list_unavailable(registry, queue, bridge_devices));
    sort_descriptors(&mut out);
    out
}

/// Writes the `Serial, State, Product, Variant, Build, Battery` table.
pub fn write_report(sink: &mut dyn Write, descriptors: &[DeviceDescriptor]) -> io::Result<()> {
    writeln!(
        sink,
        "{:<20} {:<12} {:<14} {:<14} {:<16} {:>7}",
        "Serial", "State", "Product", "Variant", "Build", "Battery"
    )?;
    for d in descriptors {
        writeln!(
            sink,
            "{:<20} {:<12} {:<14} {:<14} {:<16} {:>7}",
            d.serial.as_str(),
            d.state.name(),
            d.product.as_deref().unwrap_or("-"),
            d.variant_label,
            d.build_id.as_deref().unwrap_or("-"),
            d.battery.map_or_else(|| "-".to_string(), |b| b.to_string()),
        )?;
    }
    Ok(())
}
