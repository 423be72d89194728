// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Placeholder Provisioner: seeds the Availability Queue with synthetic
//! `EmulatorSlot`/`NullSlot` entries at init time. Placeholders are promoted to
//! `Available` unconditionally (no readiness probe applies to them).

use tracing::info;

use crate::config::PoolConfig;
use crate::queue::AvailabilityQueue;
use crate::types::{DeviceHandle, DeviceVariant, RuntimeState, Serial};

/// Seeds `queue` with `config.max_emulators` `EmulatorSlot` placeholders and
/// `config.max_null_devices` `NullSlot` placeholders. The number of live `EmulatorSlot`
/// entries equals `max_emulators` before any launch; each `launch_emulator` call
/// consumes one by attaching a process to it, so seeding happens exactly once at init.
pub fn seed_placeholders(queue: &AvailabilityQueue, config: &PoolConfig) {
    for i in 0..config.max_emulators {
        let serial = Serial::new(format!("emulator-slot-{i}"));
        let handle = DeviceHandle::new(
            serial,
            DeviceVariant::EmulatorSlot { process: None },
            RuntimeState::NotAvailable,
        );
        queue.add_unique(handle);
    }
    for i in 0..config.max_null_devices {
        let serial = Serial::new(format!("null-slot-{i}"));
        let handle = DeviceHandle::new(serial, DeviceVariant::NullSlot, RuntimeState::NotAvailable);
        queue.add_unique(handle);
    }
    info!(
        emulator_slots = config.max_emulators,
        null_slots = config.max_null_devices,
        message = "seeded placeholder capacity"
    );
}

/// Counts placeholder handles of a given kind currently sitting in the queue, for
/// capacity-invariant checks (tests, and callers auditing free-protocol substitution).
#[must_use]
pub fn emulator_slot_count(queue: &AvailabilityQueue) -> usize {
    queue.snapshot().iter().filter(|h| h.with_variant(DeviceVariant::is_emulator_slot)).count()
}

#[must_use]
pub fn null_slot_count(queue: &AvailabilityQueue) -> usize {
    queue
        .snapshot()
        .iter()
        .filter(|h| h.with_variant(|v| matches!(v, DeviceVariant::NullSlot)))
        .count()
}
