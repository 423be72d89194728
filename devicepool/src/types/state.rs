// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Allocation state and runtime state, kept as two orthogonal enums per the data model:
//! allocation state is about pool bookkeeping, runtime state is about what the bridge
//! last told us about the physical device.

use crate::error::PoolError;
use crate::types::Serial;

/// Observable allocation state, one of these per known serial at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AllocationState {
    Unavailable,
    Available,
    Checking,
    Allocated,
    Ignored,
}

impl AllocationState {
    /// Display name used for report sorting (`listAll` sorts by this, ascending, then
    /// by serial).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AllocationState::Unavailable => "Unavailable",
            AllocationState::Available => "Available",
            AllocationState::Checking => "Checking",
            AllocationState::Allocated => "Allocated",
            AllocationState::Ignored => "Ignored",
        }
    }

    /// The only permitted transitions are
    /// `Unavailable -> Checking -> Available -> Allocated -> {Available, Unavailable, Ignored}`.
    #[must_use]
    pub fn can_transition_to(self, to: AllocationState) -> bool {
        use AllocationState::{Allocated, Available, Checking, Ignored, Unavailable};
        matches!(
            (self, to),
            (Unavailable, Checking)
                | (Checking, Available)
                | (Available, Allocated)
                | (Allocated, Available)
                | (Allocated, Unavailable)
                | (Allocated, Ignored)
        )
    }

    /// Validates a transition, returning `PoolError::IllegalTransition` when the state
    /// machine forbids it.
    pub fn validate_transition(
        self,
        to: AllocationState,
        serial: &Serial,
    ) -> Result<(), PoolError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(PoolError::IllegalTransition {
                serial: serial.clone(),
                from: self,
                to,
            })
        }
    }
}

/// Runtime state, driven by bridge events and the bootloader monitor. Orthogonal to
/// allocation state: a device can be `Allocated` and `Online`, or `Allocated` and
/// `Bootloader` (it dropped into the bootloader mid-test).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Online,
    Offline,
    Recovery,
    Bootloader,
    NotAvailable,
}

/// The argument to `free`, directing whether the device returns to the pool, is
/// dropped, or is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Available,
    Unavailable,
    Unresponsive,
    Ignore,
}

/// Policy applied to a handle's in-flight device operations. `Abort` is installed on
/// every allocated handle by `terminate_hard` so in-flight operations fail fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    #[default]
    Normal,
    /// Used while a TCP reconnect is pending: wait rather than fail immediately.
    Wait,
    /// Installed by `terminate_hard`: any in-flight device operation fails fast with
    /// `PoolError::DeviceNotAvailable("session aborted")`.
    Abort,
}
