// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Device variants. The core treats all variants uniformly for allocation, but
//! differently for lifecycle hooks — modeled as a tagged enum with explicit match arms
//! in the manager's allocate/free paths, rather than as a trait-object hierarchy, since
//! the behavior differences are small and centralized (see the design notes on dynamic
//! dispatch).

use crate::emulator::EmulatorProcess;

/// Static device metadata surfaced in listings (`listAll`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub product: Option<String>,
    pub sdk_version: Option<String>,
    pub build_id: Option<String>,
    pub battery: Option<u8>,
}

/// The kind of device backing a handle.
#[derive(Debug, Clone)]
pub enum DeviceVariant {
    /// Backed by a live connection on the debug bridge.
    Real,
    /// Visible only through the bootloader channel; cannot accept shell commands.
    Bootloader,
    /// Placeholder reserving capacity for an emulator to be launched on it.
    EmulatorSlot {
        /// Set once `launch_emulator` has attached a running subprocess.
        process: Option<EmulatorProcess>,
    },
    /// Placeholder representing "allocation needs no device".
    NullSlot,
    /// Placeholder reserved for a device being brought online over TCP.
    TcpStub {
        /// Filled in once `connect_tcp` discovers the `ip:port` for this serial.
        ip_and_port: Option<String>,
    },
}

impl DeviceVariant {
    /// Placeholders never appear in public listings.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            DeviceVariant::EmulatorSlot { .. }
                | DeviceVariant::NullSlot
                | DeviceVariant::TcpStub { .. }
        )
    }

    #[must_use]
    pub fn is_emulator_slot(&self) -> bool {
        matches!(self, DeviceVariant::EmulatorSlot { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            DeviceVariant::Real => "real",
            DeviceVariant::Bootloader => "bootloader",
            DeviceVariant::EmulatorSlot { .. } => "emulator-slot",
            DeviceVariant::NullSlot => "null-slot",
            DeviceVariant::TcpStub { .. } => "tcp-stub",
        }
    }
}
