// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Bridge Adapter boundary and the bridge event handler that translates its three
//! events (`connected`, `stateChanged`, `disconnected`) into pool actions.

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{DeviceInfo, RuntimeState, Serial};

/// A single bit in the `stateChanged` mask. The embedding program is free to define more
/// bits; the pool only cares whether the online bit is set.
pub const STATE_CHANGED_ONLINE_MASK: u32 = 1;

/// A device as reported by the bridge, before it has a pool handle.
#[derive(Debug, Clone)]
pub struct BridgeDevice {
    pub serial: Serial,
    pub state: RuntimeState,
    pub info: DeviceInfo,
}

/// Callbacks the Bridge Adapter drives. The manager implements this and registers it
/// with the adapter before `init` connects the bridge, so no early `connected` events
/// are lost.
pub trait BridgeListener: Send + Sync {
    fn on_connected(&self, device: BridgeDevice);
    fn on_disconnected(&self, device: BridgeDevice);
    fn on_state_changed(&self, device: BridgeDevice, mask: u32);
}

/// Thin abstraction over a device-discovery source. The core has no opinion on how this
/// is actually implemented (no opinion on the specific debug-bridge library).
#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    async fn init(&self);
    async fn terminate(&self);
    /// Used by `terminate_hard`: tear the bridge connection down immediately.
    async fn disconnect(&self);
    async fn devices(&self) -> Vec<BridgeDevice>;
    fn register_listener(&self, listener: std::sync::Arc<dyn BridgeListener>);
    /// Vends the per-device monitor the manager binds to a handle via the Device Record
    /// Factory. Called once per newly discovered (or newly launched) serial.
    fn device_monitor(&self, serial: &Serial) -> std::sync::Arc<dyn DeviceStateMonitor>;
}

/// Boundary for the per-device shell executors that switch a device between its USB and
/// TCP transports (`switchToAdbTcp`/`switchToAdbUsb` in the source). Out of scope for
/// this crate's own implementation — the per-device shell executors are an external
/// collaborator — but the manager's TCP reconnect helpers need *some* contract to call
/// through, so it is specified here at the boundary.
#[async_trait]
pub trait TcpSwitcher: Send + Sync {
    /// Switches a USB-attached device onto its TCP transport, returning the `ip:port`
    /// it becomes reachable at, or `None` on failure.
    async fn switch_to_adb_tcp(&self, serial: &Serial) -> Option<String>;
    /// Switches a TCP-attached device back onto USB. Returns whether it succeeded.
    async fn switch_to_adb_usb(&self, serial: &Serial) -> bool;
}

/// Per-device monitor the bridge drives, and the readiness prober waits on.
#[async_trait]
pub trait DeviceStateMonitor: Send + Sync {
    /// Waits up to `deadline` for the device to answer a shell echo.
    async fn wait_for_shell(&self, deadline: Duration) -> bool;
    fn set_state(&self, state: RuntimeState);
}

/// A serial is valid iff it has length > 1 and contains no `?`.
#[must_use]
pub fn is_valid_serial(serial: &str) -> bool {
    Serial::is_valid(serial)
}
