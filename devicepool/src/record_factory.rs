// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Device Record Factory: binds a newly discovered device to a freshly minted state
//! monitor and an initial lifecycle state, producing the `DeviceHandle` the rest of the
//! pool operates on. The monitor itself lives outside the handle (it is owned by the
//! bridge) — the factory just remembers which monitor goes with which serial so the
//! manager can reach it later (`waitForShell`, `setState`, `connectTcp` reconnects).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bridge::DeviceStateMonitor;
use crate::types::{DeviceHandle, DeviceVariant, RuntimeState, Serial};

#[derive(Default)]
pub struct DeviceRecordFactory {
    monitors: Mutex<HashMap<Serial, Arc<dyn DeviceStateMonitor>>>,
}

impl std::fmt::Debug for DeviceRecordFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRecordFactory")
            .field("tracked", &self.monitors.lock().unwrap().len())
            .finish()
    }
}

impl DeviceRecordFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the handle and records its monitor for later lookup.
    pub fn create(
        &self,
        serial: Serial,
        variant: DeviceVariant,
        monitor: Arc<dyn DeviceStateMonitor>,
        initial_state: RuntimeState,
    ) -> DeviceHandle {
        self.monitors.lock().unwrap().insert(serial.clone(), monitor);
        DeviceHandle::new(serial, variant, initial_state)
    }

    #[must_use]
    pub fn monitor_for(&self, serial: &Serial) -> Option<Arc<dyn DeviceStateMonitor>> {
        self.monitors.lock().unwrap().get(serial).cloned()
    }

    /// Binds a monitor to a serial without minting a new handle — used when a handle
    /// already exists (an emulator slot becoming a real device on launch) and only the
    /// monitor binding is new.
    pub fn bind(&self, serial: Serial, monitor: Arc<dyn DeviceStateMonitor>) {
        self.monitors.lock().unwrap().insert(serial, monitor);
    }

    /// Drops the bookkeeping entry for a serial that has left both the queue and the
    /// registry (destroyed, per the lifecycle).
    pub fn forget(&self, serial: &Serial) {
        self.monitors.lock().unwrap().remove(serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FakeMonitor;
    #[async_trait::async_trait]
    impl DeviceStateMonitor for FakeMonitor {
        async fn wait_for_shell(&self, _deadline: Duration) -> bool {
            true
        }
        fn set_state(&self, _state: RuntimeState) {}
    }

    #[test]
    fn create_binds_monitor_to_serial() {
        let factory = DeviceRecordFactory::new();
        let serial = Serial::new("A1");
        let handle = factory.create(
            serial.clone(),
            DeviceVariant::Real,
            Arc::new(FakeMonitor),
            RuntimeState::Online,
        );
        assert_eq!(handle.serial, serial);
        assert!(factory.monitor_for(&serial).is_some());
    }

    #[test]
    fn forget_removes_the_binding() {
        let factory = DeviceRecordFactory::new();
        let serial = Serial::new("A1");
        factory.create(serial.clone(), DeviceVariant::Real, Arc::new(FakeMonitor), RuntimeState::Online);
        factory.forget(&serial);
        assert!(factory.monitor_for(&serial).is_none());
    }
}
