// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Allocation Registry: a concurrent `serial -> handle` map with no external lock
//! required for point operations. Backed by `dashmap` for the sharded-lock fine
//! granularity the concurrency model calls for, rather than a single
//! `RwLock<HashMap<..>>` (which would serialize every registry access, including reads,
//! behind one lock — see `DESIGN.md` for why this one dependency comes from the wider
//! example pack rather than the teacher crate itself).

use dashmap::DashMap;
use tracing::error;

use crate::types::{DeviceHandle, Serial};

/// A concurrent mapping from serial to the currently allocated device handle.
#[derive(Debug, Default)]
pub struct AllocationRegistry {
    map: DashMap<Serial, DeviceHandle>,
}

impl AllocationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new allocation. A second `insert` for a serial already present is a
    /// programming error: it is logged and refused rather than silently overwriting an
    /// in-flight allocation.
    pub fn insert(&self, handle: DeviceHandle) -> Result<(), DeviceHandle> {
        if self.map.contains_key(&handle.serial) {
            error!(
                serial = %handle.serial,
                message = "refusing to insert: serial is already allocated"
            );
            return Err(handle);
        }
        self.map.insert(handle.serial.clone(), handle);
        Ok(())
    }

    /// Removes and returns the handle for `serial`, if present.
    pub fn remove_if_present(&self, serial: &Serial) -> Option<DeviceHandle> {
        self.map.remove(serial).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn contains(&self, serial: &Serial) -> bool {
        self.map.contains_key(serial)
    }

    #[must_use]
    pub fn get(&self, serial: &Serial) -> Option<DeviceHandle> {
        self.map.get(serial).map(|entry| entry.value().clone())
    }

    /// Stable snapshot of every currently allocated handle.
    #[must_use]
    pub fn values(&self) -> Vec<DeviceHandle> {
        self.map.iter().map(|entry| entry.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
