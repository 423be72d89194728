// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The per-allocation handle returned to callers of `allocate`. Holds the live device
//! reference, runtime state, and recovery policy (see the glossary).
//!
//! Fields are wrapped in `std::sync::{Mutex, RwLock}` rather than Tokio's async
//! equivalents: every critical section here is a plain enum/struct read or swap with no
//! `.await` inside it, so a blocking lock held for a handful of instructions is the
//! right tool — matching `Selector::matches`'s requirement to be a pure, synchronous
//! predicate over this data.

use std::sync::{Arc, Mutex, RwLock};

use crate::types::{DeviceInfo, DeviceVariant, RecoveryPolicy, RuntimeState, Serial};

/// The per-allocation object: a live device reference, its runtime state, and its
/// recovery policy. Cloning a `DeviceHandle` shares the same underlying state (all
/// fields are `Arc`s) — there is exactly one logical handle per allocation.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    pub serial: Serial,
    variant: Arc<Mutex<DeviceVariant>>,
    runtime_state: Arc<RwLock<RuntimeState>>,
    info: Arc<Mutex<DeviceInfo>>,
    recovery_policy: Arc<RwLock<RecoveryPolicy>>,
}

impl DeviceHandle {
    #[must_use]
    pub fn new(serial: Serial, variant: DeviceVariant, runtime_state: RuntimeState) -> Self {
        Self {
            serial,
            variant: Arc::new(Mutex::new(variant)),
            runtime_state: Arc::new(RwLock::new(runtime_state)),
            info: Arc::new(Mutex::new(DeviceInfo::default())),
            recovery_policy: Arc::new(RwLock::new(RecoveryPolicy::default())),
        }
    }

    pub fn with_variant<R>(&self, f: impl FnOnce(&DeviceVariant) -> R) -> R {
        f(&self.variant.lock().unwrap())
    }

    pub fn with_variant_mut<R>(&self, f: impl FnOnce(&mut DeviceVariant) -> R) -> R {
        f(&mut self.variant.lock().unwrap())
    }

    pub fn set_variant(&self, variant: DeviceVariant) {
        *self.variant.lock().unwrap() = variant;
    }

    #[must_use]
    pub fn runtime_state(&self) -> RuntimeState {
        *self.runtime_state.read().unwrap()
    }

    pub fn set_runtime_state(&self, state: RuntimeState) {
        *self.runtime_state.write().unwrap() = state;
    }

    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        self.info.lock().unwrap().clone()
    }

    pub fn update_info(&self, f: impl FnOnce(&mut DeviceInfo)) {
        f(&mut self.info.lock().unwrap());
    }

    #[must_use]
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        *self.recovery_policy.read().unwrap()
    }

    pub fn set_recovery_policy(&self, policy: RecoveryPolicy) {
        *self.recovery_policy.write().unwrap() = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let h1 = DeviceHandle::new(Serial::new("A1"), DeviceVariant::Real, RuntimeState::Online);
        let h2 = h1.clone();
        h2.set_runtime_state(RuntimeState::Offline);
        assert_eq!(h1.runtime_state(), RuntimeState::Offline);
    }

    #[test]
    fn info_updates_are_visible_through_clones() {
        let h1 = DeviceHandle::new(Serial::new("A1"), DeviceVariant::Real, RuntimeState::Online);
        let h2 = h1.clone();
        h2.update_info(|i| i.product = Some("walleye".into()));
        assert_eq!(h1.info().product.as_deref(), Some("walleye"));
    }
}
