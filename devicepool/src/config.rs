// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Pool configuration. A single builder-style struct rather than scattered constructor
//! arguments, in the teacher's `Config`/`TuiStyledTextConfig` convention.

use std::time::Duration;

use crate::prober::DEFAULT_READINESS_DEADLINE;
use crate::types::{CriteriaSelector, Disposition};

/// Governs how `free(handle, Disposition::Unresponsive)` is treated. §9's open question
/// resolved here as an explicit, documented knob rather than a hardcoded policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresponsivePolicy {
    /// Re-enqueue, same as `Disposition::Available` (the original's default behavior).
    ReEnqueue,
    /// Drop, same as `Disposition::Unavailable` — for fleets where an unresponsive
    /// device is more likely flaky hardware than a flaky test.
    Drop,
}

/// Tunable knobs for a `Manager` instance.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_emulators: usize,
    pub max_null_devices: usize,
    pub default_selector: CriteriaSelector,
    pub readiness_deadline: Duration,
    pub bootloader_poll_interval: Duration,
    pub unresponsive_policy: UnresponsivePolicy,
    /// When `true`, the manager tracks each discovery probe's task handle so
    /// `Manager::settle_discovery` can await them deterministically, instead of the
    /// default fire-and-forget dispatch. Meant for tests and for callers that want a
    /// consistent snapshot right after a burst of discovery events.
    pub synchronous_discovery: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_emulators: 0,
            max_null_devices: 0,
            default_selector: CriteriaSelector::any(),
            readiness_deadline: DEFAULT_READINESS_DEADLINE,
            bootloader_poll_interval: crate::bootloader_monitor::POLL_INTERVAL,
            unresponsive_policy: UnresponsivePolicy::ReEnqueue,
            synchronous_discovery: false,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_emulators(mut self, n: usize) -> Self {
        self.max_emulators = n;
        self
    }

    #[must_use]
    pub fn with_max_null_devices(mut self, n: usize) -> Self {
        self.max_null_devices = n;
        self
    }

    #[must_use]
    pub fn with_readiness_deadline(mut self, d: Duration) -> Self {
        self.readiness_deadline = d;
        self
    }

    #[must_use]
    pub fn with_bootloader_poll_interval(mut self, d: Duration) -> Self {
        self.bootloader_poll_interval = d;
        self
    }

    #[must_use]
    pub fn with_unresponsive_policy(mut self, policy: UnresponsivePolicy) -> Self {
        self.unresponsive_policy = policy;
        self
    }

    #[must_use]
    pub fn with_synchronous_discovery(mut self, enabled: bool) -> Self {
        self.synchronous_discovery = enabled;
        self
    }

    /// The re-circulation disposition `Unresponsive` resolves to under this config.
    #[must_use]
    pub fn resolve_unresponsive(&self) -> Disposition {
        match self.unresponsive_policy {
            UnresponsivePolicy::ReEnqueue => Disposition::Available,
            UnresponsivePolicy::Drop => Disposition::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_re_enqueues_unresponsive_devices() {
        let config = PoolConfig::new();
        assert_eq!(config.resolve_unresponsive(), Disposition::Available);
    }

    #[test]
    fn drop_policy_treats_unresponsive_as_unavailable() {
        let config =
            PoolConfig::new().with_unresponsive_policy(UnresponsivePolicy::Drop);
        assert_eq!(config.resolve_unresponsive(), Disposition::Unavailable);
    }

    #[test]
    fn builder_methods_compose() {
        let config = PoolConfig::new().with_max_emulators(3).with_max_null_devices(2);
        assert_eq!(config.max_emulators, 3);
        assert_eq!(config.max_null_devices, 2);
    }

    #[test]
    fn bootloader_poll_interval_is_overridable() {
        let config = PoolConfig::new().with_bootloader_poll_interval(std::time::Duration::from_millis(50));
        assert_eq!(config.bootloader_poll_interval, std::time::Duration::from_millis(50));
    }
}
