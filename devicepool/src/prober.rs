// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Readiness Prober: a per-device short-lived check that a newly discovered device
//! answers a shell command before it is promoted into the Availability Queue.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::bridge::DeviceStateMonitor;
use crate::queue::AvailabilityQueue;
use crate::types::{DeviceHandle, DeviceVariant, RuntimeState, Serial};

/// Default readiness deadline, per the component design.
pub const DEFAULT_READINESS_DEADLINE: Duration = Duration::from_secs(30);

/// RAII guard that removes a serial from the checking table on every terminating path
/// (success, failure, or an early return/panic mid-probe).
struct CheckingGuard<'a> {
    table: &'a DashMap<Serial, ()>,
    serial: Serial,
}

impl Drop for CheckingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.serial);
    }
}

/// Registers newly discovered devices so duplicate discoveries are ignored while a
/// probe for the same serial is in flight, then promotes readied devices into the
/// Availability Queue.
#[derive(Debug)]
pub struct Prober {
    checking: DashMap<Serial, ()>,
    queue: Arc<AvailabilityQueue>,
    deadline: Duration,
}

impl Prober {
    #[must_use]
    pub fn new(queue: Arc<AvailabilityQueue>) -> Self {
        Self { checking: DashMap::new(), queue, deadline: DEFAULT_READINESS_DEADLINE }
    }

    #[must_use]
    pub fn with_deadline(queue: Arc<AvailabilityQueue>, deadline: Duration) -> Self {
        Self { checking: DashMap::new(), queue, deadline }
    }

    #[must_use]
    pub fn is_checking(&self, serial: &Serial) -> bool {
        self.checking.contains_key(serial)
    }

    /// Runs the probe inline on the caller. Used by the synchronous discovery mode for
    /// deterministic tests, and available to anything that already holds its own task.
    pub async fn probe_sync(&self, serial: Serial, monitor: Arc<dyn DeviceStateMonitor>) {
        // Dedup: if a probe for this serial is already in flight, this discovery is
        // ignored outright.
        if self.checking.insert(serial.clone(), ()).is_some() {
            debug!(%serial, message = "duplicate discovery ignored; probe already in flight");
            return;
        }
        let _guard = CheckingGuard { table: &self.checking, serial: serial.clone() };

        if monitor.wait_for_shell(self.deadline).await {
            let handle = DeviceHandle::new(serial.clone(), DeviceVariant::Real, RuntimeState::Online);
            self.queue.add_unique(handle);
        } else {
            warn!(%serial, message = "readiness probe failed; dropping device");
        }
    }

    /// Spawns the probe as its own task so callers don't block discovery on it. Probes
    /// run with unbounded concurrency — the physical fleet size makes this acceptable;
    /// callers that need a cap can wrap this in their own semaphore.
    pub fn probe_async(self: &Arc<Self>, serial: Serial, monitor: Arc<dyn DeviceStateMonitor>) {
        let prober = Arc::clone(self);
        tokio::spawn(async move {
            prober.probe_sync(serial, monitor).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMonitor {
        succeed: bool,
        wait_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DeviceStateMonitor for FakeMonitor {
        async fn wait_for_shell(&self, _deadline: Duration) -> bool {
            self.wait_calls.fetch_add(1, Ordering::SeqCst);
            self.succeed
        }
        fn set_state(&self, _state: RuntimeState) {}
    }

    #[tokio::test]
    async fn successful_probe_enqueues_a_real_device() {
        let queue = Arc::new(AvailabilityQueue::new());
        let prober = Prober::new(queue.clone());
        let monitor = Arc::new(FakeMonitor { succeed: true, ..Default::default() });
        prober.probe_sync(Serial::new("A1"), monitor).await;
        assert_eq!(queue.len(), 1);
        assert!(!prober.is_checking(&Serial::new("A1")));
    }

    #[tokio::test]
    async fn failed_probe_drops_the_device() {
        let queue = Arc::new(AvailabilityQueue::new());
        let prober = Prober::new(queue.clone());
        let monitor = Arc::new(FakeMonitor { succeed: false, ..Default::default() });
        prober.probe_sync(Serial::new("A1"), monitor).await;
        assert!(queue.is_empty());
        assert!(!prober.is_checking(&Serial::new("A1")));
    }

    #[tokio::test]
    async fn concurrent_duplicate_discovery_runs_exactly_one_probe() {
        let queue = Arc::new(AvailabilityQueue::new());
        let prober = Arc::new(Prober::new(queue.clone()));
        let calls = Arc::new(Mutex::new(0usize));

        struct CountingMonitor {
            calls: Arc<Mutex<usize>>,
        }
        #[async_trait::async_trait]
        impl DeviceStateMonitor for CountingMonitor {
            async fn wait_for_shell(&self, _deadline: Duration) -> bool {
                *self.calls.lock().unwrap() += 1;
                tokio::time::sleep(Duration::from_millis(30)).await;
                true
            }
            fn set_state(&self, _state: RuntimeState) {}
        }

        let monitor = Arc::new(CountingMonitor { calls: calls.clone() });
        let serial = Serial::new("B1");

        let p1 = prober.clone();
        let m1 = monitor.clone();
        let s1 = serial.clone();
        let t1 = tokio::spawn(async move { p1.probe_sync(s1, m1).await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        // Second discovery of the same serial while the first probe is in flight.
        prober.probe_sync(serial.clone(), monitor.clone()).await;

        t1.await.unwrap();

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(queue.len(), 1);
    }
}
