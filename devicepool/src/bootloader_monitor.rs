// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Bootloader Monitor: a periodic loop reconciling the Allocation Registry's view of
//! which allocated devices currently sit in the bootloader. Modeled directly on the
//! teacher's Resilient Reactor Thread (`core/resilient_reactor_thread/`): a
//! generation-guarded background task, a shared stop signal for prompt termination, and
//! a `broadcast` channel standing in for RRT's listener fan-out so dispatch never holds
//! a lock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::external::{FASTBOOT_TIMEOUT, Runner, parse_fastboot_devices};
use crate::registry::AllocationRegistry;
use crate::types::{RuntimeState, Serial};

/// Cadence between bootloader queries.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Capacity of the broadcast channel; a lagging listener drops old events rather than
/// unboundedly backing up the monitor.
const CHANNEL_CAPACITY: usize = 64;

/// A single runtime-state transition the monitor observed this tick.
#[derive(Debug, Clone)]
pub struct BootloaderEvent {
    pub serial: Serial,
    pub runtime_state: RuntimeState,
}

/// Background reconciler for the bootloader transport. Lazily starts its task on the
/// first [`BootloaderMonitor::subscribe`] call ("disabled until at least one listener is
/// registered") and self-terminates once the last receiver is dropped.
pub struct BootloaderMonitor {
    registry: Arc<AllocationRegistry>,
    runner: Arc<dyn Runner>,
    sender: broadcast::Sender<BootloaderEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    poll_interval: Duration,
}

impl std::fmt::Debug for BootloaderMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootloaderMonitor").field("running", &self.is_running()).finish()
    }
}

impl BootloaderMonitor {
    #[must_use]
    pub fn new(registry: Arc<AllocationRegistry>, runner: Arc<dyn Runner>) -> Self {
        Self::with_poll_interval(registry, runner, POLL_INTERVAL)
    }

    #[must_use]
    pub fn with_poll_interval(
        registry: Arc<AllocationRegistry>,
        runner: Arc<dyn Runner>,
        poll_interval: Duration,
    ) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            registry,
            runner,
            sender,
            task: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
            poll_interval,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().unwrap().is_some()
    }

    /// Registers a listener, starting the background loop if it isn't already running.
    pub fn subscribe(self: &Arc<Self>) -> broadcast::Receiver<BootloaderEvent> {
        let rx = self.sender.subscribe();
        self.ensure_running();
        rx
    }

    fn ensure_running(self: &Arc<Self>) {
        let mut guard = self.task.lock().unwrap();
        if guard.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);
        let monitor = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { monitor.run().await }));
    }

    /// Shared-flag termination used by `terminate`/`terminate_hard`: wakes the loop
    /// immediately rather than waiting for the next tick.
    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.tick().await; // first tick fires immediately; consume it before looping.
        loop {
            let stopped = {
                let notified = self.stop_notify.notified();
                tokio::pin!(notified);
                tokio::select! {
                    _ = interval.tick() => false,
                    () = &mut notified => true,
                }
            };
            if stopped || self.stop.load(Ordering::SeqCst) {
                break;
            }
            if self.sender.receiver_count() == 0 {
                debug!(message = "no bootloader listeners remain; monitor self-terminating");
                break;
            }
            self.tick().await;
        }
        *self.task.lock().unwrap() = None;
    }

    async fn tick(&self) {
        let output = self.runner.run_timed_cmd(FASTBOOT_TIMEOUT, &["fastboot", "devices"]).await;
        if !output.status_ok {
            warn!(
                message = "fastboot devices query failed; skipping this tick",
                stderr = %output.stderr
            );
            return;
        }

        let visible: HashSet<Serial> =
            parse_fastboot_devices(&output.stdout).into_iter().map(Serial::new).collect();

        let mut events = Vec::new();
        for handle in self.registry.values() {
            let current = handle.runtime_state();
            let in_bootloader = visible.contains(&handle.serial);

            if in_bootloader && current != RuntimeState::Bootloader {
                handle.set_runtime_state(RuntimeState::Bootloader);
                events.push(BootloaderEvent {
                    serial: handle.serial.clone(),
                    runtime_state: RuntimeState::Bootloader,
                });
            } else if !in_bootloader && current == RuntimeState::Bootloader {
                handle.set_runtime_state(RuntimeState::NotAvailable);
                events.push(BootloaderEvent {
                    serial: handle.serial.clone(),
                    runtime_state: RuntimeState::NotAvailable,
                });
            }
        }

        // Dispatch after releasing every registry/handle lock above: broadcast::send
        // never blocks on a slow receiver, matching "invoke stateUpdated on each without
        // holding internal locks".
        for event in events {
            let _ = self.sender.send(event);
        }
    }
}
