// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Core Manager: orchestrates initialization, the discovery → prober → queue flow,
//! allocation/free, TCP reconnect, reporting, and termination. Owns every other
//! component and is the only thing the embedding program talks to directly.
//!
//! The manager ↔ bridge-listener relationship is a one-way dependency, not a cycle: the
//! listener the manager hands to the bridge holds only a [`std::sync::Weak`] back into
//! the manager's shared state, so the bridge owning a strong `Arc` to its listener never
//! keeps the manager alive past its last external reference (see the design notes on
//! cyclic references — the original's narrow-callback-interface idea, expressed here
//! with a weak pointer since that's how Rust breaks an owner/observer cycle).

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, instrument, warn};

use crate::bootloader_monitor::{BootloaderEvent, BootloaderMonitor};
use crate::bridge::{BridgeAdapter, BridgeDevice, BridgeListener, TcpSwitcher};
use crate::cancel::CancelToken;
use crate::config::PoolConfig;
use crate::emulator::{UtilizationTracker, shutdown_emulator, spawn_emulator};
use crate::error::{PoolError, PoolResult};
use crate::external::{ADB_CONNECT_TIMEOUT, FASTBOOT_TIMEOUT, Runner, adb_connect_succeeded};
use crate::placeholder::seed_placeholders;
use crate::prober::Prober;
use crate::queue::{AvailabilityQueue, PollTimeout};
use crate::record_factory::DeviceRecordFactory;
use crate::registry::AllocationRegistry;
use crate::report::{self, DeviceDescriptor};
use crate::types::{
    CriteriaSelector, DeviceHandle, DeviceVariant, Disposition, RecoveryPolicy, RuntimeState,
    Selector, Serial,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running,
    Terminated,
}

struct Inner {
    config: PoolConfig,
    bridge: Arc<dyn BridgeAdapter>,
    runner: Arc<dyn Runner>,
    tcp_switcher: Arc<dyn TcpSwitcher>,
    queue: Arc<AvailabilityQueue>,
    registry: Arc<AllocationRegistry>,
    prober: Arc<Prober>,
    record_factory: Arc<DeviceRecordFactory>,
    bootloader_monitor: Arc<BootloaderMonitor>,
    utilization: UtilizationTracker,
    cancel: CancelToken,
    /// Tracks in-flight discovery probes when `config.synchronous_discovery` is set, so
    /// `settle_discovery` can await them deterministically. Left empty (and untouched)
    /// when the knob is off — production discovery is fire-and-forget.
    pending_probes: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Coarse lock guarding `init`/`terminate`/`terminate_hard` and the lifecycle flag
    /// itself; deliberately not held across allocate/free, which use the finer-grained
    /// queue/registry locks instead.
    lifecycle: Mutex<Lifecycle>,
}

/// The device pool. Cheap to clone — every clone shares the same underlying state, the
/// way the teacher's session handles do.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

struct BridgeEventHandler {
    inner: Weak<Inner>,
}

impl BridgeListener for BridgeEventHandler {
    fn on_connected(&self, device: BridgeDevice) {
        if let Some(inner) = self.inner.upgrade() {
            dispatch_discovery(&inner, device);
        }
    }

    fn on_disconnected(&self, device: BridgeDevice) {
        if let Some(inner) = self.inner.upgrade() {
            handle_disconnected(&inner, device);
        }
    }

    fn on_state_changed(&self, device: BridgeDevice, mask: u32) {
        if let Some(inner) = self.inner.upgrade()
            && mask & crate::bridge::STATE_CHANGED_ONLINE_MASK != 0
        {
            dispatch_discovery(&inner, device);
        }
    }
}

/// Shared dispatch for `connected` and a set `stateChanged` bit: already-allocated
/// devices get their stored reference refreshed; devices mid-probe get their monitor
/// state updated; anything else that is validly online is handed to the prober.
fn dispatch_discovery(inner: &Arc<Inner>, device: BridgeDevice) {
    if let Some(handle) = inner.registry.get(&device.serial) {
        handle.update_info(|info| *info = device.info.clone());
        handle.set_runtime_state(device.state);
        return;
    }

    if inner.prober.is_checking(&device.serial) {
        if let Some(monitor) = inner.record_factory.monitor_for(&device.serial) {
            monitor.set_state(device.state);
        }
        return;
    }

    if crate::bridge::is_valid_serial(device.serial.as_str()) && device.state == RuntimeState::Online
    {
        let monitor = inner.bridge.device_monitor(&device.serial);
        let handle = inner.record_factory.create(
            device.serial.clone(),
            DeviceVariant::Real,
            monitor.clone(),
            RuntimeState::Online,
        );
        handle.update_info(|info| *info = device.info.clone());

        if inner.config.synchronous_discovery {
            let prober = inner.prober.clone();
            let serial = device.serial.clone();
            let task = tokio::spawn(async move {
                prober.probe_sync(serial, monitor).await;
            });
            inner.pending_probes.lock().unwrap().push(task);
        } else {
            inner.prober.probe_async(device.serial.clone(), monitor);
        }
        let _ = handle; // the prober re-derives and enqueues its own handle on success
    }
}

fn handle_disconnected(inner: &Arc<Inner>, device: BridgeDevice) {
    let stub = DeviceHandle::new(device.serial.clone(), DeviceVariant::Real, RuntimeState::NotAvailable);
    inner.queue.remove(&stub);

    if let Some(handle) = inner.registry.get(&device.serial) {
        handle.set_runtime_state(RuntimeState::NotAvailable);
    }

    if inner.prober.is_checking(&device.serial)
        && let Some(monitor) = inner.record_factory.monitor_for(&device.serial)
    {
        monitor.set_state(RuntimeState::NotAvailable);
    }
}

impl Manager {
    #[must_use]
    pub fn new(
        config: PoolConfig,
        bridge: Arc<dyn BridgeAdapter>,
        runner: Arc<dyn Runner>,
        tcp_switcher: Arc<dyn TcpSwitcher>,
    ) -> Self {
        let queue = Arc::new(AvailabilityQueue::new());
        let registry = Arc::new(AllocationRegistry::new());
        let prober = Arc::new(Prober::with_deadline(queue.clone(), config.readiness_deadline));
        let bootloader_monitor = Arc::new(BootloaderMonitor::with_poll_interval(
            registry.clone(),
            runner.clone(),
            config.bootloader_poll_interval,
        ));

        let inner = Arc::new(Inner {
            config,
            bridge,
            runner,
            tcp_switcher,
            queue,
            registry,
            prober,
            record_factory: Arc::new(DeviceRecordFactory::new()),
            bootloader_monitor,
            utilization: UtilizationTracker::new(),
            cancel: CancelToken::new(),
            pending_probes: std::sync::Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        });

        Self { inner }
    }

    fn emit_monitor_update(&self, handle: &DeviceHandle) {
        if let Some(monitor) = self.inner.record_factory.monitor_for(&handle.serial) {
            monitor.set_state(handle.runtime_state());
        }
    }

    // --- Initialization & termination (§4.11) -----------------------------------

    /// Idempotent-once: a second call is a programming error. Installs the bridge
    /// listener *before* connecting the bridge so no early `connected` events are lost.
    #[instrument(skip(self))]
    pub async fn init(&self) -> PoolResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if *lifecycle != Lifecycle::Uninitialized {
            return Err(PoolError::Programming("init called more than once".into()));
        }

        seed_placeholders(&self.inner.queue, &self.inner.config);

        let listener = Arc::new(BridgeEventHandler { inner: Arc::downgrade(&self.inner) });
        self.inner.bridge.register_listener(listener);
        self.inner.bridge.init().await;

        let probe = self.inner.runner.run_timed_cmd(FASTBOOT_TIMEOUT, &["fastboot", "help"]).await;
        if probe.status_ok {
            debug!(message = "fastboot probe succeeded; bootloader monitor available on first subscribe");
        } else {
            warn!(message = "fastboot probe failed; skipping fastboot-dependent initialization");
        }

        *lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// Unregisters the bridge listener, tears down the bridge, and stops the bootloader
    /// monitor. Safe to call more than once — a second call is a no-op.
    #[instrument(skip(self))]
    pub async fn terminate(&self) -> PoolResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if *lifecycle == Lifecycle::Terminated {
            return Ok(());
        }
        self.inner.bootloader_monitor.stop().await;
        self.inner.bridge.terminate().await;
        *lifecycle = Lifecycle::Terminated;
        Ok(())
    }

    /// Installs an abort recovery policy on every allocated handle so in-flight device
    /// operations fail fast, force-disconnects the bridge, then runs the ordinary
    /// `terminate` sequence. Also cancels any blocked `allocate` callers.
    #[instrument(skip(self))]
    pub async fn terminate_hard(&self) -> PoolResult<()> {
        for handle in self.inner.registry.values() {
            handle.set_recovery_policy(RecoveryPolicy::Abort);
        }
        self.inner.cancel.cancel();
        self.inner.bridge.disconnect().await;
        self.terminate().await
    }

    // --- Allocation protocol (§4.4) ----------------------------------------------

    async fn allocate_matching(
        &self,
        timeout: PollTimeout,
        selector: &dyn Selector,
    ) -> PoolResult<Option<DeviceHandle>> {
        let Some(handle) = self.inner.queue.poll(timeout, selector, &self.inner.cancel).await?
        else {
            return Ok(None);
        };
        self.inner.registry.insert(handle.clone()).map_err(|h| {
            PoolError::Programming(format!("{} is already allocated", h.serial))
        })?;
        self.inner.utilization.record_allocate(&handle.serial, SystemTime::now());
        self.emit_monitor_update(&handle);
        Ok(Some(handle))
    }

    /// Blocks until any device matches the pool's default selector.
    pub async fn allocate(&self) -> PoolResult<DeviceHandle> {
        let selector = self.inner.config.default_selector.clone();
        self.allocate_matching(PollTimeout::Unbounded, &selector)
            .await?
            .ok_or_else(|| PoolError::Cancelled)
    }

    /// Waits up to `timeout`; returns `None` on expiry.
    pub async fn allocate_timeout(&self, timeout: Duration) -> PoolResult<Option<DeviceHandle>> {
        let selector = self.inner.config.default_selector.clone();
        self.allocate_matching(PollTimeout::After(timeout), &selector).await
    }

    /// Waits up to `timeout` with a caller-supplied selector.
    pub async fn allocate_selecting(
        &self,
        timeout: PollTimeout,
        selector: &dyn Selector,
    ) -> PoolResult<Option<DeviceHandle>> {
        self.allocate_matching(timeout, selector).await
    }

    /// If `serial` is already in the registry, refuses (`Ok(None)`). Otherwise tries a
    /// 1 ms single-serial poll against the queue; failing that, mints a `TcpStub` for
    /// the serial and allocates it, preserving the invariant that allocated handles
    /// always have a registry entry even for devices not yet physically present.
    pub async fn force_allocate(&self, serial: Serial) -> PoolResult<Option<DeviceHandle>> {
        if self.inner.registry.contains(&serial) {
            return Ok(None);
        }

        let selector = CriteriaSelector::by_serial(serial.clone());
        let from_queue = self
            .inner
            .queue
            .poll(PollTimeout::After(Duration::from_millis(1)), &selector, &self.inner.cancel)
            .await?;

        let handle = match from_queue {
            Some(handle) => handle,
            None => DeviceHandle::new(
                serial.clone(),
                DeviceVariant::TcpStub { ip_and_port: None },
                RuntimeState::NotAvailable,
            ),
        };

        self.inner.registry.insert(handle.clone()).map_err(|h| {
            PoolError::Programming(format!("{} is already allocated", h.serial))
        })?;
        self.inner.utilization.record_allocate(&handle.serial, SystemTime::now());
        self.emit_monitor_update(&handle);
        Ok(Some(handle))
    }

    // --- Free protocol (§4.5) -----------------------------------------------------

    #[instrument(skip(self, handle))]
    pub async fn free(&self, handle: DeviceHandle, disposition: Disposition) -> PoolResult<()> {
        debug!(serial = %handle.serial, message = "stopping device-local logcat capture (best-effort)");

        let emulator_process = handle.with_variant(|v| match v {
            DeviceVariant::EmulatorSlot { process: Some(p) } => Some(p.clone()),
            _ => None,
        });

        let (handle, disposition) = if let Some(process) = emulator_process {
            shutdown_emulator(&process, self.inner.runner.as_ref()).await;
            let fresh = DeviceHandle::new(
                handle.serial.clone(),
                DeviceVariant::EmulatorSlot { process: None },
                RuntimeState::NotAvailable,
            );
            (fresh, Disposition::Available)
        } else {
            (handle, disposition)
        };

        if self.inner.registry.remove_if_present(&handle.serial).is_none() {
            error!(serial = %handle.serial, message = "free called on a handle absent from the registry");
        }

        let effective = if disposition == Disposition::Unresponsive {
            self.inner.config.resolve_unresponsive()
        } else {
            disposition
        };

        match effective {
            Disposition::Available => {
                self.inner.queue.add_unique(handle.clone());
            }
            Disposition::Unavailable => {
                debug!(serial = %handle.serial, message = "device dropped (disposition unavailable)");
                self.inner.record_factory.forget(&handle.serial);
            }
            Disposition::Ignore => {
                self.inner.record_factory.forget(&handle.serial);
            }
            Disposition::Unresponsive => unreachable!("resolved above"),
        }

        self.inner.utilization.record_free(&handle.serial, SystemTime::now());
        self.emit_monitor_update(&handle);
        Ok(())
    }

    // --- Emulator lifecycle (§4.9) -------------------------------------------------

    /// Refuses unless `handle`'s variant is an unattached `EmulatorSlot` in
    /// `NotAvailable` state. Spawns the process, sleeps 500 ms, verifies liveness,
    /// attaches the process to the handle, then waits up to `boot_timeout` for the
    /// device to come online.
    pub async fn launch_emulator(
        &self,
        handle: &DeviceHandle,
        boot_timeout: Duration,
        program: &str,
        args: &[&str],
    ) -> PoolResult<()> {
        let is_launchable = handle.with_variant(|v| matches!(v, DeviceVariant::EmulatorSlot { process: None }))
            && handle.runtime_state() == RuntimeState::NotAvailable;
        if !is_launchable {
            return Err(PoolError::Programming(format!(
                "{} is not a launchable emulator slot",
                handle.serial
            )));
        }

        let process = spawn_emulator(self.inner.runner.as_ref(), program, args).await?;
        handle.with_variant_mut(|v| {
            if let DeviceVariant::EmulatorSlot { process: slot } = v {
                *slot = Some(process);
            }
        });

        let monitor = self.inner.bridge.device_monitor(&handle.serial);
        self.inner.record_factory.bind(handle.serial.clone(), monitor.clone());

        if !monitor.wait_for_shell(boot_timeout).await {
            return Err(PoolError::DeviceNotAvailable(format!(
                "{} did not come online within its boot timeout",
                handle.serial
            )));
        }
        handle.set_runtime_state(RuntimeState::Online);
        Ok(())
    }

    // --- TCP transport helpers (§4.6) ----------------------------------------------

    /// Mints a `TcpStub`, allocates it, then performs up to 3 global `adb connect`
    /// attempts with 5 s spacing. On success, waits for the device to come online with
    /// a `Wait` recovery policy; on failure, frees the stub with `Ignore`.
    pub async fn connect_tcp(&self, ip_and_port: String) -> PoolResult<Option<DeviceHandle>> {
        let serial = Serial::new(ip_and_port.clone());
        if self.inner.registry.contains(&serial) {
            return Ok(None);
        }

        let handle = DeviceHandle::new(
            serial.clone(),
            DeviceVariant::TcpStub { ip_and_port: Some(ip_and_port.clone()) },
            RuntimeState::NotAvailable,
        );
        self.inner.registry.insert(handle.clone()).map_err(|h| {
            PoolError::Programming(format!("{} is already allocated", h.serial))
        })?;

        let mut connected = false;
        for attempt in 0..3 {
            let output = self
                .inner
                .runner
                .run_timed_cmd(ADB_CONNECT_TIMEOUT, &["adb", "connect", &ip_and_port])
                .await;
            if output.status_ok && adb_connect_succeeded(&output.stdout, &ip_and_port) {
                connected = true;
                break;
            }
            if attempt < 2 {
                self.inner.runner.sleep(Duration::from_secs(5)).await;
            }
        }

        if !connected {
            self.free(handle, Disposition::Ignore).await?;
            return Ok(None);
        }

        handle.set_recovery_policy(RecoveryPolicy::Wait);
        let monitor = self.inner.bridge.device_monitor(&serial);
        self.inner.record_factory.bind(serial.clone(), monitor.clone());
        if monitor.wait_for_shell(self.inner.config.readiness_deadline).await {
            handle.set_runtime_state(RuntimeState::Online);
        }
        handle.set_recovery_policy(RecoveryPolicy::Normal);
        self.emit_monitor_update(&handle);
        Ok(Some(handle))
    }

    /// Delegates `switchToAdbTcp` to the USB handle; on success, calls `connect_tcp`
    /// with the returned `ip:port`. On failure, marks the USB handle as recovering.
    pub async fn reconnect_to_tcp(&self, usb_handle: &DeviceHandle) -> PoolResult<Option<DeviceHandle>> {
        match self.inner.tcp_switcher.switch_to_adb_tcp(&usb_handle.serial).await {
            Some(ip_and_port) => self.connect_tcp(ip_and_port).await,
            None => {
                usb_handle.set_recovery_policy(RecoveryPolicy::Wait);
                usb_handle.set_runtime_state(RuntimeState::Recovery);
                Ok(None)
            }
        }
    }

    /// Delegates `switchToAdbUsb`, then frees the TCP handle with `Ignore`.
    pub async fn disconnect_from_tcp(&self, tcp_handle: DeviceHandle) -> PoolResult<()> {
        self.inner.tcp_switcher.switch_to_adb_usb(&tcp_handle.serial).await;
        self.free(tcp_handle, Disposition::Ignore).await
    }

    // --- Bootloader monitor listener registration ----------------------------------

    /// Registers a bootloader-state listener, lazily starting the monitor if this is
    /// the first one.
    pub fn register_bootloader_listener(&self) -> broadcast::Receiver<BootloaderEvent> {
        self.inner.bootloader_monitor.subscribe()
    }

    /// Awaits every discovery probe queued while `config.synchronous_discovery` is set,
    /// then clears the queue. A no-op when the knob is off, since discovery is
    /// fire-and-forget in that mode and nothing is tracked. Exists so a caller (a test,
    /// or an embedding program taking a consistent snapshot) can deterministically wait
    /// out in-flight discovery before reading the queue/registry.
    pub async fn settle_discovery(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.inner.pending_probes.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    // --- Reporting (§4.10) ---------------------------------------------------------

    #[must_use]
    pub fn list_allocated(&self) -> Vec<DeviceDescriptor> {
        report::list_allocated(&self.inner.registry)
    }

    #[must_use]
    pub fn list_available(&self) -> Vec<DeviceDescriptor> {
        report::list_available(&self.inner.queue)
    }

    pub async fn list_unavailable(&self) -> Vec<DeviceDescriptor> {
        let devices = self.inner.bridge.devices().await;
        report::list_unavailable(&self.inner.registry, &self.inner.queue, &devices)
    }

    pub async fn list_all(&self) -> Vec<DeviceDescriptor> {
        let devices = self.inner.bridge.devices().await;
        report::list_all(&self.inner.registry, &self.inner.queue, &devices)
    }

    pub async fn write_report(&self, sink: &mut dyn std::io::Write) -> std::io::Result<()> {
        let descriptors = self.list_all().await;
        report::write_report(sink, &descriptors)
    }
}
