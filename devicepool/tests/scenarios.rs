// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end scenarios exercising `Manager` against fake collaborators: discovery
//! through a fake bridge, allocation, free, force-allocate of an absent serial, the
//! bootloader transition, and a hard termination mid-wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devicepool::{
    BridgeAdapter, BridgeDevice, BridgeListener, CmdOutput, CriteriaSelector, DeviceHandle,
    DeviceInfo, DeviceStateMonitor, DeviceVariant, Disposition, Manager, PollTimeout, PoolConfig,
    PoolError, Process, Runner, RuntimeState, Serial, TcpSwitcher,
};

// --- Fakes --------------------------------------------------------------------------

#[derive(Default)]
struct FakeMonitor {
    succeed: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl FakeMonitor {
    fn ready() -> Arc<Self> {
        Arc::new(Self { succeed: AtomicBool::new(true), ..Default::default() })
    }
}

#[async_trait]
impl DeviceStateMonitor for FakeMonitor {
    async fn wait_for_shell(&self, _deadline: Duration) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.succeed.load(Ordering::SeqCst)
    }

    fn set_state(&self, _state: RuntimeState) {}
}

#[derive(Default)]
struct FakeBridge {
    listener: Mutex<Option<Arc<dyn BridgeListener>>>,
    monitors: Mutex<HashMap<Serial, Arc<FakeMonitor>>>,
    devices: Mutex<Vec<BridgeDevice>>,
    disconnected: AtomicBool,
}

impl FakeBridge {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn monitor_for(&self, serial: &Serial) -> Arc<FakeMonitor> {
        self.monitors.lock().unwrap().entry(serial.clone()).or_insert_with(FakeMonitor::ready).clone()
    }

    fn fire_connected(&self, device: BridgeDevice) {
        if let Some(listener) = self.listener.lock().unwrap().clone() {
            listener.on_connected(device);
        }
    }
}

#[async_trait]
impl BridgeAdapter for FakeBridge {
    async fn init(&self) {}
    async fn terminate(&self) {}
    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
    async fn devices(&self) -> Vec<BridgeDevice> {
        self.devices.lock().unwrap().clone()
    }
    fn register_listener(&self, listener: Arc<dyn BridgeListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }
    fn device_monitor(&self, serial: &Serial) -> Arc<dyn DeviceStateMonitor> {
        self.monitor_for(serial)
    }
}

struct FakeProcess {
    alive: AtomicBool,
}

impl std::fmt::Debug for FakeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeProcess").finish()
    }
}

#[async_trait]
impl Process for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
    async fn is_alive(&self) -> Option<bool> {
        Some(self.alive.load(Ordering::SeqCst))
    }
    async fn destroy(&self) -> std::io::Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn kill_hard(&self) -> std::io::Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Matches on the leading argv element so one fake covers `fastboot help`, `fastboot
/// devices`, and `adb connect`.
#[derive(Default)]
struct FakeRunner {
    fastboot_devices_output: Mutex<String>,
    adb_connect_ok: AtomicBool,
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run_timed_cmd(&self, _timeout: Duration, argv: &[&str]) -> CmdOutput {
        match argv.first().copied() {
            Some("fastboot") if argv.get(1) == Some(&"help") => CmdOutput::ok(""),
            Some("fastboot") if argv.get(1) == Some(&"devices") => {
                CmdOutput::ok(self.fastboot_devices_output.lock().unwrap().clone())
            }
            Some("adb") => {
                if self.adb_connect_ok.load(Ordering::SeqCst) {
                    let ip_and_port = argv.get(2).copied().unwrap_or_default();
                    CmdOutput::ok(format!("connected to {ip_and_port}"))
                } else {
                    CmdOutput::failed("failed to connect")
                }
            }
            _ => CmdOutput::failed("unhandled fake command"),
        }
    }

    async fn run_in_background(&self, _argv: &[&str]) -> std::io::Result<Box<dyn Process>> {
        Ok(Box::new(FakeProcess { alive: AtomicBool::new(true) }))
    }

    async fn sleep(&self, _duration: Duration) {
        // Tests don't want to wait out real 5s retry spacing or emulator shutdown
        // grace periods; yield instead.
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
struct FakeTcpSwitcher;

#[async_trait]
impl TcpSwitcher for FakeTcpSwitcher {
    async fn switch_to_adb_tcp(&self, _serial: &Serial) -> Option<String> {
        None
    }
    async fn switch_to_adb_usb(&self, _serial: &Serial) -> bool {
        true
    }
}

fn online_device(serial: &str) -> BridgeDevice {
    BridgeDevice { serial: Serial::new(serial), state: RuntimeState::Online, info: DeviceInfo::default() }
}

async fn new_manager(config: PoolConfig) -> (Manager, Arc<FakeBridge>, Arc<FakeRunner>) {
    let bridge = FakeBridge::new();
    let runner = Arc::new(FakeRunner::default());
    let switcher = Arc::new(FakeTcpSwitcher);
    let manager = Manager::new(config, bridge.clone(), runner.clone(), switcher);
    manager.init().await.unwrap();
    (manager, bridge, runner)
}

// --- Scenarios ------------------------------------------------------------------------

#[tokio::test]
async fn happy_allocate_after_bridge_discovery() {
    let config = PoolConfig::new().with_synchronous_discovery(true);
    let (manager, bridge, _runner) = new_manager(config).await;

    bridge.fire_connected(online_device("A1"));
    manager.settle_discovery().await;

    let handle = manager.allocate_timeout(Duration::from_millis(50)).await.unwrap();
    let handle = handle.expect("A1 should have been probed and enqueued");
    assert_eq!(handle.serial, Serial::new("A1"));
    assert_eq!(manager.list_allocated().len(), 1);
    assert!(manager.list_available().is_empty());
}

#[tokio::test]
async fn dedup_discovery_runs_exactly_one_probe_for_concurrent_events() {
    let config = PoolConfig::new();
    let (manager, bridge, _runner) = new_manager(config).await;

    let monitor = bridge.monitor_for(&Serial::new("B1"));
    *monitor.delay.lock().unwrap() = Duration::from_millis(40);

    // Two near-simultaneous `connected` events for the same not-yet-tracked serial.
    bridge.fire_connected(online_device("B1"));
    bridge.fire_connected(online_device("B1"));

    // Give the spawned probe(s) time to run to completion.
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(monitor.calls.load(Ordering::SeqCst), 1, "exactly one probe should have run");
    assert_eq!(manager.list_available().len(), 1);
}

#[tokio::test]
async fn force_allocate_absent_serial_synthesizes_a_tcp_stub() {
    let config = PoolConfig::new();
    let (manager, _bridge, _runner) = new_manager(config).await;

    let handle = manager.force_allocate(Serial::new("C9")).await.unwrap();
    let handle = handle.expect("force_allocate should synthesize a stub for an absent serial");
    assert_eq!(handle.serial, Serial::new("C9"));

    let allocated: Vec<_> = manager.list_allocated().into_iter().map(|d| d.serial).collect();
    assert_eq!(allocated, vec![Serial::new("C9")]);

    // A second force_allocate for the same serial refuses — it's already allocated.
    assert!(manager.force_allocate(Serial::new("C9")).await.unwrap().is_none());
}

#[tokio::test]
async fn freeing_an_emulator_returns_a_fresh_unattached_slot() {
    let config = PoolConfig::new().with_max_emulators(1);
    let (manager, _bridge, _runner) = new_manager(config).await;

    let serial = Serial::new("emulator-slot-0");
    let handle = DeviceHandle::new(
        serial.clone(),
        DeviceVariant::EmulatorSlot { process: None },
        RuntimeState::NotAvailable,
    );

    manager.launch_emulator(&handle, Duration::from_millis(200), "emulator", &["-avd", "test"]).await.unwrap();
    assert_eq!(handle.runtime_state(), RuntimeState::Online);
    assert!(handle.with_variant(|v| matches!(v, DeviceVariant::EmulatorSlot { process: Some(_) })));

    manager.free(handle, Disposition::Unavailable).await.unwrap();

    // free() on an attached emulator forces Disposition::Available with a fresh,
    // unattached handle. `list_available` filters every placeholder variant, including
    // `EmulatorSlot`, so it can't show the re-entered slot — pull it back out of the
    // queue under its own serial instead, the same way a caller actually would.
    let selector = CriteriaSelector::by_serial(serial.clone());
    let requeued = manager
        .allocate_selecting(PollTimeout::Immediate, &selector)
        .await
        .unwrap()
        .expect("freed emulator slot should have re-entered the queue");
    assert_eq!(requeued.serial, serial);
    assert!(requeued.with_variant(|v| matches!(v, DeviceVariant::EmulatorSlot { process: None })));
    assert_eq!(requeued.runtime_state(), RuntimeState::NotAvailable);
}

#[tokio::test]
async fn bootloader_transition_notifies_listeners() {
    let config = PoolConfig::new()
        .with_synchronous_discovery(true)
        .with_bootloader_poll_interval(Duration::from_millis(30));
    let (manager, bridge, runner) = new_manager(config).await;

    bridge.fire_connected(online_device("D1"));
    manager.settle_discovery().await;
    let handle = manager.allocate_timeout(Duration::from_millis(50)).await.unwrap().unwrap();

    let mut events = manager.register_bootloader_listener();
    *runner.fastboot_devices_output.lock().unwrap() = "D1\tfastboot\n".to_string();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("bootloader event should arrive within the poll cadence")
        .unwrap();
    assert_eq!(event.serial, handle.serial);
    assert_eq!(event.runtime_state, RuntimeState::Bootloader);
}

#[tokio::test]
async fn terminate_hard_cancels_a_blocked_allocate() {
    let config = PoolConfig::new();
    let (manager, bridge, _runner) = new_manager(config).await;

    let manager_for_wait = manager.clone();
    let waiter = tokio::spawn(async move { manager_for_wait.allocate().await });

    // Give the waiter a moment to actually block on the empty queue.
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.terminate_hard().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("terminate_hard should unblock the waiting allocate promptly")
        .unwrap();
    assert!(matches!(result, Err(PoolError::Cancelled)));
    assert!(bridge.was_disconnected());
}
