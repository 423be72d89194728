// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Emulator subprocess lifecycle (launch/shutdown) and the rolling utilization window
//! used for reporting. The actual emulator console protocol (the telnet-style "kill"
//! command real emulators expose) is out of scope per the purpose statement's note on
//! not opining on the bridge implementation; `send_console_kill` below is the boundary
//! stub for it — best-effort, logged, never fatal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::{PoolError, PoolResult};
use crate::external::{Process, Runner};
use crate::types::Serial;

/// How long the console-kill → destroy escalation waits before giving up on the
/// orderly path and reaching for harsher measures.
pub const CONSOLE_KILL_GRACE: Duration = Duration::from_secs(5);
/// Delay after spawn before the first aliveness poll, per the launch sequence.
pub const POST_SPAWN_SETTLE: Duration = Duration::from_millis(500);
/// Width of the rolling utilization window kept for reporting.
pub const UTILIZATION_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// A running emulator subprocess attached to an `EmulatorSlot` handle.
#[derive(Clone, Debug)]
pub struct EmulatorProcess {
    inner: Arc<dyn Process>,
}

impl EmulatorProcess {
    #[must_use]
    pub fn new(process: Box<dyn Process>) -> Self {
        Self { inner: Arc::from(process) }
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }

    pub async fn is_alive(&self) -> bool {
        self.inner.is_alive().await.unwrap_or(false)
    }

    /// Best-effort request over the emulator's own console protocol. Not implemented
    /// here (see module docs) — always reports "not handled" so the caller proceeds to
    /// the next escalation step.
    pub async fn send_console_kill(&self) -> bool {
        debug!(message = "emulator console kill is a boundary stub; skipping to destroy()");
        false
    }

    /// Orderly shutdown: `destroy()` on the underlying process.
    pub async fn destroy(&self) -> std::io::Result<()> {
        self.inner.destroy().await
    }

    /// Best-effort `kill -9 <pid>`.
    pub async fn kill_hard(&self) -> std::io::Result<()> {
        self.inner.kill_hard().await
    }
}

/// Runs the escalating shutdown sequence from the free protocol: console kill, 5s
/// grace, `destroy`, then best-effort SIGKILL by pid. Never returns an error — every
/// step is best-effort and logged.
pub async fn shutdown_emulator(process: &EmulatorProcess, runner: &dyn Runner) {
    if process.send_console_kill().await {
        runner.sleep(CONSOLE_KILL_GRACE).await;
        if !process.is_alive().await {
            return;
        }
    }

    if let Err(e) = process.destroy().await {
        warn!(message = "emulator destroy() failed", error = %e);
    }
    runner.sleep(Duration::from_millis(100)).await;
    if !process.is_alive().await {
        return;
    }

    match process.pid() {
        Some(pid) => {
            if let Err(e) = process.kill_hard().await {
                warn!(message = "SIGKILL by pid failed", pid, error = %e);
            }
        }
        None => {
            warn!(message = "no pid available to SIGKILL; relying on destroy()");
        }
    }
}

/// Spawns the emulator subprocess and waits for it to settle, per the launch sequence
/// in the emulator subsystem design: spawn, sleep 500ms, verify alive by polling exit
/// code. Does not itself wait for the device to come online — the caller (manager)
/// does that against the bridge.
pub async fn spawn_emulator(
    runner: &dyn Runner,
    program: &str,
    args: &[&str],
) -> PoolResult<EmulatorProcess> {
    let mut argv = vec![program];
    argv.extend_from_slice(args);
    let child = runner
        .run_in_background(&argv)
        .await
        .map_err(|e| PoolError::DeviceNotAvailable(format!("failed to spawn emulator: {e}")))?;
    let process = EmulatorProcess::new(child);

    runner.sleep(POST_SPAWN_SETTLE).await;

    if !process.is_alive().await {
        return Err(PoolError::DeviceNotAvailable(
            "emulator process exited immediately after spawn".into(),
        ));
    }
    Ok(process)
}

#[derive(Debug, Clone, Copy)]
struct UtilizationSample {
    at: SystemTime,
}

/// Per-serial allocation/free timestamps over a rolling 24h window, for reporting.
#[derive(Debug, Default)]
pub struct UtilizationTracker {
    samples: Mutex<HashMap<Serial, VecDeque<UtilizationSample>>>,
}

impl UtilizationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, serial: &Serial, now: SystemTime) {
        let mut guard = self.samples.lock().unwrap();
        let entries = guard.entry(serial.clone()).or_default();
        entries.push_back(UtilizationSample { at: now });
        while let Some(front) = entries.front() {
            match now.duration_since(front.at) {
                Ok(age) if age > UTILIZATION_WINDOW => {
                    entries.pop_front();
                }
                _ => break,
            }
        }
    }

    pub fn record_allocate(&self, serial: &Serial, now: SystemTime) {
        self.record(serial, now);
    }

    pub fn record_free(&self, serial: &Serial, now: SystemTime) {
        self.record(serial, now);
    }

    /// Number of allocate/free events recorded for `serial` within the rolling window.
    #[must_use]
    pub fn event_count(&self, serial: &Serial) -> usize {
        self.samples
            .lock()
            .unwrap()
            .get(serial)
            .map_or(0, VecDeque::len)
    }
}
