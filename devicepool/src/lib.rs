// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A device pool manager for Android-style test harnesses: multiplexes a shared,
//! dynamically changing fleet of devices (real handsets, emulators, and abstract
//! placeholder slots) across concurrent test requests.
//!
//! Discovers devices on a debug-bridge transport and a bootloader transport, probes
//! readiness before exposing new devices, hands devices out under selection predicates
//! with bounded waits, tracks per-device lifecycle transitions driven by asynchronous
//! bridge events, and returns devices to the pool with a disposition that decides
//! whether they re-enter circulation.
//!
//! The entry point is [`Manager`]; everything else is a component it orchestrates.

mod bootloader_monitor;
mod bridge;
mod cancel;
mod config;
mod emulator;
mod error;
mod external;
mod logging;
mod manager;
mod placeholder;
mod prober;
mod queue;
mod record_factory;
mod registry;
mod report;
mod types;

pub use bootloader_monitor::BootloaderEvent;
pub use bridge::{BridgeAdapter, BridgeDevice, BridgeListener, DeviceStateMonitor, TcpSwitcher};
pub use config::{PoolConfig, UnresponsivePolicy};
pub use emulator::EmulatorProcess;
pub use error::{PoolError, PoolResult};
pub use external::{CmdOutput, Process, Runner, SystemRunner};
pub use logging::install_default as install_default_logging;
pub use manager::Manager;
pub use queue::PollTimeout;
pub use report::{DeviceDescriptor, write_report};
pub use types::{
    AllocationState, CriteriaSelector, DeviceHandle, DeviceInfo, DeviceVariant, Disposition,
    RecoveryPolicy, RuntimeState, SelectableDevice, Selector, Serial,
};
