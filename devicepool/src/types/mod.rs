// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Core data types shared across the pool: device identity, variants, lifecycle
//! states, the selector predicate, and the per-allocation handle.

mod handle;
mod selector;
mod serial;
mod state;
mod variant;

pub use handle::DeviceHandle;
pub use selector::{CriteriaSelector, SelectableDevice, Selector};
pub use serial::Serial;
pub use state::{AllocationState, Disposition, RecoveryPolicy, RuntimeState};
pub use variant::{DeviceInfo, DeviceVariant};
