// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error kinds for the device pool, as one `thiserror`/`miette` enum rather than a type
//! per fallible operation. See the design note on propagation policy: the prober and the
//! bootloader monitor swallow-and-log these; allocation paths surface them to callers.

use crate::types::Serial;

/// Everything that can go wrong inside the pool.
#[derive(thiserror::Error, Debug, miette::Diagnostic)]
pub enum PoolError {
    /// Uninitialized use, double `init`, wrong device variant for an operation, or
    /// freeing a device that was never allocated. The operation refuses without
    /// changing state; this is always a caller bug, not a transient condition.
    #[error("🔧 programming error: {0}")]
    Programming(String),

    /// A device operation could not complete (allocate/launch/free surfaced this to the
    /// embedding program).
    #[error("📵 device not available: {0}")]
    DeviceNotAvailable(String),

    /// A retryable bridge command failed after exhausting its retry budget.
    #[error("🔌 transient adb failure for {serial}: {reason}")]
    TransientAdb { serial: Serial, reason: String },

    /// The bootloader monitor's `fastboot devices` poll failed. Never surfaced to
    /// callers; logged and the monitor continues on the next tick.
    #[error("🥾 fastboot poll failed: {0}")]
    FastbootPollFailure(String),

    /// A blocking wait (queue poll, boot wait) was cancelled before it resolved.
    #[error("⏹ cancelled")]
    Cancelled,

    /// An allocation-state transition was attempted that the state machine does not
    /// permit (see the allocation-state graph in the data model).
    #[error("🚫 illegal transition for {serial}: {from:?} -> {to:?}")]
    IllegalTransition {
        serial: Serial,
        from: crate::types::AllocationState,
        to: crate::types::AllocationState,
    },
}

pub type PoolResult<T> = Result<T, PoolError>;
