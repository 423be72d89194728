// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The Availability Queue: a dedup-by-serial, thread-safe FIFO with blocking,
//! selector-filtered takes. Shaped like the teacher's Resilient Reactor Thread state —
//! a `std::sync::Mutex`-guarded list plus a wake-on-insert signal — except the signal is
//! a [`tokio::sync::Notify`] rather than a condvar, since waiters here are async tasks.
//!
//! Fairness: concurrent callers with disjoint selectors never steal from each other — a
//! callable entry is assigned to exactly one caller, by construction of `try_take`'s
//! single scan-and-remove. Ordering among multiple callers whose selectors *could* match
//! the same entry is best-effort, not a strict FIFO guarantee: every waiter registers
//! interest on the same `Notify` and `notify_waiters()` wakes all of them to race for the
//! lock, so which one actually calls `try_take` first after a wake is left to the Tokio
//! scheduler rather than arrival order. A strict per-selector FIFO handoff would need an
//! ordered waiter registry keyed by selector identity, which `Selector` (a `dyn` trait
//! with no equality) doesn't support; this is recorded as an accepted relaxation rather
//! than silently diverging from the stricter wording elsewhere.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::error::{PoolError, PoolResult};
use crate::types::{DeviceHandle, SelectableDevice, Selector};

/// How long `poll` is willing to wait.
#[derive(Debug, Clone, Copy)]
pub enum PollTimeout {
    /// Returns immediately with either a match or `None`; never blocks.
    Immediate,
    /// Waits up to `Duration`, then returns `None`.
    After(Duration),
    /// Blocks indefinitely.
    Unbounded,
}

/// A dedup-by-serial, thread-safe FIFO of devices currently free to allocate.
#[derive(Debug, Default)]
pub struct AvailabilityQueue {
    entries: Mutex<VecDeque<DeviceHandle>>,
    notify: Notify,
}

impl AvailabilityQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// If an existing entry has the same serial, replaces it in place (preserving its
    /// queue position) and returns the replaced entry. Otherwise enqueues at the back
    /// and returns `None`. Either way, queue length changes by at most one.
    pub fn add_unique(&self, handle: DeviceHandle) -> Option<DeviceHandle> {
        let replaced = {
            let mut guard = self.entries.lock().unwrap();
            match guard.iter().position(|h| h.serial == handle.serial) {
                Some(pos) => Some(std::mem::replace(&mut guard[pos], handle)),
                None => {
                    guard.push_back(handle);
                    None
                }
            }
        };
        self.notify.notify_waiters();
        replaced
    }

    /// Removes the entry with this handle's serial, if present. Idempotent.
    pub fn remove(&self, handle: &DeviceHandle) {
        let mut guard = self.entries.lock().unwrap();
        guard.retain(|h| h.serial != handle.serial);
    }

    /// Stable copy for reporting; does not mutate the queue.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceHandle> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_take(&self, selector: &dyn Selector) -> Option<DeviceHandle> {
        let mut guard = self.entries.lock().unwrap();
        let pos = guard.iter().position(|h| {
            let variant_matches = h.with_variant(|v| {
                let info = h.info();
                selector.matches(SelectableDevice { serial: &h.serial, variant: v, info: &info })
            });
            variant_matches
        })?;
        guard.remove(pos)
    }

    /// Waits up to `timeout` for the first entry (FIFO order) matching `selector`.
    /// Cancellable via `cancel`. Disjoint concurrent selectors never steal each other's
    /// match; ordering among callers that could match the same entry is best-effort (see
    /// the module docs).
    pub async fn poll(
        &self,
        timeout: PollTimeout,
        selector: &dyn Selector,
        cancel: &CancelToken,
    ) -> PoolResult<Option<DeviceHandle>> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        if let PollTimeout::Immediate = timeout {
            return Ok(self.try_take(selector));
        }

        let deadline = match timeout {
            PollTimeout::After(d) => Some(Instant::now() + d),
            _ => None,
        };

        loop {
            // Register interest in the next notification *before* re-checking the
            // queue, so an insert racing with this check is never missed.
            let notified = self.notify.notified();

            if let Some(handle) = self.try_take(selector) {
                return Ok(Some(handle));
            }

            let cancelled = cancel.cancelled();
            tokio::pin!(notified, cancelled);

            match deadline {
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    tokio::select! {
                        () = tokio::time::sleep(remaining) => return Ok(None),
                        _ = &mut notified => continue,
                        () = &mut cancelled => return Err(PoolError::Cancelled),
                    }
                }
                None => {
                    tokio::select! {
                        _ = &mut notified => continue,
                        () = &mut cancelled => return Err(PoolError::Cancelled),
                    }
                }
            }
        }
    }

    /// Equivalent to `poll` with an unbounded wait.
    pub async fn take(
        &self,
        selector: &dyn Selector,
        cancel: &CancelToken,
    ) -> PoolResult<Option<DeviceHandle>> {
        self.poll(PollTimeout::Unbounded, selector, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CriteriaSelector, DeviceVariant, RuntimeState, Serial};
    use std::sync::Arc;
    use std::time::Duration;

    fn handle(serial: &str) -> DeviceHandle {
        DeviceHandle::new(Serial::new(serial), DeviceVariant::Real, RuntimeState::Online)
    }

    #[tokio::test]
    async fn add_unique_grows_queue_for_new_key() {
        let q = AvailabilityQueue::new();
        assert!(q.add_unique(handle("A1")).is_none());
        assert_eq!(q.len(), 1);
        assert!(q.add_unique(handle("B1")).is_none());
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn add_unique_replaces_in_place_and_preserves_length() {
        let q = AvailabilityQueue::new();
        q.add_unique(handle("A1"));
        q.add_unique(handle("B1"));
        let replaced = q.add_unique(handle("A1"));
        assert!(replaced.is_some());
        assert_eq!(q.len(), 2);
        // FIFO order preserved: A1 still comes out before B1.
        let cancel = CancelToken::new();
        let got = q.poll(PollTimeout::Immediate, &CriteriaSelector::any(), &cancel).await.unwrap();
        assert_eq!(got.unwrap().serial, Serial::new("A1"));
    }

    #[tokio::test]
    async fn poll_immediate_never_blocks() {
        let q = AvailabilityQueue::new();
        let cancel = CancelToken::new();
        let got = q.poll(PollTimeout::Immediate, &CriteriaSelector::any(), &cancel).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn poll_wakes_up_on_insert() {
        let q = Arc::new(AvailabilityQueue::new());
        let cancel = CancelToken::new();
        let q2 = q.clone();
        let waiter = tokio::spawn(async move {
            q2.poll(PollTimeout::Unbounded, &CriteriaSelector::any(), &CancelToken::new()).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.add_unique(handle("A1"));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("poll should resolve promptly after insert")
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().serial, Serial::new("A1"));
        let _ = cancel;
    }

    #[tokio::test]
    async fn poll_times_out_and_reports_none_not_an_error() {
        let q = AvailabilityQueue::new();
        let cancel = CancelToken::new();
        let got = q
            .poll(PollTimeout::After(Duration::from_millis(20)), &CriteriaSelector::any(), &cancel)
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_cancelled_error() {
        let q = Arc::new(AvailabilityQueue::new());
        let cancel = CancelToken::new();
        let q2 = q.clone();
        let cancel2 = cancel.clone();
        let waiter = tokio::spawn(async move {
            q2.poll(PollTimeout::Unbounded, &CriteriaSelector::any(), &cancel2).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(PoolError::Cancelled)));
    }

    #[tokio::test]
    async fn disjoint_selectors_never_steal_from_each_other() {
        let q = Arc::new(AvailabilityQueue::new());
        q.add_unique(handle("A1"));
        q.add_unique(handle("B1"));

        let sel_a = CriteriaSelector::by_serial(Serial::new("A1"));
        let sel_b = CriteriaSelector::by_serial(Serial::new("B1"));
        let cancel = CancelToken::new();

        let got_a = q.poll(PollTimeout::Immediate, &sel_a, &cancel).await.unwrap().unwrap();
        let got_b = q.poll(PollTimeout::Immediate, &sel_b, &cancel).await.unwrap().unwrap();
        assert_eq!(got_a.serial, Serial::new("A1"));
        assert_eq!(got_b.serial, Serial::new("B1"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let q = AvailabilityQueue::new();
        let h = handle("A1");
        q.add_unique(h.clone());
        q.remove(&h);
        q.remove(&h);
        assert!(q.is_empty());
    }
}
