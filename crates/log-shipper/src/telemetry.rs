// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery counters and the queue occupancy gauge.
//!
//! Every accepted record ends in exactly one of three terminal counters:
//! delivered, failed over or lost. The counters are plain atomics so they can be
//! read at any time, but every transition goes through one mutex so that
//! [`ShipperMetrics::seal`] can account for unresolved records exactly once when
//! the shutdown deadline elapses. After sealing, late outcomes are ignored.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Terminal outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    FailedOver,
    Lost,
}

#[derive(Debug, Default)]
pub struct ShipperMetrics {
    records_enqueued: AtomicU64,
    records_delivered: AtomicU64,
    records_failed_over: AtomicU64,
    records_lost: AtomicU64,
    queue_rejections: AtomicU64,
    queue_occupancy: AtomicU64,
    sealed: Mutex<bool>,
}

/// Point-in-time copy of the counters, served by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_enqueued: u64,
    pub records_delivered: u64,
    pub records_failed_over: u64,
    pub records_lost: u64,
    pub queue_rejections: u64,
    pub queue_occupancy: u64,
}

impl MetricsSnapshot {
    /// Records accepted but not yet delivered, failed over or lost.
    #[must_use]
    pub fn unresolved(&self) -> u64 {
        let resolved = self.records_delivered + self.records_failed_over + self.records_lost;
        self.records_enqueued.saturating_sub(resolved)
    }
}

impl ShipperMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `admit` under the accounting lock and counts one enqueued record if it
    /// succeeds. Returns `None` without calling `admit` once sealed.
    pub(crate) fn admit<T, E>(&self, admit: impl FnOnce() -> Result<T, E>) -> Option<Result<T, E>> {
        let sealed = self.lock();
        if *sealed {
            return None;
        }
        let result = admit();
        if result.is_ok() {
            self.records_enqueued.fetch_add(1, Ordering::Relaxed);
        }
        Some(result)
    }

    /// Runs `f` under the accounting lock, so it cannot interleave with `admit`.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _sealed = self.lock();
        f()
    }

    /// Counts `records` under `outcome`. Returns false if the accounting was sealed
    /// and the outcome was ignored.
    pub(crate) fn resolve(&self, outcome: Outcome, records: u64) -> bool {
        let sealed = self.lock();
        if *sealed {
            return false;
        }
        let counter = match outcome {
            Outcome::Delivered => &self.records_delivered,
            Outcome::FailedOver => &self.records_failed_over,
            Outcome::Lost => &self.records_lost,
        };
        counter.fetch_add(records, Ordering::Relaxed);
        true
    }

    pub(crate) fn record_rejection(&self) {
        self.queue_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_queue_occupancy(&self, occupancy: usize) {
        self.queue_occupancy
            .store(occupancy as u64, Ordering::Relaxed);
    }

    /// Freezes the accounting and counts every unresolved record as lost.
    ///
    /// Returns the number of records that were unresolved at the time of sealing.
    /// Calling it twice returns 0 the second time.
    pub fn seal(&self) -> u64 {
        let mut sealed = self.lock();
        if *sealed {
            return 0;
        }
        let unresolved = self.snapshot().unresolved();
        self.records_lost.fetch_add(unresolved, Ordering::Relaxed);
        *sealed = true;
        unresolved
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        *self.lock()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            records_failed_over: self.records_failed_over.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
            queue_occupancy: self.queue_occupancy.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, bool> {
        match self.sealed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("LOGS | Accounting lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
