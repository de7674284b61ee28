// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Caps the number of deliveries in flight against the collector.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fair semaphore handing out at most `max` delivery permits at a time.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// Slot for one in-flight delivery, released on drop.
#[derive(Debug)]
pub struct DeliveryPermit {
    // `None` only if the semaphore was closed, which the limiter never does
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyLimiter {
    #[must_use]
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits until a slot is free.
    pub async fn acquire(&self) -> DeliveryPermit {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok();
        DeliveryPermit { _permit: permit }
    }

    pub fn release(&self, permit: DeliveryPermit) {
        drop(permit);
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }
}
