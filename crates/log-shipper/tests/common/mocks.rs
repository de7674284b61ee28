// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock delivery and failover sinks

use async_trait::async_trait;
use bytes::Bytes;
use log_shipper::batch::Batch;
use log_shipper::failover::FailoverSink;
use log_shipper::sink::DeliverySink;
use log_shipper::{DeliveryError, FailoverError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Fails the first `failures_per_batch` attempts of each batch, then succeeds.
///
/// Tracks how many attempts are in progress at once.
pub struct ScriptedSink {
    failures_per_batch: u32,
    latency: Duration,
    attempts: Mutex<HashMap<u64, u32>>,
    delivered: Mutex<Vec<Vec<Bytes>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedSink {
    pub fn new(failures_per_batch: u32, latency: Duration) -> Self {
        Self {
            failures_per_batch,
            latency,
            attempts: Mutex::new(HashMap::new()),
            delivered: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always_succeeding() -> Self {
        Self::new(0, Duration::from_millis(5))
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX, Duration::from_millis(5))
    }

    pub fn delivered_batches(&self) -> Vec<Vec<Bytes>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl DeliverySink for ScriptedSink {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(batch.id()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= self.failures_per_batch {
            return Err(DeliveryError::Recoverable(format!(
                "503 Service Unavailable (attempt {attempt})"
            )));
        }
        self.delivered
            .lock()
            .unwrap()
            .push(batch.records().to_vec());
        Ok(())
    }
}

/// Collector that never answers.
pub struct UnresponsiveSink;

#[async_trait]
impl DeliverySink for UnresponsiveSink {
    async fn deliver(&self, _batch: &Batch) -> Result<(), DeliveryError> {
        std::future::pending().await
    }
}

/// Failover store keeping batches in memory.
#[derive(Default)]
pub struct MemoryFailover {
    stored: Mutex<Vec<Vec<Bytes>>>,
}

#[allow(dead_code)]
impl MemoryFailover {
    pub fn stored_records(&self) -> usize {
        self.stored.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl FailoverSink for MemoryFailover {
    async fn store(&self, batch: &Batch) -> Result<(), FailoverError> {
        self.stored.lock().unwrap().push(batch.records().to_vec());
        Ok(())
    }
}
