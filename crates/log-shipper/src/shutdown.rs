// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded shutdown: close the queue, flush, and give up at a hard deadline.
//!
//! The host gives the process a short termination window, so the flush is raced
//! against a deadline. When the deadline wins, the accounting is sealed (every
//! record still queued or in flight is counted as lost), the consumer is
//! aborted, and the process is free to exit.

use crate::queue::QueueProducer;
use crate::telemetry::ShipperMetrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delivery completeness at the end of a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub records_enqueued: u64,
    pub records_delivered: u64,
    pub records_failed_over: u64,
    /// Every record counted as lost over the shipper's lifetime, abandoned ones
    /// included.
    pub records_lost: u64,
    /// Records still queued or in flight when the deadline elapsed.
    pub records_abandoned: u64,
    pub timed_out: bool,
}

pub struct ShutdownCoordinator {
    shutdown: CancellationToken,
    producer: QueueProducer,
    consumer: Option<JoinHandle<()>>,
    metrics: Arc<ShipperMetrics>,
    report: Option<ShutdownReport>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new(
        shutdown: CancellationToken,
        producer: QueueProducer,
        consumer: JoinHandle<()>,
        metrics: Arc<ShipperMetrics>,
    ) -> Self {
        Self {
            shutdown,
            producer,
            consumer: Some(consumer),
            metrics,
            report: None,
        }
    }

    /// Token whose cancellation moves the consumer into `Flushing`.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops intake, flushes, and waits at most `deadline` for the consumer to
    /// stop. Calling it again returns the first report.
    pub async fn shutdown_and_flush(&mut self, deadline: Duration) -> ShutdownReport {
        if let Some(report) = self.report {
            return report;
        }
        let Some(mut consumer) = self.consumer.take() else {
            return self.build_report(0, false);
        };

        let started = Instant::now();
        info!(
            "LOGS | Shutting down, {} records buffered, deadline {} ms",
            self.producer.len(),
            deadline.as_millis()
        );
        self.producer.close();
        self.shutdown.cancel();

        let report = match tokio::time::timeout(deadline, &mut consumer).await {
            Ok(Ok(())) => {
                debug!(
                    "LOGS | Flush finished in {} ms",
                    started.elapsed().as_millis()
                );
                self.build_report(0, false)
            }
            Ok(Err(e)) => {
                // the consumer died without resolving its records
                error!("LOGS | Drain consumer failed: {}", e);
                let abandoned = self.metrics.seal();
                self.build_report(abandoned, false)
            }
            Err(_) => {
                let abandoned = self.metrics.seal();
                consumer.abort();
                warn!(
                    "LOGS | Shutdown deadline of {} ms elapsed, {} records abandoned",
                    deadline.as_millis(),
                    abandoned
                );
                self.build_report(abandoned, true)
            }
        };

        info!(
            "LOGS | Shutdown complete: {} delivered, {} failed over, {} lost",
            report.records_delivered, report.records_failed_over, report.records_lost
        );
        self.report = Some(report);
        report
    }

    fn build_report(&self, abandoned: u64, timed_out: bool) -> ShutdownReport {
        let snapshot = self.metrics.snapshot();
        ShutdownReport {
            records_enqueued: snapshot.records_enqueued,
            records_delivered: snapshot.records_delivered,
            records_failed_over: snapshot.records_failed_over,
            records_lost: snapshot.records_lost,
            records_abandoned: abandoned,
            timed_out,
        }
    }
}
