// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::ShipperConfig;
use crate::consumer::{ConsumerState, DrainConsumer, DrainConsumerConfig};
use crate::errors::{QueueError, ShipperError};
use crate::failover::{DirectoryFailoverSink, FailoverSink};
use crate::limiter::ConcurrencyLimiter;
use crate::queue::{bounded, EventRecord, QueueProducer};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::sink::{DeliverySink, HttpCollectorSink};
use crate::telemetry::ShipperMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owns the queue, the drain consumer and the shutdown coordinator.
///
/// Records can be offered as soon as the shipper is built; they are only
/// drained once [`LogShipper::start`] has been called.
pub struct LogShipper {
    config: ShipperConfig,
    metrics: Arc<ShipperMetrics>,
    producer: QueueProducer,
    consumer: Option<DrainConsumer>,
    state: watch::Receiver<ConsumerState>,
    coordinator: Option<ShutdownCoordinator>,
    shutdown: CancellationToken,
}

impl LogShipper {
    #[must_use]
    pub fn new(
        config: ShipperConfig,
        sink: Arc<dyn DeliverySink>,
        failover: Option<Arc<dyn FailoverSink>>,
    ) -> Self {
        let metrics = Arc::new(ShipperMetrics::new());
        let (producer, queue) = bounded(
            config.queue_capacity,
            config.high_watermark,
            Arc::clone(&metrics),
        );
        let shutdown = CancellationToken::new();
        let consumer = DrainConsumer::new(
            queue,
            DrainConsumerConfig {
                sink,
                failover,
                limiter: ConcurrencyLimiter::new(config.max_concurrent_deliveries),
                retry_policy: config.retry_policy(),
                metrics: Arc::clone(&metrics),
                drain_interval: config.drain_interval(),
                max_batch_size: config.max_batch_size,
            },
            shutdown.clone(),
        );
        let state = consumer.state_receiver();

        LogShipper {
            config,
            metrics,
            producer,
            consumer: Some(consumer),
            state,
            coordinator: None,
            shutdown,
        }
    }

    /// Validates `config` and wires the HTTP collector sink, plus the directory
    /// failover sink when failover is enabled.
    pub fn from_config(config: ShipperConfig) -> Result<Self, ShipperError> {
        config.validate()?;
        let sink: Arc<dyn DeliverySink> = Arc::new(HttpCollectorSink::new(&config));
        let failover: Option<Arc<dyn FailoverSink>> = if config.failover_enabled {
            debug!(
                "LOGS | Failover enabled, writing to {}",
                config.failover_directory.display()
            );
            Some(Arc::new(DirectoryFailoverSink::new(
                config.failover_directory.clone(),
            )))
        } else {
            None
        };
        Ok(Self::new(config, sink, failover))
    }

    /// Spawns the drain loop on the current tokio runtime.
    pub fn start(&mut self) -> Result<(), ShipperError> {
        let consumer = self.consumer.take().ok_or(ShipperError::AlreadyStarted)?;
        let handle = tokio::spawn(consumer.run());
        self.coordinator = Some(ShutdownCoordinator::new(
            self.shutdown.clone(),
            self.producer.clone(),
            handle,
            Arc::clone(&self.metrics),
        ));
        info!(
            "LOGS | Log shipper started: queue capacity {}, {} concurrent deliveries, drain every {} s",
            self.config.queue_capacity,
            self.config.max_concurrent_deliveries,
            self.config.drain_interval_seconds
        );
        Ok(())
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.consumer.is_none()
    }

    /// Pushes `record` without waiting; a full queue rejects it.
    pub fn offer(&self, record: impl Into<EventRecord>) -> Result<(), QueueError> {
        self.producer.offer(record.into())
    }

    /// Pushes `record`, waiting for space if the queue is full.
    pub async fn enqueue(&self, record: impl Into<EventRecord>) -> Result<(), QueueError> {
        self.producer.enqueue(record.into()).await
    }

    /// Producer handle to hand to upstream collaborators.
    #[must_use]
    pub fn producer(&self) -> QueueProducer {
        self.producer.clone()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<ShipperMetrics> {
        Arc::clone(&self.metrics)
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    #[must_use]
    pub fn config(&self) -> &ShipperConfig {
        &self.config
    }

    /// Closes the queue, flushes buffered records and returns once the consumer
    /// has stopped or `deadline` has elapsed.
    ///
    /// A shipper that was never started is started first so that records offered
    /// before shutdown still get flushed.
    pub async fn shutdown_and_flush(&mut self, deadline: Duration) -> ShutdownReport {
        if !self.is_started() {
            if let Err(e) = self.start() {
                debug!("LOGS | Shipper could not start before flushing: {}", e);
            }
        }
        match self.coordinator.as_mut() {
            Some(coordinator) => coordinator.shutdown_and_flush(deadline).await,
            None => ShutdownReport::default(),
        }
    }
}
