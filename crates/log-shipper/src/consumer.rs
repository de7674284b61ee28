// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The drain loop: pull records from the queue, batch them, and deliver each
//! batch on its own task under the concurrency limiter.
//!
//! # States
//!
//! ```text
//!              tick / high-watermark
//!   Running ─────────────────────────> Draining
//!      ^                                   │
//!      └───────── batches dispatched ──────┘
//!
//!   any state ──cancellation──> Flushing ──queue exhausted,──> Stopped
//!                                          nothing in flight
//! ```
//!
//! # Delivery
//!
//! Every dispatched batch becomes a [`DeliveryAttempt`] driven by its own task:
//!
//! 1. hold a limiter permit while calling the sink;
//! 2. release the permit, ask the retry policy, sleep the backoff;
//! 3. re-acquire a permit and try again, or give up;
//! 4. on give-up, store the batch in the failover sink if there is one,
//!    otherwise count its records as lost.
//!
//! Once cancellation is observed the retry policy switches to the flush policy
//! (at most one retry) and pending backoff waits are cut short. Network calls
//! already in progress are never interrupted by cancellation.
//!
//! A delivery task keeps its batch while it sleeps in a backoff, without holding
//! a permit. The number of live tasks is capped at one queue's worth of batches
//! (never below the concurrency limit); past that, records stay in the queue.

use crate::batch::Batch;
use crate::errors::DeliveryError;
use crate::failover::FailoverSink;
use crate::limiter::{ConcurrencyLimiter, DeliveryPermit};
use crate::queue::{Drained, EventRecord, QueueConsumer};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::sink::DeliverySink;
use crate::telemetry::{Outcome, ShipperMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a flush drain waits for a record before polling again.
const FLUSH_DRAIN_WAIT: Duration = Duration::from_millis(50);

/// Shortest drain tick; `tokio::time::interval` panics on zero.
const MIN_DRAIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    Draining,
    Flushing,
    Stopped,
}

pub struct DrainConsumerConfig {
    pub sink: Arc<dyn DeliverySink>,
    /// `None` when failover is disabled.
    pub failover: Option<Arc<dyn FailoverSink>>,
    pub limiter: ConcurrencyLimiter,
    pub retry_policy: RetryPolicy,
    pub metrics: Arc<ShipperMetrics>,
    pub drain_interval: Duration,
    pub max_batch_size: usize,
}

pub struct DrainConsumer {
    queue: QueueConsumer,
    delivery: Delivery,
    drain_interval: Duration,
    max_batch_size: usize,
    max_live_deliveries: usize,
    shutdown: CancellationToken,
    state: watch::Sender<ConsumerState>,
    in_flight: JoinSet<()>,
    next_batch_id: u64,
}

impl DrainConsumer {
    #[must_use]
    pub fn new(
        queue: QueueConsumer,
        config: DrainConsumerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Running);
        let max_batch_size = config.max_batch_size.max(1);
        let max_live_deliveries = queue
            .capacity()
            .div_ceil(max_batch_size)
            .max(config.limiter.max());
        DrainConsumer {
            queue,
            delivery: Delivery {
                sink: config.sink,
                failover: config.failover,
                limiter: config.limiter,
                retry_policy: config.retry_policy,
                metrics: config.metrics,
                shutdown: shutdown.clone(),
            },
            drain_interval: config.drain_interval.max(MIN_DRAIN_INTERVAL),
            max_batch_size,
            max_live_deliveries,
            shutdown,
            state,
            in_flight: JoinSet::new(),
            next_batch_id: 0,
        }
    }

    /// Receiver observing the consumer's state transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Runs until cancellation (or until every producer is gone), then flushes.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        debug!(
            "LOGS | Drain consumer started, interval {} ms",
            self.drain_interval.as_millis()
        );
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                () = self.queue.watermark_crossed() => {
                    debug!("LOGS | Queue reached high watermark, draining early");
                }
                Some(result) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    reap(result);
                    if !self.queue.reached_watermark() {
                        continue;
                    }
                }
            }

            self.set_state(ConsumerState::Draining);
            let exhausted = self.drain_available().await;
            self.set_state(ConsumerState::Running);
            if exhausted {
                debug!("LOGS | Queue exhausted, all producers are gone");
                break;
            }
        }

        self.flush().await;
        self.set_state(ConsumerState::Stopped);
        debug!("LOGS | Drain consumer stopped");
    }

    /// Drains what is buffered right now, bounded by the queue capacity so a busy
    /// producer cannot hold the loop in `Draining`. Returns true if the queue is
    /// exhausted.
    ///
    /// Leaves records queued while `max_live_deliveries` tasks are alive.
    async fn drain_available(&mut self) -> bool {
        let budget = self.queue.capacity();
        let mut drained = 0;
        while drained < budget && self.in_flight.len() < self.max_live_deliveries {
            match self.queue.drain(self.max_batch_size, Duration::ZERO).await {
                Drained::Batch(records) => {
                    drained += records.len();
                    self.dispatch(records).await;
                }
                Drained::Empty => break,
                Drained::Exhausted => return true,
            }
        }
        if drained > 0 {
            debug!("LOGS | Dispatched {} records", drained);
        }
        false
    }

    async fn flush(&mut self) {
        self.set_state(ConsumerState::Flushing);
        self.queue.close();
        info!(
            "LOGS | Flushing {} buffered records, {} deliveries in flight",
            self.queue.len(),
            self.in_flight.len()
        );

        loop {
            self.wait_for_live_slot().await;
            match self
                .queue
                .drain(self.max_batch_size, FLUSH_DRAIN_WAIT)
                .await
            {
                Drained::Batch(records) => self.dispatch(records).await,
                // a producer still holds a reserved slot
                Drained::Empty => continue,
                Drained::Exhausted => break,
            }
        }

        while let Some(result) = self.in_flight.join_next().await {
            reap(result);
        }
        info!("LOGS | Flush complete");
    }

    async fn wait_for_live_slot(&mut self) {
        while self.in_flight.len() >= self.max_live_deliveries {
            match self.in_flight.join_next().await {
                Some(result) => reap(result),
                None => break,
            }
        }
    }

    async fn dispatch(&mut self, records: Vec<EventRecord>) {
        let permit = self.delivery.limiter.acquire().await;
        let batch = Batch::new(self.next_batch_id, records);
        self.next_batch_id += 1;

        let attempt = DeliveryAttempt::new(batch, Arc::clone(&self.delivery.metrics));
        let delivery = self.delivery.clone();
        self.in_flight.spawn(delivery.run(attempt, permit));
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

fn reap(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("LOGS | Delivery task panicked: {}", e);
        } else {
            debug!("LOGS | Delivery task cancelled: {}", e);
        }
    }
}

/// One batch on its way to the collector.
///
/// Dropping an attempt that never reached a terminal outcome (task aborted or
/// panicked) counts its records as lost.
#[derive(Debug)]
pub struct DeliveryAttempt {
    batch: Batch,
    attempts: u32,
    last_error: Option<DeliveryError>,
    next_retry_at: Option<Instant>,
    metrics: Arc<ShipperMetrics>,
    resolved: bool,
}

impl DeliveryAttempt {
    fn new(batch: Batch, metrics: Arc<ShipperMetrics>) -> Self {
        Self {
            batch,
            attempts: 0,
            last_error: None,
            next_retry_at: None,
            metrics,
            resolved: false,
        }
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&DeliveryError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.next_retry_at
    }

    fn record_failure(&mut self, error: DeliveryError, retry_after: Option<Duration>) {
        self.last_error = Some(error);
        self.next_retry_at = retry_after.map(|delay| Instant::now() + delay);
    }

    fn finish(mut self, outcome: Outcome) {
        self.resolved = true;
        self.metrics.resolve(outcome, self.batch.len() as u64);
    }
}

impl Drop for DeliveryAttempt {
    fn drop(&mut self) {
        if !self.resolved && self.metrics.resolve(Outcome::Lost, self.batch.len() as u64) {
            warn!(
                "LOGS | Batch {} ({} records) abandoned after {} attempts",
                self.batch.id(),
                self.batch.len(),
                self.attempts
            );
        }
    }
}

/// Everything a delivery task needs, shared by all of them.
#[derive(Clone)]
struct Delivery {
    sink: Arc<dyn DeliverySink>,
    failover: Option<Arc<dyn FailoverSink>>,
    limiter: ConcurrencyLimiter,
    retry_policy: RetryPolicy,
    metrics: Arc<ShipperMetrics>,
    shutdown: CancellationToken,
}

impl Delivery {
    async fn run(self, mut attempt: DeliveryAttempt, permit: DeliveryPermit) {
        let mut permit = Some(permit);
        loop {
            let held = match permit.take() {
                Some(held) => held,
                None => self.limiter.acquire().await,
            };
            attempt.attempts += 1;
            let result = self.sink.deliver(&attempt.batch).await;
            self.limiter.release(held);

            let error = match result {
                Ok(()) => {
                    attempt.finish(Outcome::Delivered);
                    return;
                }
                Err(error) => error,
            };

            let policy = if self.shutdown.is_cancelled() {
                self.retry_policy.for_flush()
            } else {
                self.retry_policy
            };
            match policy.should_retry(attempt.attempts, &error) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        "LOGS | Batch {} attempt {} failed: {}, retrying in {} ms",
                        attempt.batch.id(),
                        attempt.attempts,
                        error,
                        delay.as_millis()
                    );
                    attempt.record_failure(error, Some(delay));
                    self.backoff(&attempt).await;
                }
                RetryDecision::GiveUp => {
                    attempt.record_failure(error, None);
                    self.give_up(attempt).await;
                    return;
                }
            }
        }
    }

    /// Sleeps until the attempt's next retry, or less if cancellation arrives
    /// while sleeping.
    async fn backoff(&self, attempt: &DeliveryAttempt) {
        let Some(retry_at) = attempt.next_retry_at() else {
            return;
        };
        if self.shutdown.is_cancelled() {
            tokio::time::sleep_until(retry_at).await;
            return;
        }
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep_until(retry_at) => {}
        }
    }

    async fn give_up(&self, attempt: DeliveryAttempt) {
        if let Some(error) = attempt.last_error() {
            warn!(
                "LOGS | Giving up on batch {} ({} records) after {} attempts: {}",
                attempt.batch.id(),
                attempt.batch.len(),
                attempt.attempts,
                error
            );
        }
        let Some(failover) = &self.failover else {
            error!(
                "LOGS | Dropping batch {} ({} records), failover is disabled",
                attempt.batch.id(),
                attempt.batch.len()
            );
            attempt.finish(Outcome::Lost);
            return;
        };

        match failover.store(&attempt.batch).await {
            Ok(()) => {
                debug!(
                    "LOGS | Batch {} ({} records) stored in failover",
                    attempt.batch.id(),
                    attempt.batch.len()
                );
                attempt.finish(Outcome::FailedOver);
            }
            Err(e) => {
                error!(
                    "LOGS | Failed to store batch {} ({} records) in failover: {}",
                    attempt.batch.id(),
                    attempt.batch.len(),
                    e
                );
                attempt.finish(Outcome::Lost);
            }
        }
    }
}
