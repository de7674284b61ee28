// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO buffer between the log producer and the drain consumer.
//!
//! ```text
//!   producer ──offer/enqueue──> [ capacity N ] ──drain──> DrainConsumer
//!                                     │
//!                    high-watermark ──┘ (wakes the drain loop early)
//! ```
//!
//! The queue never holds more than `capacity` records. A full queue either
//! suspends the producer ([`QueueProducer::enqueue`]) or rejects the record with
//! [`QueueError::QueueFull`] ([`QueueProducer::offer`]), and every rejection is
//! counted. Closing the queue stops intake while the consumer keeps draining
//! buffered records until it sees [`Drained::Exhausted`].

use crate::errors::QueueError;
use crate::telemetry::ShipperMetrics;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One opaque payload as received from the producer.
pub type EventRecord = Bytes;

/// Result of a single [`QueueConsumer::drain`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drained {
    /// Records in enqueue order, at most `max_items` of them.
    Batch(Vec<EventRecord>),
    /// Nothing arrived within the wait.
    Empty,
    /// The queue is closed and every buffered record has been drained.
    Exhausted,
}

/// How producers are treated when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    /// Suspend the producer until space frees up.
    #[default]
    Block,
    /// Reject the record with `QueueFull`.
    Reject,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    high_watermark: usize,
    closed: CancellationToken,
    watermark_crossed: Notify,
    metrics: Arc<ShipperMetrics>,
}

impl Shared {
    /// Closes intake under the accounting lock, so an admission either lands
    /// before the close or sees it.
    fn close(&self) {
        self.metrics.exclusive(|| self.closed.cancel());
    }
}

/// Creates a queue holding at most `capacity` records.
///
/// `high_watermark` is the occupancy at which the consumer is woken ahead of its
/// next tick; it is clamped to `1..=capacity`.
#[must_use]
pub fn bounded(
    capacity: usize,
    high_watermark: usize,
    metrics: Arc<ShipperMetrics>,
) -> (QueueProducer, QueueConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let shared = Arc::new(Shared {
        capacity,
        high_watermark: high_watermark.clamp(1, capacity),
        closed: CancellationToken::new(),
        watermark_crossed: Notify::new(),
        metrics,
    });
    (
        QueueProducer {
            tx,
            shared: Arc::clone(&shared),
        },
        QueueConsumer {
            rx,
            shared,
            rx_closed: false,
        },
    )
}

/// Producer side of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<EventRecord>,
    shared: Arc<Shared>,
}

impl QueueProducer {
    /// Pushes `record` without waiting.
    pub fn offer(&self, record: EventRecord) -> Result<(), QueueError> {
        let admitted = self.shared.metrics.admit(|| {
            if self.is_closed() {
                return Err(TrySendError::Closed(record));
            }
            self.tx.try_send(record)
        });
        match admitted {
            Some(Ok(())) => {
                self.after_admit();
                Ok(())
            }
            Some(Err(TrySendError::Full(_))) => {
                self.shared.metrics.record_rejection();
                debug!(
                    "LOGS | Queue full ({} records), rejecting record",
                    self.shared.capacity
                );
                Err(QueueError::QueueFull)
            }
            Some(Err(TrySendError::Closed(_))) | None => Err(QueueError::QueueClosed),
        }
    }

    /// Pushes `record`, waiting for space while the queue is full.
    ///
    /// A producer waiting on a full queue is released with `QueueClosed` as soon
    /// as the queue closes.
    pub async fn enqueue(&self, record: EventRecord) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::QueueClosed);
        }
        let permit = tokio::select! {
            biased;
            () = self.shared.closed.cancelled() => return Err(QueueError::QueueClosed),
            permit = self.tx.reserve() => permit.map_err(|_| QueueError::QueueClosed)?,
        };
        let admitted = self.shared.metrics.admit(|| {
            if self.is_closed() {
                return Err(QueueError::QueueClosed);
            }
            permit.send(record);
            Ok(())
        });
        match admitted {
            Some(Ok(())) => {
                self.after_admit();
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Err(QueueError::QueueClosed),
        }
    }

    /// Pushes `record` the way `policy` treats a full queue.
    pub async fn push(
        &self,
        record: EventRecord,
        policy: QueueFullPolicy,
    ) -> Result<(), QueueError> {
        match policy {
            QueueFullPolicy::Block => self.enqueue(record).await,
            QueueFullPolicy::Reject => self.offer(record),
        }
    }

    /// Stops intake. Buffered records stay drainable.
    pub fn close(&self) {
        if !self.shared.closed.is_cancelled() {
            debug!("LOGS | Closing queue with {} buffered records", self.len());
        }
        self.shared.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Number of records currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn after_admit(&self) {
        let occupancy = self.len();
        self.shared.metrics.set_queue_occupancy(occupancy);
        if occupancy >= self.shared.high_watermark {
            self.shared.watermark_crossed.notify_one();
        }
    }
}

/// Consumer side of the queue. Only one exists per queue.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<EventRecord>,
    shared: Arc<Shared>,
    rx_closed: bool,
}

impl QueueConsumer {
    /// Returns up to `max_items` records available within `wait`.
    ///
    /// A zero `wait` only collects what is already buffered. Once the queue is
    /// closed this keeps returning buffered records, then `Exhausted`.
    pub async fn drain(&mut self, max_items: usize, wait: Duration) -> Drained {
        let max_items = max_items.max(1);
        let mut records = Vec::with_capacity(max_items.min(self.shared.capacity));
        if self.shared.closed.is_cancelled() {
            self.close_receiver();
        }

        let closed = self.shared.closed.clone();
        let received = tokio::select! {
            biased;
            received = self.rx.recv_many(&mut records, max_items) => Some(received),
            () = closed.cancelled(), if !self.rx_closed => {
                self.close_receiver();
                Some(self.rx.recv_many(&mut records, max_items).await)
            }
            () = tokio::time::sleep(wait) => None,
        };

        self.shared.metrics.set_queue_occupancy(self.rx.len());
        match received {
            None => Drained::Empty,
            // recv_many only returns 0 once the channel is closed and empty
            Some(0) => Drained::Exhausted,
            Some(_) => Drained::Batch(records),
        }
    }

    /// Stops intake, same as [`QueueProducer::close`].
    pub fn close(&mut self) {
        self.shared.close();
        self.close_receiver();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Resolves when producers push the queue to its high-watermark.
    pub async fn watermark_crossed(&self) {
        self.shared.watermark_crossed.notified().await;
    }

    #[must_use]
    pub fn reached_watermark(&self) -> bool {
        self.rx.len() >= self.shared.high_watermark
    }

    fn close_receiver(&mut self) {
        if !self.rx_closed {
            self.rx.close();
            self.rx_closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queue(capacity: usize) -> (QueueProducer, QueueConsumer, Arc<ShipperMetrics>) {
        let metrics = Arc::new(ShipperMetrics::new());
        let (producer, consumer) = bounded(capacity, capacity, Arc::clone(&metrics));
        (producer, consumer, metrics)
    }

    fn record(i: usize) -> EventRecord {
        Bytes::from(format!("record-{i}"))
    }

    #[tokio::test]
    async fn test_drain_preserves_enqueue_order() {
        let (producer, mut consumer, _) = queue(10);
        for i in 0..5 {
            producer.offer(record(i)).unwrap();
        }

        let drained = consumer.drain(10, Duration::ZERO).await;
        assert_eq!(drained, Drained::Batch((0..5).map(record).collect()));
    }

    #[tokio::test]
    async fn test_drain_respects_max_items() {
        let (producer, mut consumer, _) = queue(10);
        for i in 0..7 {
            producer.offer(record(i)).unwrap();
        }

        assert_eq!(
            consumer.drain(4, Duration::ZERO).await,
            Drained::Batch((0..4).map(record).collect())
        );
        assert_eq!(
            consumer.drain(4, Duration::ZERO).await,
            Drained::Batch((4..7).map(record).collect())
        );
        assert_eq!(consumer.drain(4, Duration::ZERO).await, Drained::Empty);
    }

    #[tokio::test]
    async fn test_offer_rejects_when_full() {
        let (producer, _consumer, metrics) = queue(2);
        producer.offer(record(0)).unwrap();
        producer.offer(record(1)).unwrap();

        assert_eq!(producer.offer(record(2)), Err(QueueError::QueueFull));
        assert_eq!(producer.len(), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queue_rejections, 1);
        assert_eq!(snapshot.records_enqueued, 2);
        assert_eq!(snapshot.queue_occupancy, 2);
    }

    #[tokio::test]
    async fn test_enqueue_blocks_until_drained() {
        let (producer, mut consumer, _) = queue(1);
        producer.enqueue(record(0)).await.unwrap();

        let blocked = producer.clone();
        let pending = tokio::spawn(async move { blocked.enqueue(record(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        assert_eq!(
            consumer.drain(1, Duration::ZERO).await,
            Drained::Batch(vec![record(0)])
        );
        pending.await.unwrap().unwrap();
        assert_eq!(
            consumer.drain(1, Duration::from_millis(50)).await,
            Drained::Batch(vec![record(1)])
        );
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_producer() {
        let (producer, _consumer, _) = queue(1);
        producer.offer(record(0)).unwrap();

        let blocked = producer.clone();
        let pending = tokio::spawn(async move { blocked.enqueue(record(1)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        producer.close();

        assert_eq!(pending.await.unwrap(), Err(QueueError::QueueClosed));
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_exhausts() {
        let (producer, mut consumer, _) = queue(5);
        producer.offer(record(0)).unwrap();
        producer.offer(record(1)).unwrap();
        producer.close();

        assert_eq!(producer.offer(record(2)), Err(QueueError::QueueClosed));
        assert_eq!(
            producer.enqueue(record(3)).await,
            Err(QueueError::QueueClosed)
        );
        assert_eq!(
            consumer.drain(10, Duration::from_secs(1)).await,
            Drained::Batch(vec![record(0), record(1)])
        );
        assert_eq!(
            consumer.drain(10, Duration::from_secs(1)).await,
            Drained::Exhausted
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_offers_racing_close_are_admitted_before_it() {
        let (producer, mut consumer, metrics) = queue(1000);
        let mut offers = Vec::new();
        for t in 0..4 {
            let producer = producer.clone();
            offers.push(tokio::spawn(async move {
                let mut accepted = 0u64;
                for i in 0..200 {
                    match producer.offer(record(t * 200 + i)) {
                        Ok(()) => accepted += 1,
                        Err(e) => assert_eq!(e, QueueError::QueueClosed),
                    }
                    tokio::task::yield_now().await;
                }
                accepted
            }));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        producer.close();
        let enqueued_at_close = metrics.snapshot().records_enqueued;

        let mut accepted = 0;
        for offer in offers {
            accepted += offer.await.unwrap();
        }
        let mut drained = 0;
        while let Drained::Batch(batch) = consumer.drain(100, Duration::ZERO).await {
            drained += batch.len() as u64;
        }
        assert_eq!(accepted, enqueued_at_close);
        assert_eq!(drained, accepted);
    }

    #[tokio::test]
    async fn test_reached_watermark_tracks_occupancy() {
        let metrics = Arc::new(ShipperMetrics::new());
        let (producer, mut consumer) = bounded(10, 3, metrics);
        producer.offer(record(0)).unwrap();
        producer.offer(record(1)).unwrap();
        assert!(!consumer.reached_watermark());

        producer.offer(record(2)).unwrap();
        assert!(consumer.reached_watermark());

        assert_eq!(
            consumer.drain(1, Duration::ZERO).await,
            Drained::Batch(vec![record(0)])
        );
        assert!(!consumer.reached_watermark());
    }

    #[tokio::test]
    async fn test_close_interrupts_waiting_drain() {
        let (producer, mut consumer, _) = queue(5);
        let closer = producer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let drained = tokio::time::timeout(
            Duration::from_secs(1),
            consumer.drain(10, Duration::from_secs(30)),
        )
        .await
        .expect("drain should return when the queue closes");
        assert_eq!(drained, Drained::Exhausted);
    }

    #[tokio::test]
    async fn test_drain_times_out_empty() {
        let (_producer, mut consumer, _) = queue(5);
        assert_eq!(
            consumer.drain(10, Duration::from_millis(10)).await,
            Drained::Empty
        );
    }

    #[tokio::test]
    async fn test_watermark_notifies_consumer() {
        let metrics = Arc::new(ShipperMetrics::new());
        let (producer, consumer) = bounded(10, 3, metrics);
        for i in 0..3 {
            producer.offer(record(i)).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), consumer.watermark_crossed())
            .await
            .expect("watermark notification");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Offer,
        Drain(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Offer), (1usize..8).prop_map(Op::Drain)]
    }

    proptest! {
        #[test]
        fn occupancy_never_exceeds_capacity(
            capacity in 1usize..16,
            ops in proptest::collection::vec(op(), 1..200),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            runtime.block_on(async {
                let (producer, mut consumer, metrics) = queue(capacity);
                let mut next = 0usize;
                let mut expected_head = 0usize;
                for op in ops {
                    match op {
                        Op::Offer => {
                            if producer.offer(record(next)).is_ok() {
                                next += 1;
                            }
                        }
                        Op::Drain(max) => {
                            if let Drained::Batch(batch) = consumer.drain(max, Duration::ZERO).await {
                                assert!(batch.len() <= max);
                                for item in batch {
                                    assert_eq!(item, record(expected_head));
                                    expected_head += 1;
                                }
                            }
                        }
                    }
                    assert!(producer.len() <= capacity);
                    assert!(consumer.len() <= capacity);
                    assert!(metrics.snapshot().queue_occupancy <= capacity as u64);
                }
            });
        }
    }
}
