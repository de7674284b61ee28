// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use log_shipper::ShipperConfig;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Endpoint nothing listens on; tests using it never reach the network.
pub const UNUSED_ENDPOINT: &str = "http://127.0.0.1:9/";

/// Config with short backoffs and a one second drain tick.
pub fn test_config(
    queue_capacity: usize,
    max_concurrent_deliveries: usize,
    max_retry: u32,
) -> ShipperConfig {
    ShipperConfig {
        collector_endpoint: UNUSED_ENDPOINT.to_string(),
        queue_capacity,
        high_watermark: (queue_capacity * 4 / 5).max(1),
        max_batch_size: 4,
        max_retry,
        retry_initial_backoff_ms: 10,
        retry_max_backoff_ms: 50,
        max_concurrent_deliveries,
        drain_interval_seconds: 1,
        flush_timeout: 2,
        ..Default::default()
    }
}

pub fn record(i: usize) -> Bytes {
    Bytes::from(format!("{{\"seq\":{i}}}"))
}

/// Polls `condition` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}
