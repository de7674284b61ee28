// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of batches to the remote collector.
//!
//! The drain consumer only sees the [`DeliverySink`] trait: one call per attempt,
//! reporting success, a recoverable error or a fatal error. Retrying is the
//! consumer's job, so implementations must not retry on their own.
//!
//! [`HttpCollectorSink`] POSTs the newline-delimited records of a batch to the
//! configured endpoint, optionally zstd-compressed.

use crate::batch::Batch;
use crate::config::ShipperConfig;
use crate::errors::DeliveryError;
use crate::http::get_client;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::error::Error;
use std::io::Write;
use std::time::Instant;
use tracing::{debug, error, warn};
use zstd::stream::write::Encoder;

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError>;
}

/// Sends batches to an HTTP log collector.
#[derive(Debug, Clone)]
pub struct HttpCollectorSink {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    use_compression: bool,
    compression_level: i32,
}

impl HttpCollectorSink {
    #[must_use]
    pub fn new(config: &ShipperConfig) -> Self {
        Self::with_client(get_client(config), config)
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &ShipperConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        if config.use_compression {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        HttpCollectorSink {
            client,
            endpoint: config.collector_endpoint.clone(),
            headers,
            use_compression: config.use_compression,
            compression_level: config.compression_level,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>, DeliveryError> {
        if !self.use_compression {
            return Ok(data);
        }
        // a batch we cannot encode would fail the same way on every retry
        self.encode(&data)
            .map_err(|e| DeliveryError::Fatal(format!("failed to compress batch: {e}")))
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, Box<dyn Error>> {
        let mut encoder = Encoder::new(Vec::new(), self.compression_level)?;
        encoder.write_all(data)?;
        encoder.finish().map_err(|e| Box::new(e) as Box<dyn Error>)
    }
}

#[async_trait]
impl DeliverySink for HttpCollectorSink {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        let body = self.compress(batch.to_payload())?;
        let time = Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await;
        let elapsed = time.elapsed();

        match resp {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    debug!(
                        "LOGS | Delivered batch {} ({} records) in {} ms",
                        batch.id(),
                        batch.len(),
                        elapsed.as_millis()
                    );
                    return Ok(());
                }
                // Don't read the response body unless the request failed
                let body = resp.text().await.unwrap_or_default();
                Err(classify_status(status, &body))
            }
            Err(e) => {
                warn!(
                    "LOGS | Failed to send batch {} after {} ms: {}",
                    batch.id(),
                    elapsed.as_millis(),
                    e
                );
                if e.is_builder() {
                    Err(DeliveryError::Fatal(e.to_string()))
                } else {
                    Err(DeliveryError::Recoverable(e.to_string()))
                }
            }
        }
    }
}

/// Maps a non-success collector response to an error class.
///
/// Throttling, request timeouts and server errors are recoverable; any other
/// client error (bad payload, rejected credentials) is fatal.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    let message = format!("{status}: {body}");
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DeliveryError::Recoverable(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            error!("LOGS | Request was denied by the collector: {message}. Please verify the endpoint credentials.");
            DeliveryError::Fatal(message)
        }
        s if s.is_client_error() => DeliveryError::Fatal(message),
        _ => DeliveryError::Recoverable(message),
    }
}
