// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the shipper.
//!
//! Transient delivery errors never leave the drain consumer: they are fed to the
//! retry policy and end up as delivered, failed-over or lost records. Only queue
//! errors (for producers) and configuration/lifecycle errors surface to callers.

/// Errors returned to producers pushing records into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue holds `capacity` records. The caller may retry the offer later.
    #[error("queue is full")]
    QueueFull,

    /// The queue was closed because shutdown is in progress.
    #[error("queue is closed")]
    QueueClosed,
}

/// Outcome of a failed delivery attempt against the collector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Transient failure (timeouts, 5xx, throttling). Subject to the retry policy.
    #[error("recoverable delivery error: {0}")]
    Recoverable(String),

    /// Non-retryable failure (malformed batch, rejected credentials).
    #[error("fatal delivery error: {0}")]
    Fatal(String),
}

impl DeliveryError {
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeliveryError::Recoverable(_))
    }
}

/// The failover store could not persist a batch; its records are lost.
#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    #[error("failover store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Lifecycle errors of the shipper facade.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Shipper already started")]
    AlreadyStarted,

    #[error("Receiver I/O error: {0}")]
    Receiver(#[from] std::io::Error),
}
