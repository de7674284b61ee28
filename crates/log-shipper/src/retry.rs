// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry decisions for failed deliveries.
//!
//! The delay before retry `n` (1-based) is `initial_backoff × 2^(n-1)`, capped at
//! `max_backoff`. Fatal errors are never retried. During the shutdown flush the
//! consumer switches to [`RetryPolicy::for_flush`], which allows a single retry
//! so that the flush stays bounded in time.

use crate::errors::DeliveryError;
use std::time::Duration;

pub const DEFAULT_MAX_RETRY: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retry: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retry: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retry,
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Same backoff, at most one retry.
    #[must_use]
    pub fn for_flush(&self) -> Self {
        Self {
            max_retry: self.max_retry.min(1),
            ..*self
        }
    }

    /// `attempts` is the number of attempts already made, including the one that
    /// just failed with `last_error`.
    #[must_use]
    pub fn should_retry(&self, attempts: u32, last_error: &DeliveryError) -> RetryDecision {
        if !last_error.is_recoverable() || attempts > self.max_retry {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff(attempts))
    }

    /// Delay before the `retry`-th retry (1-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}
