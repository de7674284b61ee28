// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Shipper
//!
//! Buffers opaque log records pushed by a producer and forwards them to a remote
//! collector from inside a short-lived serverless runtime.
//!
//! ```text
//!   producer ──> queue ──> drain consumer ──(limiter)──> delivery tasks ──> collector
//!                                                              │
//!                                                              └─ give up ──> failover
//! ```
//!
//! - [`queue`]: bounded buffer with blocking and rejecting intake
//! - [`consumer`]: drain loop, batching, retries and the final flush
//! - [`shutdown`]: deadline-bounded shutdown with loss accounting
//! - [`shipper`]: the facade tying everything together
//! - [`receiver`]: HTTP intake and stats endpoint

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(missing_copy_implementations)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]

pub mod batch;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod failover;
pub mod http;
pub mod limiter;
pub mod logger;
pub mod queue;
pub mod receiver;
pub mod retry;
pub mod shipper;
pub mod shutdown;
pub mod sink;
pub mod telemetry;

pub use config::ShipperConfig;
pub use errors::{ConfigError, DeliveryError, FailoverError, QueueError, ShipperError};
pub use queue::{EventRecord, QueueFullPolicy};
pub use shipper::LogShipper;
pub use shutdown::ShutdownReport;
