// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use crate::queue::QueueFullPolicy;
use crate::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FAILOVER_DIRECTORY: &str = "/tmp/log-shipper-failover";
const DEFAULT_RECEIVER_PORT: u16 = 4243;

/// Immutable configuration for one process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipperConfig {
    /// Collector URL receiving the batches
    pub collector_endpoint: String,
    /// Maximum number of buffered records
    pub queue_capacity: usize,
    /// Occupancy that triggers a drain before the next tick
    pub high_watermark: usize,
    /// What producers get when the queue is full
    pub queue_full_policy: QueueFullPolicy,
    /// Maximum number of records per delivered batch
    pub max_batch_size: usize,
    /// Retries allowed after the first delivery attempt
    pub max_retry: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// Maximum number of deliveries in flight
    pub max_concurrent_deliveries: usize,
    /// Whether exhausted batches go to the failover store
    pub failover_enabled: bool,
    pub failover_directory: PathBuf,
    pub drain_interval_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    /// Per-request timeout against the collector
    pub flush_timeout: u64,
    pub use_compression: bool,
    pub compression_level: i32,
    pub https_proxy: Option<String>,
    /// Port of the local receiver the runtime pushes logs to
    pub receiver_port: u16,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            collector_endpoint: String::new(),
            queue_capacity: 20,
            high_watermark: 16,
            queue_full_policy: QueueFullPolicy::Block,
            max_batch_size: 10,
            max_retry: 3,
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 2_000,
            max_concurrent_deliveries: 3,
            failover_enabled: false,
            failover_directory: PathBuf::from(DEFAULT_FAILOVER_DIRECTORY),
            drain_interval_seconds: 5,
            shutdown_timeout_seconds: 2,
            flush_timeout: 5,
            use_compression: false,
            compression_level: 3,
            https_proxy: None,
            receiver_port: DEFAULT_RECEIVER_PORT,
            log_level: "info".to_string(),
        }
    }
}

impl ShipperConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let collector_endpoint = get("SUMO_HTTP_ENDPOINT")
            .or_else(|| get("COLLECTOR_HTTP_ENDPOINT"))
            .ok_or(ConfigError::Missing("SUMO_HTTP_ENDPOINT"))?;

        let queue_capacity =
            parse(&get, "MAX_DATAQUEUE_LENGTH")?.unwrap_or(defaults.queue_capacity);
        let high_watermark = parse(&get, "QUEUE_HIGH_WATERMARK")?
            .unwrap_or_else(|| default_watermark(queue_capacity));
        let queue_full_policy = match get("QUEUE_FULL_POLICY") {
            Some(value) => parse_queue_full_policy(&value)?,
            None => defaults.queue_full_policy,
        };
        let log_level = match get("LOG_LEVEL") {
            Some(value) => normalize_log_level(&value)?,
            None => defaults.log_level,
        };

        let config = Self {
            collector_endpoint,
            queue_capacity,
            high_watermark,
            queue_full_policy,
            max_batch_size: parse(&get, "MAX_BATCH_SIZE")?.unwrap_or(defaults.max_batch_size),
            max_retry: parse(&get, "MAX_RETRY")?.unwrap_or(defaults.max_retry),
            retry_initial_backoff_ms: parse(&get, "RETRY_INITIAL_BACKOFF_MS")?
                .unwrap_or(defaults.retry_initial_backoff_ms),
            retry_max_backoff_ms: parse(&get, "RETRY_MAX_BACKOFF_MS")?
                .unwrap_or(defaults.retry_max_backoff_ms),
            max_concurrent_deliveries: parse(&get, "MAX_CONCURRENT_REQUESTS")?
                .unwrap_or(defaults.max_concurrent_deliveries),
            failover_enabled: parse_bool(&get, "ENABLE_FAILOVER")?
                .unwrap_or(defaults.failover_enabled),
            failover_directory: get("FAILOVER_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.failover_directory),
            drain_interval_seconds: parse(&get, "DRAIN_INTERVAL_SECONDS")?
                .unwrap_or(defaults.drain_interval_seconds),
            shutdown_timeout_seconds: parse(&get, "SHUTDOWN_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.shutdown_timeout_seconds),
            flush_timeout: parse(&get, "FLUSH_TIMEOUT_SECONDS")?.unwrap_or(defaults.flush_timeout),
            use_compression: parse_bool(&get, "COLLECTOR_COMPRESSION")?
                .unwrap_or(defaults.use_compression),
            compression_level: parse(&get, "COLLECTOR_COMPRESSION_LEVEL")?
                .unwrap_or(defaults.compression_level),
            https_proxy: get("LOG_SHIPPER_PROXY_HTTPS").or_else(|| get("HTTPS_PROXY")),
            receiver_port: parse(&get, "RECEIVER_PORT")?.unwrap_or(defaults.receiver_port),
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector_endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("SUMO_HTTP_ENDPOINT"));
        }
        if !self.collector_endpoint.starts_with("http://")
            && !self.collector_endpoint.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "collector endpoint '{}' must be an http(s) URL",
                self.collector_endpoint
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "MAX_DATAQUEUE_LENGTH must be greater than 0".to_string(),
            ));
        }
        if self.high_watermark == 0 || self.high_watermark > self.queue_capacity {
            return Err(ConfigError::Invalid(format!(
                "QUEUE_HIGH_WATERMARK must be between 1 and {}",
                self.queue_capacity
            )));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "MAX_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONCURRENT_REQUESTS must be greater than 0".to_string(),
            ));
        }
        if self.drain_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "DRAIN_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.retry_max_backoff_ms < self.retry_initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "RETRY_MAX_BACKOFF_MS must not be lower than RETRY_INITIAL_BACKOFF_MS".to_string(),
            ));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "COLLECTOR_COMPRESSION_LEVEL {} is outside 1..=22",
                self.compression_level
            )));
        }
        if self.failover_enabled && self.failover_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "FAILOVER_DIRECTORY cannot be empty when failover is enabled".to_string(),
            ));
        }
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry,
            Duration::from_millis(self.retry_initial_backoff_ms),
            Duration::from_millis(self.retry_max_backoff_ms),
        )
    }

    #[must_use]
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_seconds)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout)
    }
}

fn default_watermark(capacity: usize) -> usize {
    (capacity * 4 / 5).clamp(1, capacity.max(1))
}

fn parse<T, G>(get: &G, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid(format!("{name} has invalid value '{value}'")))
        })
        .transpose()
}

fn parse_bool<G>(get: &G, name: &'static str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|value| match value.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid(format!(
                "{name} has invalid value '{value}'"
            ))),
        })
        .transpose()
}

fn parse_queue_full_policy(value: &str) -> Result<QueueFullPolicy, ConfigError> {
    match value.to_lowercase().as_str() {
        "block" => Ok(QueueFullPolicy::Block),
        "reject" | "drop" => Ok(QueueFullPolicy::Reject),
        _ => Err(ConfigError::Invalid(format!(
            "QUEUE_FULL_POLICY '{value}' must be 'block' or 'reject'"
        ))),
    }
}

/// Accepts level names as well as the numeric levels (0 = panic … 6 = trace)
/// used by older deployments of the extension.
fn normalize_log_level(value: &str) -> Result<String, ConfigError> {
    let level = match value.to_lowercase().as_str() {
        "0" | "1" | "2" | "panic" | "fatal" | "error" => "error",
        "3" | "warn" | "warning" => "warn",
        "4" | "info" => "info",
        "5" | "debug" => "debug",
        "6" | "trace" => "trace",
        other => {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{other}'. Must be one of: trace, debug, info, warn, error"
            )))
        }
    };
    Ok(level.to_string())
}
