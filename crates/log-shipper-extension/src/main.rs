// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use log_shipper::{
    logger::{env_filter, Formatter},
    receiver::LogReceiver,
    LogShipper, ShipperConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "info";

#[tokio::main]
pub async fn main() {
    let config = ShipperConfig::from_env();
    let log_level = config
        .as_ref()
        .map_or(DEFAULT_LOG_LEVEL, |c| c.log_level.as_str());
    init_logging(log_level);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("LOGS | {}. Shutting down log shipper.", e);
            return;
        }
    };
    debug!("LOGS | Configuration loaded: {:?}", config);

    let mut shipper = match LogShipper::from_config(config) {
        Ok(shipper) => shipper,
        Err(e) => {
            error!("LOGS | Unable to create log shipper: {}", e);
            return;
        }
    };
    if let Err(e) = shipper.start() {
        error!("LOGS | Unable to start log shipper: {}", e);
        return;
    }

    let receiver_shutdown = CancellationToken::new();
    let receiver = LogReceiver::new(
        shipper.producer(),
        shipper.metrics(),
        shipper.config().queue_full_policy,
        receiver_shutdown.clone(),
    );
    let receiver_task = match LogReceiver::bind(shipper.config().receiver_port).await {
        Ok(listener) => Some(tokio::spawn(receiver.serve(listener))),
        Err(e) => {
            error!(
                "LOGS | Unable to bind receiver on port {}: {}",
                shipper.config().receiver_port,
                e
            );
            None
        }
    };

    wait_for_termination().await;

    let report = shipper
        .shutdown_and_flush(shipper.config().shutdown_timeout())
        .await;
    if report.records_lost > 0 {
        warn!(
            "LOGS | {} of {} records were lost ({} abandoned at the deadline)",
            report.records_lost, report.records_enqueued, report.records_abandoned
        );
    } else {
        info!(
            "LOGS | All {} records shipped ({} via failover)",
            report.records_enqueued, report.records_failed_over
        );
    }

    receiver_shutdown.cancel();
    if let Some(task) = receiver_task {
        match task.await {
            Ok(Ok(())) => debug!("LOGS | Receiver stopped"),
            Ok(Err(e)) => error!("LOGS | Receiver failed: {}", e),
            Err(e) => error!("LOGS | Receiver task failed: {}", e),
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(env_filter(log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .event_format(Formatter)
        .with_env_filter(filter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("LOG_SHIPPER | ERROR | Failed to install logger: {e}");
        return;
    }
    debug!("Logging subsystem enabled");
}

/// Resolves on SIGTERM (sent by the host runtime before it freezes the
/// sandbox) or Ctrl+C.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("LOGS | Received SIGTERM, flushing"),
                    result = tokio::signal::ctrl_c() => log_ctrl_c(result),
                }
                return;
            }
            Err(e) => error!("LOGS | Failed to listen for SIGTERM: {}", e),
        }
    }
    log_ctrl_c(tokio::signal::ctrl_c().await);
}

fn log_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("LOGS | Received Ctrl+C, flushing"),
        Err(e) => error!("LOGS | Failed to listen for Ctrl+C: {}", e),
    }
}
