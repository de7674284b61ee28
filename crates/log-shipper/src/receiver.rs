// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP intake for records and a stats endpoint.
//!
//! | Route | Response |
//! |---|---|
//! | `POST /` or `POST /{*path}` | body pushed as one record: `200`, `429` when full, `503` when closed |
//! | `GET /stats` | JSON [`MetricsSnapshot`] |
//!
//! Any other method is answered with `404`.

use crate::errors::{QueueError, ShipperError};
use crate::queue::{QueueFullPolicy, QueueProducer};
use crate::telemetry::{MetricsSnapshot, ShipperMetrics};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RECEIVER_HOST: [u8; 4] = [127, 0, 0, 1];
const STATS_ENDPOINT_PATH: &str = "/stats";

#[derive(Clone)]
struct ReceiverState {
    producer: QueueProducer,
    metrics: Arc<ShipperMetrics>,
    policy: QueueFullPolicy,
}

pub struct LogReceiver {
    state: ReceiverState,
    shutdown: CancellationToken,
}

impl LogReceiver {
    #[must_use]
    pub fn new(
        producer: QueueProducer,
        metrics: Arc<ShipperMetrics>,
        policy: QueueFullPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state: ReceiverState {
                producer,
                metrics,
                policy,
            },
            shutdown,
        }
    }

    /// Binds the receiver on the loopback interface. Port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<TcpListener, ShipperError> {
        let addr = SocketAddr::from((RECEIVER_HOST, port));
        Ok(TcpListener::bind(addr).await?)
    }

    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(push_record).fallback(handler_not_found))
            .route("/{*path}", post(push_record).fallback(handler_not_found))
            .route(STATS_ENDPOINT_PATH, get(stats))
            .with_state(self.state.clone())
    }

    /// Serves until the shutdown token is cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ShipperError> {
        if let Ok(addr) = listener.local_addr() {
            debug!("LOGS | Receiver listening on {}", addr);
        }
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(graceful_shutdown(self.shutdown))
            .await?;
        Ok(())
    }
}

async fn graceful_shutdown(shutdown: CancellationToken) {
    shutdown.cancelled().await;
    debug!("LOGS | Shutdown signal received, stopping receiver");
}

async fn push_record(State(state): State<ReceiverState>, body: Bytes) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "Empty record").into_response();
    }
    match state.producer.push(body, state.policy).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            let status = match e {
                QueueError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
                QueueError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, e.to_string()).into_response()
        }
    }
}

async fn stats(State(state): State<ReceiverState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn handler_not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
