//! # Metrics Server
//!
//! This module defines the `MetricsServer`, which runs an `axum`-based web
//! server exposing the measurement snapshot to a Prometheus scraper.
//!
//! The configured path returns the snapshot families followed by the
//! operational families, in the Prometheus text exposition format. The server
//! stops serving when the shutdown signal fires.

use crate::publisher::SnapshotPublisher;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, trace};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
struct ScrapeState {
    publisher: Arc<SnapshotPublisher>,
    prom_handle: Option<PrometheusHandle>,
}

/// A server that exposes metrics to a Prometheus scraper.
pub struct MetricsServer {
    listener: TcpListener,
    path: String,
    state: ScrapeState,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Creates a new `MetricsServer` but does not spawn it.
    ///
    /// # Arguments
    ///
    /// * `listener` - A `TcpListener` that has already been bound to an address.
    /// * `path` - The HTTP path to serve metrics on.
    /// * `publisher` - The measurement snapshot.
    /// * `prom_handle` - Renders the operational metrics, if installed.
    /// * `shutdown_rx` - A watch channel receiver for graceful shutdown.
    pub fn new(
        listener: TcpListener,
        path: String,
        publisher: Arc<SnapshotPublisher>,
        prom_handle: Option<PrometheusHandle>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            path,
            state: ScrapeState {
                publisher,
                prom_handle,
            },
            shutdown_rx,
        }
    }

    /// Returns a future that runs the server until a shutdown signal is received.
    pub fn run(self) -> impl Future<Output = ()> {
        let app = Router::new()
            .route(&self.path, get(scrape))
            .with_state(self.state);
        let mut shutdown_rx = self.shutdown_rx;
        let listener = self.listener;

        async move {
            let shutdown = async move {
                shutdown_rx.changed().await.ok();
                trace!("Metrics server received shutdown signal.");
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Metrics server error: {}", e);
            }
            trace!("Metrics server task finished.");
        }
    }
}

async fn scrape(State(state): State<ScrapeState>) -> Response {
    let mut body = match state.publisher.render() {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to render measurement snapshot: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };
    if let Some(handle) = &state.prom_handle {
        body.push_str(&handle.render());
    }
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}
