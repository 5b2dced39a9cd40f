//! Status server setup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

use super::routes;
use crate::metrics::MetricsCollector;
use crate::{Error, Result};

/// Status server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusServerConfig {
    /// Host name or IP to bind.
    pub bind_address: String,
    pub port: u16,
}

impl Default for StatusServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8520,
        }
    }
}

/// Read-only HTTP endpoint over the metrics aggregator.
pub struct StatusServer {
    config: StatusServerConfig,
    metrics: Arc<MetricsCollector>,
    cancel_token: CancellationToken,
}

impl StatusServer {
    pub fn new(
        config: StatusServerConfig,
        metrics: Arc<MetricsCollector>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            metrics,
            cancel_token,
        }
    }

    pub fn build_router(&self) -> Router {
        routes::router(self.metrics.clone()).layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
    }

    /// Bind the listening socket.
    pub async fn bind(&self) -> Result<TcpListener> {
        let host = self.config.bind_address.as_str();
        TcpListener::bind((host, self.config.port))
            .await
            .map_err(|e| {
                Error::Server(format!(
                    "failed to bind {}:{}: {}",
                    host, self.config.port, e
                ))
            })
    }

    /// Serve on `listener` until the cancellation token fires.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        let router = self.build_router();
        if let Some(addr) = addr {
            info!("Status server listening on http://{}", addr);
        }

        let cancel_token = self.cancel_token.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("Status server shutting down");
            })
            .await
            .map_err(|e| Error::Server(e.to_string()))
    }
}
