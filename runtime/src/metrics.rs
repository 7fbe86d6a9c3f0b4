//! Prometheus metrics exposition for the coordinator process.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors standing up the metrics exporter.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The exporter could not be constructed.
    #[error("failed to build metrics exporter: {0}")]
    Build(String),
    /// The exporter could not be installed as the global recorder.
    #[error("failed to install metrics recorder: {0}")]
    Install(String),
    /// The scrape endpoint could not bind its listener.
    #[error("failed to bind metrics endpoint: {0}")]
    Bind(#[from] std::io::Error),
}

/// Owns the Prometheus exporter and exposes a scrape endpoint over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Install the global Prometheus recorder and prepare to serve scrapes
    /// from `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] or [`MetricsError::Install`] if the
    /// exporter cannot be constructed or installed.
    pub fn install(addr: SocketAddr) -> Result<Self, MetricsError> {
        let builder = PrometheusBuilder::new();
        let recorder = builder
            .build_recorder();
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder)
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        Ok(Self {
            addr,
            handle: Some(handle),
        })
    }

    /// Render the current metrics snapshot as Prometheus text exposition
    /// format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }

    /// Serve the scrape endpoint until the process shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Bind`] if the listener cannot bind `addr`.
    pub async fn serve(self) -> Result<(), MetricsError> {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "metrics endpoint listening");
        loop {
            let (mut socket, _) = listener.accept().await?;
            let body = self.render();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain; version=0.0.4\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            if let Err(error) = socket.write_all(response.as_bytes()).await {
                tracing::warn!(%error, "failed writing metrics scrape response");
            }
        }
    }
}
