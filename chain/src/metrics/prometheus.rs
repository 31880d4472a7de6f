//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed node metrics, and an async HTTP
//! exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};

/// Node-level Prometheus metrics.
///
/// These are registered into a [`Registry`] and updated from the admission
/// pool, the scheduler and the p2p layer.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Transactions accepted into the pool.
    pub transactions_admitted: IntCounter,
    /// Transactions committed into blocks.
    pub transactions_committed: IntCounter,
    /// Blocks cut and durably appended to the local chain.
    pub blocks_committed: IntCounter,
    /// Blocks received from peers and persisted into replica chains.
    pub peer_blocks_received: IntCounter,
    /// Latency of the atomic block append, in seconds.
    pub block_commit_seconds: Histogram,
    /// Latency of a whole-block index batch, in seconds.
    pub index_batch_seconds: Histogram,
    /// Per-peer broadcast sends that failed (timeouts included).
    pub broadcast_failures: IntCounter,
}

impl NodeMetrics {
    /// Registers node metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let transactions_admitted = IntCounter::with_opts(Opts::new(
            "pool_transactions_admitted",
            "Total number of transactions accepted into the admission pool",
        ))?;
        registry.register(Box::new(transactions_admitted.clone()))?;

        let transactions_committed = IntCounter::with_opts(Opts::new(
            "ledger_transactions_committed",
            "Total number of transactions committed into blocks",
        ))?;
        registry.register(Box::new(transactions_committed.clone()))?;

        let blocks_committed = IntCounter::with_opts(Opts::new(
            "ledger_blocks_committed",
            "Total number of blocks appended to the local chain",
        ))?;
        registry.register(Box::new(blocks_committed.clone()))?;

        let peer_blocks_received = IntCounter::with_opts(Opts::new(
            "p2p_peer_blocks_received",
            "Total number of peer blocks persisted into replica chains",
        ))?;
        registry.register(Box::new(peer_blocks_received.clone()))?;

        let block_commit_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_block_commit_seconds",
                "Time to durably append one block in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;
        registry.register(Box::new(block_commit_seconds.clone()))?;

        let index_batch_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "search_index_batch_seconds",
                "Time to index one block's transactions in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;
        registry.register(Box::new(index_batch_seconds.clone()))?;

        let broadcast_failures = IntCounter::with_opts(Opts::new(
            "p2p_broadcast_failures",
            "Total number of failed per-peer broadcast sends",
        ))?;
        registry.register(Box::new(broadcast_failures.clone()))?;

        Ok(Self {
            transactions_admitted,
            transactions_committed,
            blocks_committed,
            peer_blocks_received,
            block_commit_seconds,
            index_batch_seconds,
            broadcast_failures,
        })
    }
}

/// Wrapper around a Prometheus registry and the node metrics.
///
/// This is the main handle you pass around in the node. It can be wrapped
/// in an [`Arc`] and shared across threads/tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub node: NodeMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying `Registry`
    /// and registers the node metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("docledger".to_string()), None)?;
        let node = NodeMetrics::register(&registry)?;
        Ok(Self { registry, node })
    }

    /// Encodes all metrics in this registry into the Prometheus text
    /// format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404. Intended
/// to be spawned onto a Tokio runtime.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                tracing::error!(error = %err, "prometheus HTTP server error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = metrics.gather_text();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(body)))
                .unwrap())
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("not found")))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn node_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = NodeMetrics::register(&registry).expect("register metrics");

        metrics.transactions_admitted.inc();
        metrics.blocks_committed.inc();
        metrics.block_commit_seconds.observe(0.012);
        metrics.index_batch_seconds.observe(0.003);
        metrics.broadcast_failures.inc();

        let metric_families = registry.gather();
        assert!(!metric_families.is_empty());
    }

    #[test]
    fn metrics_registry_gather_text_works() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.node.block_commit_seconds.observe(0.01);
        let text = registry.gather_text();
        assert!(text.contains("ledger_block_commit_seconds"));
        assert!(text.contains("docledger_"));
    }
}
