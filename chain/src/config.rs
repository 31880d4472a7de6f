//! Top-level configuration for a node.
//!
//! This module aggregates configuration for:
//!
//! - data placement (`data_dir`),
//! - the admission pool and block cut (`PoolConfig`),
//! - the peer overlay (`P2pConfig`),
//! - the HTTP surface (`HttpConfig`),
//! - the metrics exporter (`MetricsConfig`).
//!
//! The goal is a single `NodeConfig` struct that the binary constructs
//! from CLI flags and threads through the constructors; nothing reads
//! configuration from globals.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::p2p::P2pConfig;
use crate::pool::PoolConfig;

/// Configuration for the HTTP API server.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Port the HTTP server listens on.
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 6899 }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        // Safe to unwrap: this is a fixed, valid address literal.
        let addr: SocketAddr = "127.0.0.1:9898"
            .parse()
            .expect("hard-coded metrics listen address should parse");
        Self {
            enabled: true,
            listen_addr: addr,
        }
    }
}

/// Top-level configuration for a node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Root of all persistent state: `blockchain.db`, `peers/`,
    /// `collections/`.
    pub data_dir: PathBuf,
    /// Key for JWT signing and verification.
    pub secret: String,
    pub pool: PoolConfig,
    pub p2p: P2pConfig,
    pub http: HttpConfig,
    pub metrics: MetricsConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            secret: "docledger_secret".to_string(),
            pool: PoolConfig::default(),
            p2p: P2pConfig::default(),
            http: HttpConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Path of the local chain database.
    pub fn local_db_path(&self) -> PathBuf {
        self.data_dir.join("blockchain.db")
    }
}
