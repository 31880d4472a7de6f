//! Shared application state handed to the HTTP handlers.

use std::sync::Arc;

use docledger::accounts::AccountRegistry;
use docledger::metrics::MetricsRegistry;
use docledger::p2p::{ChainSet, P2pNode};
use docledger::pool::Receiver;
use docledger::search::Search;

/// State held by the API and background tasks.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor. All members are already internally synchronized.
pub struct AppState {
    /// The local chain plus peer replica chains.
    pub chains: Arc<ChainSet>,
    /// Admission pipeline feeding the block-cutting scheduler.
    pub receiver: Arc<Receiver>,
    /// Account records and challenge-word auth.
    pub registry: Arc<AccountRegistry>,
    /// Per-collection search indices.
    pub search: Arc<Search>,
    /// Overlay handle for broadcasts.
    pub p2p: Arc<P2pNode>,
    /// Metrics registry shared between the node and the API.
    pub metrics: Arc<MetricsRegistry>,
    /// JWT signing key.
    pub secret: String,
    /// Version string reported on the banner route.
    pub version: &'static str,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
