//! The peer node: overlay membership, inbound message handling and
//! outbound broadcast/request plumbing.
//!
//! Transport is plain TCP with length-prefixed bincode frames. Discovery
//! is iterative: a node pings its configured bootstrap addresses, learns
//! their peers from the pong replies, and pings those in turn. Membership
//! lives in a small routing table ordered by XOR distance between peer
//! ids, Kademlia-style.
//!
//! Broadcasts are sequential fan-out loops with a per-peer timeout;
//! failures are logged and never retried. Requests reuse one connection
//! for exactly one request/response pair.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::accounts::AccountRegistry;
use crate::metrics::MetricsRegistry;
use crate::p2p::forest::ChainSet;
use crate::p2p::message::{
    BlockMessage, Message, PeerInfo, read_message, write_message,
};
use crate::search::Search;
use crate::types::{Account, Block, DocumentMapping, PeerId};
use crate::validation::verify_block;

/// Deadline for account and mapping requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for block transfer requests and broadcast sends.
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Overlay configuration.
#[derive(Clone, Debug)]
pub struct P2pConfig {
    /// Interface the listener binds to.
    pub bind_host: String,
    /// Listener port. Port 0 binds an ephemeral port (tests).
    pub port: u16,
    /// Address other peers can dial this node at.
    pub advertise_address: String,
    /// Initial peers to bootstrap against, `host:port`.
    pub bootstrap_addresses: Vec<String>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 6091,
            advertise_address: "127.0.0.1:6091".to_string(),
            bootstrap_addresses: Vec::new(),
        }
    }
}

/// XOR-distance-bounded membership table.
struct RoutingTable {
    own: PeerId,
    peers: HashMap<PeerId, String>,
    capacity: usize,
}

impl RoutingTable {
    fn new(own: PeerId, capacity: usize) -> Self {
        Self {
            own,
            peers: HashMap::new(),
            capacity,
        }
    }

    /// Admits a peer. At capacity, the farthest known peer is evicted if
    /// the newcomer is closer; otherwise the newcomer is dropped.
    fn insert(&mut self, info: PeerInfo) -> bool {
        if info.peer_id == self.own {
            return false;
        }
        if self.peers.contains_key(&info.peer_id) {
            self.peers.insert(info.peer_id, info.address);
            return false;
        }
        if self.peers.len() >= self.capacity {
            let farthest = self
                .peers
                .keys()
                .max_by_key(|id| self.own.distance(id))
                .copied();
            match farthest {
                Some(far) if self.own.distance(&info.peer_id) < self.own.distance(&far) => {
                    self.peers.remove(&far);
                }
                _ => return false,
            }
        }
        self.peers.insert(info.peer_id, info.address);
        true
    }

    fn infos(&self) -> Vec<PeerInfo> {
        self.peers
            .iter()
            .map(|(peer_id, address)| PeerInfo {
                peer_id: *peer_id,
                address: address.clone(),
            })
            .collect()
    }
}

/// One node's view of the overlay.
pub struct P2pNode {
    config: P2pConfig,
    peer_id: PeerId,
    pub(crate) chains: Arc<ChainSet>,
    pub(crate) search: Arc<Search>,
    pub(crate) registry: Arc<AccountRegistry>,
    metrics: Arc<MetricsRegistry>,
    routing: Mutex<RoutingTable>,
}

impl P2pNode {
    pub fn new(
        config: P2pConfig,
        peer_id: PeerId,
        chains: Arc<ChainSet>,
        search: Arc<Search>,
        registry: Arc<AccountRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let routing = Mutex::new(RoutingTable::new(peer_id, 64));
        P2pNode {
            config,
            peer_id,
            chains,
            search,
            registry,
            metrics,
            routing,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub(crate) fn advertise_address(&self) -> &str {
        &self.config.advertise_address
    }

    fn local_info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id,
            address: self.config.advertise_address.clone(),
        }
    }

    /// Admits a peer into the routing table; returns whether it was new.
    pub fn add_peer(&self, info: PeerInfo) -> bool {
        let new = self
            .routing
            .lock()
            .expect("routing table lock poisoned")
            .insert(info.clone());
        if new {
            tracing::info!(peer = %info.peer_id.to_hex(), addr = %info.address, "learned about a new peer");
        }
        new
    }

    /// Snapshot of the known peers.
    pub fn known_peers(&self) -> Vec<PeerInfo> {
        self.routing
            .lock()
            .expect("routing table lock poisoned")
            .infos()
    }

    /// Binds the listener and spawns the accept, broadcast and bootstrap
    /// tasks. Returns the bound address.
    pub async fn start(
        self: Arc<Self>,
        committed: mpsc::Receiver<Block>,
    ) -> std::io::Result<SocketAddr> {
        let listener =
            TcpListener::bind((self.config.bind_host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "p2p listening");

        let node = self.clone();
        tokio::spawn(async move { node.accept_loop(listener).await });

        let node = self.clone();
        tokio::spawn(async move { node.broadcast_loop(committed).await });

        let node = self.clone();
        tokio::spawn(async move { node.bootstrap_and_sync().await });

        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let node = self.clone();
                    tokio::spawn(async move {
                        node.handle_connection(stream, remote).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "p2p accept error");
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, remote: SocketAddr) {
        loop {
            let message = match read_message(&mut stream).await {
                Ok(message) => message,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    tracing::debug!(remote = %remote, error = %e, "dropping peer connection");
                    break;
                }
            };

            match message {
                Message::Ping { from } => {
                    self.add_peer(from.clone());
                    let pong = Message::Pong {
                        from: self.local_info(),
                        peers: self.known_peers(),
                    };
                    if write_message(&mut stream, &pong).await.is_err() {
                        break;
                    }
                }
                Message::Pong { from, peers } => {
                    self.add_peer(from);
                    for info in peers {
                        self.add_peer(info);
                    }
                }
                Message::Request(request) => {
                    let response = self.response_for(&request);
                    P2pNode::maybe_reverse_sync(&self, &request);
                    if write_message(&mut stream, &response).await.is_err() {
                        break;
                    }
                }
                Message::Block(block_message) => {
                    if let Err(e) = self.handle_block_push(&block_message) {
                        tracing::warn!(
                            peer = %block_message.peer_id.to_hex(),
                            error = %e,
                            "rejected pushed block"
                        );
                    }
                }
                Message::Accounts(accounts) => {
                    self.apply_remote_accounts(accounts);
                }
                Message::Mappings(mappings) => {
                    self.apply_remote_mappings(mappings);
                }
                Message::ChallengeWord { address, word } => {
                    self.registry.accept_remote_challenge(&address, &word);
                }
            }
        }
    }

    /// Verifies and persists a block pushed by a peer. Returns whether the
    /// block changed local state (duplicates short-circuit to `false`).
    pub(crate) fn handle_block_push(&self, message: &BlockMessage) -> Result<bool, String> {
        if message.is_empty() || message.peer_id == self.peer_id {
            return Ok(false);
        }

        let block = message.to_block();
        verify_block(&block).map_err(|e| e.to_string())?;

        if let Some(replica) = self.chains.peer(&message.peer_id) {
            let tip = replica.tip().map_err(|e| e.to_string())?;
            if tip == Some(block.hash) {
                return Ok(false);
            }
            if !message.is_tip
                && replica
                    .get_block(&block.hash)
                    .map_err(|e| e.to_string())?
                    .is_some()
            {
                return Ok(false);
            }
        }

        self.chains
            .persist_peer_block(&message.peer_id, &block, message.is_tip)
            .map_err(|e| e.to_string())?;
        if let Err(e) = self.search.index_block(&block, &message.peer_id) {
            tracing::error!(error = %e, "failed to index peer block");
        }
        self.metrics.node.peer_blocks_received.inc();

        tracing::debug!(
            peer = %message.peer_id.to_hex(),
            height = block.height,
            is_tip = message.is_tip,
            "persisted peer block"
        );
        Ok(true)
    }

    pub(crate) fn apply_remote_accounts(&self, accounts: impl IntoIterator<Item = (String, Account)>) {
        for (address, account) in accounts {
            match self.registry.merge_remote(&address, account) {
                Ok(true) => tracing::debug!(%address, "account updated from peer"),
                Ok(false) => {}
                Err(e) => tracing::error!(%address, error = %e, "failed to merge peer account"),
            }
        }
    }

    pub(crate) fn apply_remote_mappings(
        &self,
        mappings: impl IntoIterator<Item = (String, DocumentMapping)>,
    ) {
        for (name, mapping) in mappings {
            match self.search.register_remote_mapping(mapping) {
                Ok(true) => tracing::info!(collection = %name, "collection learned from peer"),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(collection = %name, error = %e, "failed to register peer collection");
                }
            }
        }
    }

    /// Sends one message to `addr` and closes the connection.
    pub async fn send_to(
        &self,
        addr: &str,
        message: &Message,
        timeout: Duration,
    ) -> std::io::Result<()> {
        tokio::time::timeout(timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            write_message(&mut stream, message).await
        })
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "send timed out"))?
    }

    /// Sends one request to `addr` and awaits exactly one reply.
    pub async fn request(
        &self,
        addr: &str,
        message: &Message,
        timeout: Duration,
    ) -> std::io::Result<Message> {
        tokio::time::timeout(timeout, async {
            let mut stream = TcpStream::connect(addr).await?;
            write_message(&mut stream, message).await?;
            read_message(&mut stream).await
        })
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "request timed out"))?
    }

    /// Sends `message` to every known peer, best-effort with a per-peer
    /// timeout. Failures are logged and counted, never retried.
    pub async fn broadcast(&self, message: &Message, timeout: Duration) {
        for info in self.known_peers() {
            if let Err(e) = self.send_to(&info.address, message, timeout).await {
                self.metrics.node.broadcast_failures.inc();
                tracing::error!(
                    peer = %info.peer_id.to_hex(),
                    addr = %info.address,
                    error = %e,
                    "failed to send object to peer, skipping"
                );
            }
        }
    }

    /// Broadcasts a freshly committed local block to all peers.
    pub async fn broadcast_block(&self, block: &Block) {
        let message = Message::Block(BlockMessage::from_block(block, self.peer_id, true));
        self.broadcast(&message, BLOCK_TIMEOUT).await;
    }

    async fn broadcast_loop(self: Arc<Self>, mut committed: mpsc::Receiver<Block>) {
        while let Some(block) = committed.recv().await {
            self.broadcast_block(&block).await;
        }
    }

    /// Pings the bootstrap addresses, learns their peers, pings those in
    /// turn, then syncs with every discovered peer.
    async fn bootstrap_and_sync(self: Arc<Self>) {
        if self.config.bootstrap_addresses.is_empty() {
            tracing::info!("no peer address(es) provided, starting without trying to discover");
            return;
        }

        let bootstrap = self.config.bootstrap_addresses.clone();
        for addr in &bootstrap {
            self.ping(addr).await;
        }

        // One iterative round over the newly learned peers.
        let learned: Vec<String> = self
            .known_peers()
            .into_iter()
            .map(|info| info.address)
            .filter(|addr| !bootstrap.contains(addr))
            .collect();
        for addr in learned {
            self.ping(&addr).await;
        }

        let peers = self.known_peers();
        if peers.is_empty() {
            tracing::warn!("did not discover any peers");
            return;
        }
        tracing::info!(count = peers.len(), "discovered peers, starting sync");
        for info in peers {
            let node = self.clone();
            tokio::spawn(async move {
                node.sync_with_peer(&info.address, false).await;
            });
        }
    }

    /// Pings one address and folds the reply into the routing table.
    pub async fn ping(&self, addr: &str) {
        let ping = Message::Ping {
            from: self.local_info(),
        };
        match self.request(addr, &ping, REQUEST_TIMEOUT).await {
            Ok(Message::Pong { from, peers }) => {
                self.add_peer(from);
                for info in peers {
                    self.add_peer(info);
                }
            }
            Ok(other) => {
                tracing::warn!(%addr, "unexpected reply to ping: {other:?}");
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "failed to ping bootstrap node");
            }
        }
    }
}
