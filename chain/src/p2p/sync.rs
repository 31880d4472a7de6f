//! Peer synchronization: request handling and the chain walk-back.
//!
//! A sync pass against one peer reconciles accounts (last-writer-wins),
//! schemas (accept-if-absent), then blocks: fetch the peer's tip, persist
//! and index it, and walk `prev_block_hash` links backwards, pulling any
//! unknown ancestor. The walk keeps a visited set bounded by the
//! advertised tip height, so an adversarial peer serving a looped chain
//! cannot stall the node.
//!
//! Serving a tip request also opportunistically starts the reverse walk
//! against the requester, unless the request carries the
//! `reverse=reverse` marker that breaks the mutual recursion.

use std::collections::HashSet;
use std::sync::Arc;

use crate::p2p::message::{
    BlockMessage, Message, PARAM_ADVERTISE, PARAM_LOCAL, PARAM_REVERSE, PARAM_TIP, REQUEST_ACCOUNTS,
    REQUEST_BLOCK, REQUEST_MAPPINGS, Request,
};
use crate::p2p::node::{BLOCK_TIMEOUT, P2pNode, REQUEST_TIMEOUT};
use crate::types::{BlockHash, COLLECTION_DEFAULT, PeerId};
use crate::validation::verify_block;

impl P2pNode {
    /// Builds the reply for an inbound RPC request.
    pub(crate) fn response_for(&self, request: &Request) -> Message {
        match request.request_type.as_str() {
            REQUEST_ACCOUNTS => Message::Accounts(
                self.registry.accounts_for_peer(&request.parameters),
            ),
            REQUEST_MAPPINGS => self.response_for_mappings(request),
            REQUEST_BLOCK => self.response_for_block(request),
            other => {
                tracing::warn!(request_type = %other, "unknown request type");
                Message::Block(BlockMessage::empty(*self.peer_id()))
            }
        }
    }

    /// All local schemas (except `default`) the requester does not already
    /// hold; the request parameters enumerate its collections.
    fn response_for_mappings(&self, request: &Request) -> Message {
        let mut out = std::collections::BTreeMap::new();
        for name in self.search.collections() {
            if name == COLLECTION_DEFAULT || request.parameters.contains_key(&name) {
                continue;
            }
            match self.search.mapping(&name) {
                Ok(Some(mapping)) => {
                    out.insert(name, mapping);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(collection = %name, error = %e, "failed to load mapping")
                }
            }
        }
        Message::Mappings(out)
    }

    /// The matching block, from the local chain (`local` parameter) or a
    /// replica chain (`<peerId hex>` mapped to `<blockHash hex>`), or an
    /// empty block if absent.
    fn response_for_block(&self, request: &Request) -> Message {
        let own = *self.peer_id();
        let empty = || Message::Block(BlockMessage::empty(own));

        if let Some(target) = request.parameters.get(PARAM_LOCAL) {
            let local = self.chains.local();
            if target == PARAM_TIP {
                return match local.tip_block() {
                    Ok(Some(block)) => {
                        Message::Block(BlockMessage::from_block(&block, own, true))
                    }
                    Ok(None) => empty(),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to load tip block");
                        empty()
                    }
                };
            }
            let Some(hash) = BlockHash::from_hex(target) else {
                return empty();
            };
            return match local.get_block_with_transactions(&hash) {
                Ok(Some(block)) => Message::Block(BlockMessage::from_block(&block, own, false)),
                Ok(None) => empty(),
                Err(e) => {
                    tracing::error!(error = %e, "failed to load requested block");
                    empty()
                }
            };
        }

        // Replica lookup: any `<peerId hex> -> <blockHash hex>` pair.
        for (key, value) in &request.parameters {
            if key == PARAM_REVERSE || key == PARAM_ADVERTISE {
                continue;
            }
            let (Some(peer_id), Some(hash)) = (PeerId::from_hex(key), BlockHash::from_hex(value))
            else {
                continue;
            };
            let Some(replica) = self.chains.peer(&peer_id) else {
                continue;
            };
            match replica.get_block_with_transactions(&hash) {
                Ok(Some(block)) => {
                    let is_tip = replica.tip().ok().flatten() == Some(hash);
                    return Message::Block(BlockMessage::from_block(&block, peer_id, is_tip));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to load replica block");
                }
            }
        }
        empty()
    }

    /// On a tip request, starts the reverse walk against the requester,
    /// unless the request carries the recursion guard.
    pub(crate) fn maybe_reverse_sync(node: &Arc<P2pNode>, request: &Request) {
        if request.request_type != REQUEST_BLOCK {
            return;
        }
        if request.parameters.get(PARAM_LOCAL).map(String::as_str) != Some(PARAM_TIP) {
            return;
        }
        if request.parameters.contains_key(PARAM_REVERSE) {
            return;
        }
        let Some(addr) = request.parameters.get(PARAM_ADVERTISE).cloned() else {
            return;
        };
        if addr.is_empty() {
            return;
        }

        let node = node.clone();
        tokio::spawn(async move {
            node.sync_with_peer(&addr, true).await;
        });
    }

    /// One full reconciliation pass against the peer at `addr`.
    pub async fn sync_with_peer(&self, addr: &str, reverse: bool) {
        if let Err(e) = self.sync_accounts(addr).await {
            tracing::warn!(%addr, error = %e, "account sync failed");
        }
        if let Err(e) = self.sync_mappings(addr).await {
            tracing::warn!(%addr, error = %e, "mapping sync failed");
        }
        if let Err(e) = self.sync_blocks(addr, reverse).await {
            tracing::warn!(%addr, error = %e, "block sync failed");
        }
    }

    /// Pulls accounts the peer holds newer (or that we lack entirely).
    pub async fn sync_accounts(&self, addr: &str) -> std::io::Result<usize> {
        let mut request = Request::new(REQUEST_ACCOUNTS);
        for (address, account) in self.registry.all() {
            request
                .parameters
                .insert(address, account.last_modified.to_string());
        }

        match self
            .request(addr, &Message::Request(request), REQUEST_TIMEOUT)
            .await?
        {
            Message::Accounts(accounts) => {
                let count = accounts.len();
                self.apply_remote_accounts(accounts);
                Ok(count)
            }
            other => Err(std::io::Error::other(format!(
                "unexpected reply to accounts request: {other:?}"
            ))),
        }
    }

    /// Pulls schemas we lack.
    pub async fn sync_mappings(&self, addr: &str) -> std::io::Result<usize> {
        let mut request = Request::new(REQUEST_MAPPINGS);
        for name in self.search.collections() {
            request.parameters.insert(name.clone(), name);
        }

        match self
            .request(addr, &Message::Request(request), REQUEST_TIMEOUT)
            .await?
        {
            Message::Mappings(mappings) => {
                let count = mappings.len();
                self.apply_remote_mappings(mappings);
                Ok(count)
            }
            other => Err(std::io::Error::other(format!(
                "unexpected reply to mappings request: {other:?}"
            ))),
        }
    }

    async fn request_block(&self, addr: &str, request: Request) -> std::io::Result<BlockMessage> {
        let message = Message::Request(request);
        let reply = match self.request(addr, &message, BLOCK_TIMEOUT).await {
            Ok(reply) => reply,
            Err(e) => {
                // One retry; peers may be mid-restart during a sync pass.
                tracing::debug!(%addr, error = %e, "block request failed, retrying once");
                self.request(addr, &message, BLOCK_TIMEOUT).await?
            }
        };
        match reply {
            Message::Block(block) => Ok(block),
            other => Err(std::io::Error::other(format!(
                "unexpected reply to block request: {other:?}"
            ))),
        }
    }

    /// Fetches the peer's tip and walks its ancestry, persisting every
    /// block this node does not hold yet.
    pub async fn sync_blocks(&self, addr: &str, reverse: bool) -> std::io::Result<()> {
        let mut tip_request = Request::new(REQUEST_BLOCK)
            .with_param(PARAM_LOCAL, PARAM_TIP)
            .with_param(PARAM_ADVERTISE, self.advertise_address());
        if reverse {
            tip_request = tip_request.with_param(PARAM_REVERSE, PARAM_REVERSE);
        }

        let tip_message = self.request_block(addr, tip_request).await?;
        if tip_message.is_empty() {
            return Ok(());
        }
        let origin = tip_message.peer_id;
        if origin == *self.peer_id() {
            return Ok(());
        }

        let replica = self
            .chains
            .peer_or_create(&origin)
            .map_err(std::io::Error::other)?;
        if replica.tip().map_err(std::io::Error::other)? == Some(tip_message.hash) {
            tracing::debug!(peer = %origin.to_hex(), "replica already at the peer's tip");
            return Ok(());
        }

        let tip_block = tip_message.to_block();
        verify_block(&tip_block).map_err(std::io::Error::other)?;
        self.chains
            .persist_peer_block(&origin, &tip_block, true)
            .map_err(std::io::Error::other)?;
        if let Err(e) = self.search.index_block(&tip_block, &origin) {
            tracing::error!(error = %e, "failed to index synced tip block");
        }

        // Walk back through unknown ancestors. The visited set and height
        // budget bound the walk against looped or unbounded chains.
        let mut visited: HashSet<BlockHash> = HashSet::new();
        visited.insert(tip_message.hash);
        let mut budget = tip_message.height;
        let mut cursor = tip_message.prev_block_hash;

        while let Some(hash) = cursor {
            if !visited.insert(hash) {
                tracing::warn!(peer = %origin.to_hex(), "cycle detected during sync, aborting walk");
                break;
            }
            if budget == 0 {
                tracing::warn!(peer = %origin.to_hex(), "chain deeper than advertised, aborting walk");
                break;
            }
            budget -= 1;

            if let Some(known) = replica.get_block(&hash).map_err(std::io::Error::other)? {
                cursor = known.prev_block_hash;
                continue;
            }

            let request = Request::new(REQUEST_BLOCK)
                .with_param(PARAM_LOCAL, hash.to_hex())
                .with_param(PARAM_ADVERTISE, self.advertise_address());
            let message = self.request_block(addr, request).await?;
            if message.is_empty() {
                tracing::warn!(
                    peer = %origin.to_hex(),
                    hash = %hash.to_hex(),
                    "peer no longer has a requested ancestor"
                );
                break;
            }
            if message.hash != hash {
                return Err(std::io::Error::other("peer answered with the wrong block"));
            }

            let block = message.to_block();
            verify_block(&block).map_err(std::io::Error::other)?;
            self.chains
                .persist_peer_block(&origin, &block, false)
                .map_err(std::io::Error::other)?;
            if let Err(e) = self.search.index_block(&block, &origin) {
                tracing::error!(error = %e, "failed to index synced block");
            }

            cursor = message.prev_block_hash;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountRegistry;
    use crate::ledger::{Blockchain, SharedStore};
    use crate::metrics::MetricsRegistry;
    use crate::p2p::forest::{ChainSet, MemPeerOpener};
    use crate::p2p::message::PeerInfo;
    use crate::p2p::node::P2pConfig;
    use crate::search::Search;
    use crate::storage::MemChainStore;
    use crate::types::{Account, DocumentMapping, HASH_LEN, Role, Transaction};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct TestNode {
        node: Arc<P2pNode>,
        addr: SocketAddr,
        chain: Arc<Blockchain>,
        _tmp: tempfile::TempDir,
    }

    async fn spawn_node(peer_byte: u8) -> TestNode {
        let peer_id = PeerId([peer_byte; HASH_LEN]);
        let store: SharedStore = Arc::new(MemChainStore::new());
        let chain = Arc::new(Blockchain::create(store.clone(), peer_id).unwrap());
        let chains = Arc::new(
            ChainSet::open(chain.clone(), Box::new(MemPeerOpener::new())).unwrap(),
        );

        let tmp = tempfile::TempDir::new().unwrap();
        let search = Arc::new(Search::new(store.clone(), tmp.path()).unwrap());
        let registry = Arc::new(AccountRegistry::new(store).unwrap());
        let metrics = Arc::new(MetricsRegistry::new().unwrap());

        let config = P2pConfig {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            advertise_address: String::new(), // filled after bind
            bootstrap_addresses: Vec::new(),
        };
        let node = Arc::new(P2pNode::new(
            config, peer_id, chains, search, registry, metrics,
        ));

        let (_committed_tx, committed_rx) = mpsc::channel(4);
        let addr = node.clone().start(committed_rx).await.unwrap();

        TestNode {
            node,
            addr,
            chain,
            _tmp: tmp,
        }
    }

    fn tx(peer: PeerId, body: &str) -> Transaction {
        Transaction::new(
            peer,
            body.as_bytes().to_vec(),
            "default",
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn sync_pulls_the_whole_chain_and_is_idempotent() {
        let server = spawn_node(1).await;
        let client = spawn_node(2).await;

        // Server chain: genesis ← b1 ← b2 ← tip.
        let server_peer = *server.node.peer_id();
        for i in 0..3 {
            server
                .chain
                .add_block(vec![tx(server_peer, &format!(r#"{{"id":{i},"message":"m"}}"#))])
                .unwrap();
        }
        let server_tip = server.chain.tip().unwrap().unwrap();

        client
            .node
            .sync_blocks(&server.addr.to_string(), true)
            .await
            .unwrap();

        let replica = client.node.chains.peer(&server_peer).expect("replica chain");
        assert_eq!(replica.tip().unwrap(), Some(server_tip));
        assert_eq!(replica.height().unwrap(), Some(3));
        // Genesis + three blocks, one transaction each.
        assert_eq!(replica.total_transactions().unwrap(), 4);

        // Every block of the server chain is present in the replica.
        let mut cursor = Some(server_tip);
        let mut count = 0;
        while let Some(hash) = cursor {
            let block = replica.get_block(&hash).unwrap().expect("synced block");
            cursor = block.prev_block_hash;
            count += 1;
        }
        assert_eq!(count, 4);

        // A second pass short-circuits on the tip equality and adds
        // nothing.
        client
            .node
            .sync_blocks(&server.addr.to_string(), true)
            .await
            .unwrap();
        assert_eq!(replica.total_transactions().unwrap(), 4);
    }

    #[tokio::test]
    async fn accounts_and_mappings_sync() {
        let server = spawn_node(3).await;
        let client = spawn_node(4).await;

        server
            .node
            .registry
            .register(
                "0x1111111111111111111111111111111111111111",
                Account {
                    first_name: "Remote".to_string(),
                    role: Role {
                        name: "user".to_string(),
                        ..Role::default()
                    },
                    ..Account::default()
                },
            )
            .unwrap();
        server
            .node
            .registry
            .register(
                "0x2222222222222222222222222222222222222222",
                Account {
                    role: Role {
                        name: "admin".to_string(),
                        ..Role::default()
                    },
                    ..Account::default()
                },
            )
            .unwrap();

        let mut mapping = DocumentMapping::default_collection();
        mapping.collection = "articles".to_string();
        server.node.search.create_mapping(mapping).unwrap();

        let pulled = client
            .node
            .sync_accounts(&server.addr.to_string())
            .await
            .unwrap();
        assert_eq!(pulled, 1); // the admin is never served
        assert!(
            client
                .node
                .registry
                .get("0x1111111111111111111111111111111111111111")
                .is_some()
        );
        assert!(
            client
                .node
                .registry
                .get("0x2222222222222222222222222222222222222222")
                .is_none()
        );

        let pulled = client
            .node
            .sync_mappings(&server.addr.to_string())
            .await
            .unwrap();
        assert_eq!(pulled, 1); // "default" is filtered out
        assert!(client.node.search.has_collection("articles"));

        // Re-sync finds nothing new.
        assert_eq!(
            client
                .node
                .sync_accounts(&server.addr.to_string())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            client
                .node
                .sync_mappings(&server.addr.to_string())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn block_push_is_verified_and_deduplicated() {
        let receiver_node = spawn_node(5).await;
        let origin = PeerId([6u8; HASH_LEN]);

        let block = crate::types::Block::new(vec![tx(origin, r#"{"id":1}"#)], None, 0).unwrap();
        let message = BlockMessage::from_block(&block, origin, true);

        assert!(receiver_node.node.handle_block_push(&message).unwrap());
        // The duplicate is dropped: the replica tip already matches.
        assert!(!receiver_node.node.handle_block_push(&message).unwrap());

        // A tampered copy is rejected outright.
        let mut forged = message.clone();
        forged.transactions[0].raw_data = br#"{"id":2}"#.to_vec();
        forged.hash = crate::types::BlockHash(crate::types::Hash256([9u8; HASH_LEN]));
        assert!(receiver_node.node.handle_block_push(&forged).is_err());
    }

    #[tokio::test]
    async fn ping_pong_exchanges_peer_tables() {
        let a = spawn_node(7).await;
        let b = spawn_node(8).await;

        // Seed node A with a third-party peer so the pong carries it.
        a.node.add_peer(PeerInfo {
            peer_id: PeerId([9u8; HASH_LEN]),
            address: "127.0.0.1:1".to_string(),
        });

        b.node.ping(&a.addr.to_string()).await;

        let known: Vec<PeerId> = b
            .node
            .known_peers()
            .into_iter()
            .map(|info| info.peer_id)
            .collect();
        assert!(known.contains(a.node.peer_id()));
        assert!(known.contains(&PeerId([9u8; HASH_LEN])));
    }
}
