//! Peer overlay and replication.
//!
//! - [`message`]: the wire catalog and length-prefixed framing.
//! - [`node`]: overlay membership, inbound handling, broadcast/request
//!   plumbing.
//! - [`sync`]: the chain walk-back state machine and RPC responses.
//! - [`forest`]: the local chain plus per-peer replica chains.

pub mod forest;
pub mod message;
pub mod node;
pub mod sync;

pub use forest::{ChainSet, MemPeerOpener, PeerStoreOpener, RocksDbPeerOpener};
pub use message::{BlockMessage, Message, PeerInfo, Request};
pub use node::{BLOCK_TIMEOUT, P2pConfig, P2pNode, REQUEST_TIMEOUT};
