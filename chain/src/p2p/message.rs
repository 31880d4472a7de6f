//! Peer wire protocol: message catalog and framing.
//!
//! Every message is a 4-byte big-endian length prefix followed by the
//! bincode-2 encoding of [`Message`]; the enum tag makes each envelope
//! self-describing. Hex strings are used for keys and ids embedded in
//! request parameter maps; block hashes and transaction ids travel as raw
//! 32-byte values inside the records themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{Account, Block, BlockHash, DocumentMapping, Hash256, PeerId, Transaction};

/// Request type for account reconciliation (`address -> last_modified_ms`).
pub const REQUEST_ACCOUNTS: &str = "accounts";
/// Request type for schema reconciliation (`collection -> collection`).
pub const REQUEST_MAPPINGS: &str = "mappings";
/// Request type for block transfer (`local`/`reverse`/`peerId` params).
pub const REQUEST_BLOCK: &str = "block";

/// Parameter key addressing the responder's local chain.
pub const PARAM_LOCAL: &str = "local";
/// Parameter value asking for the responder's tip block.
pub const PARAM_TIP: &str = "tip";
/// Marker key (and value) suppressing the opportunistic reverse sync.
pub const PARAM_REVERSE: &str = "reverse";
/// Parameter key carrying the requester's advertise address.
pub const PARAM_ADVERTISE: &str = "advertise";

/// Hard cap on one frame; anything larger is treated as a protocol error.
const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

/// A peer's network identity and dialable address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub address: String,
}

/// A block in flight, tagged with its origin chain and tip marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub peer_id: PeerId,
    pub timestamp: i64,
    pub prev_block_hash: Option<BlockHash>,
    pub height: u64,
    pub hash: BlockHash,
    pub is_tip: bool,
    pub total_transactions: u64,
    pub transactions: Vec<Transaction>,
}

impl BlockMessage {
    pub fn from_block(block: &Block, peer_id: PeerId, is_tip: bool) -> Self {
        BlockMessage {
            peer_id,
            timestamp: block.timestamp,
            prev_block_hash: block.prev_block_hash,
            height: block.height,
            hash: block.hash,
            is_tip,
            total_transactions: block.total_transactions,
            transactions: block.transactions.clone(),
        }
    }

    pub fn to_block(&self) -> Block {
        Block {
            timestamp: self.timestamp,
            prev_block_hash: self.prev_block_hash,
            height: self.height,
            hash: self.hash,
            total_transactions: self.total_transactions,
            transactions: self.transactions.clone(),
        }
    }

    /// The "no such block" response: an all-zero hash and no payload.
    pub fn empty(peer_id: PeerId) -> Self {
        BlockMessage {
            peer_id,
            timestamp: 0,
            prev_block_hash: None,
            height: 0,
            hash: BlockHash(Hash256([0u8; 32])),
            is_tip: false,
            total_transactions: 0,
            transactions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hash.as_bytes() == &[0u8; 32] && self.transactions.is_empty()
    }
}

/// Polymorphic RPC request: a type tag plus a string parameter map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub request_type: String,
    pub parameters: BTreeMap<String, String>,
}

impl Request {
    pub fn new(request_type: &str) -> Self {
        Request {
            request_type: request_type.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

/// Every envelope exchanged between peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Discovery probe carrying the sender's identity and dial-back
    /// address.
    Ping { from: PeerInfo },
    /// Discovery reply: the responder's identity plus its known peers.
    Pong { from: PeerInfo, peers: Vec<PeerInfo> },
    /// Push of a newly formed or requested block.
    Block(BlockMessage),
    /// RPC request; the peer answers with exactly one message.
    Request(Request),
    /// Push of account records, keyed by address.
    Accounts(BTreeMap<String, Account>),
    /// Push of collection schemas, keyed by collection name.
    Mappings(BTreeMap<String, DocumentMapping>),
    /// Ephemeral share of a short-lived auth nonce.
    ChallengeWord { address: String, word: String },
}

impl Message {
    fn encode(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("Message should always be serializable with bincode 2 + serde")
    }

    fn decode(bytes: &[u8]) -> std::io::Result<Message> {
        let cfg = bincode::config::standard();
        let (message, _): (Message, usize) = bincode::serde::decode_from_slice(bytes, cfg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(message)
    }
}

/// Writes one length-prefixed message.
pub async fn write_message<W>(stream: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = message.encode();
    let len = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame too large",
        ));
    }
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await
}

/// Reads one length-prefixed message.
pub async fn read_message<R>(stream: &mut R) -> std::io::Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame exceeds maximum length",
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Message::decode(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HASH_LEN;

    fn peer(byte: u8) -> PeerId {
        PeerId([byte; HASH_LEN])
    }

    #[tokio::test]
    async fn framing_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let request = Message::Request(
            Request::new(REQUEST_BLOCK)
                .with_param(PARAM_LOCAL, PARAM_TIP)
                .with_param(PARAM_ADVERTISE, "127.0.0.1:6091"),
        );
        write_message(&mut client, &request).await.unwrap();

        let received = read_message(&mut server).await.unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn several_messages_on_one_stream() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let ping = Message::Ping {
            from: PeerInfo {
                peer_id: peer(1),
                address: "10.0.0.1:6091".to_string(),
            },
        };
        let word = Message::ChallengeWord {
            address: "0xabc".to_string(),
            word: "w".repeat(64),
        };
        write_message(&mut client, &ping).await.unwrap();
        write_message(&mut client, &word).await.unwrap();

        assert_eq!(read_message(&mut server).await.unwrap(), ping);
        assert_eq!(read_message(&mut server).await.unwrap(), word);
    }

    #[tokio::test]
    async fn block_message_roundtrips_through_block() {
        let tx = Transaction::new(
            peer(2),
            b"{\"x\":1}".to_vec(),
            "notes",
            Vec::new(),
            Vec::new(),
            vec!["0xaaa".to_string()],
        );
        let block = Block::new(vec![tx], None, 0).unwrap();

        let message = BlockMessage::from_block(&block, peer(2), true);
        assert!(message.is_tip);
        assert!(!message.is_empty());
        assert_eq!(message.to_block(), block);
    }

    #[test]
    fn empty_block_marker() {
        let empty = BlockMessage::empty(peer(3));
        assert!(empty.is_empty());

        let (mut client, mut server) = tokio::io::duplex(1024);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            write_message(&mut client, &Message::Block(empty.clone()))
                .await
                .unwrap();
            match read_message(&mut server).await.unwrap() {
                Message::Block(received) => assert!(received.is_empty()),
                other => panic!("unexpected message: {other:?}"),
            }
        });
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        // A forged length prefix far beyond the cap.
        tokio::io::AsyncWriteExt::write_all(&mut client, &u32::MAX.to_be_bytes())
            .await
            .unwrap();
        assert!(read_message(&mut server).await.is_err());
    }
}
