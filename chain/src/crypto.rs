//! Cryptographic primitives for the ledger.
//!
//! Everything hash- or signature-shaped funnels through this module so the
//! algorithm choices stay in one place:
//!
//! - **SHA-256** for block chaining digests and transaction ids,
//! - **Keccak-256** for document signing digests, merkle internal nodes and
//!   address derivation,
//! - **secp256k1 ECDSA** (via `k256`) for user signatures over prehashed
//!   digests,
//! - **ed25519** for the node's long-lived p2p identity keypair.

use std::fmt;

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::types::{HASH_LEN, Hash256, PeerId};

/// Length of an uncompressed SEC1 secp256k1 public key (`04 || X || Y`).
pub const PUBLIC_KEY_LEN: usize = 65;

/// Number of signature bytes actually used for verification (`r || s`).
///
/// Clients may append a 65th recovery byte; it is ignored.
pub const SIGNATURE_LEN: usize = 64;

/// Number of characters in a challenge word.
pub const CHALLENGE_WORD_LEN: usize = 64;

/// Errors from key handling and signing.
#[derive(Debug)]
pub enum CryptoError {
    /// Public key bytes do not decode to a point on secp256k1.
    InvalidPublicKey,
    /// Secret key bytes do not form a valid scalar.
    InvalidSecretKey,
    /// Signature bytes are malformed beyond repair (wrong length).
    InvalidSignature,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidPublicKey => write!(f, "invalid secp256k1 public key"),
            CryptoError::InvalidSecretKey => write!(f, "invalid secp256k1 secret key"),
            CryptoError::InvalidSignature => write!(f, "invalid signature encoding"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Computes the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    Hash256(digest.into())
}

/// Computes the Keccak-256 digest of `data`.
///
/// This is the legacy Keccak padding (as used by Ethereum), not NIST
/// SHA3-256.
pub fn keccak256(data: &[u8]) -> Hash256 {
    let digest = Keccak256::digest(data);
    Hash256(digest.into())
}

/// Verifies an ECDSA signature over a precomputed 32-byte digest.
///
/// `pub_key` must be the 65-byte uncompressed SEC1 encoding; `signature`
/// must be at least 64 bytes, of which only the first 64 (`r || s`) are
/// used. Any decoding failure counts as an invalid signature.
pub fn verify_signature(pub_key: &[u8], digest: &Hash256, signature: &[u8]) -> bool {
    if signature.len() < SIGNATURE_LEN {
        return false;
    }
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(pub_key) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&signature[..SIGNATURE_LEN]) else {
        return false;
    };
    verifying_key
        .verify_prehash(digest.as_bytes(), &sig)
        .is_ok()
}

/// Derives a user address from an uncompressed secp256k1 public key:
/// `"0x" + hex(Keccak256(X || Y)[12..32])`.
pub fn public_key_to_address(pub_key: &[u8]) -> Result<String, CryptoError> {
    // Reject anything that is not a valid curve point before hashing.
    VerifyingKey::from_sec1_bytes(pub_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    if pub_key.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidPublicKey);
    }
    let digest = keccak256(&pub_key[1..]);
    Ok(format!("0x{}", hex::encode(&digest.as_bytes()[12..HASH_LEN])))
}

/// A user's secp256k1 signing keypair.
///
/// Used by the `keygen` command and by tests; document submitters normally
/// sign client-side and the node only ever sees public keys.
pub struct UserKeypair {
    signing: SigningKey,
}

impl UserKeypair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Restores a keypair from 32 secret bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { signing })
    }

    /// The uncompressed SEC1 public key (`04 || X || Y`, 65 bytes).
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let point = self.signing.verifying_key().to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// The 32 secret scalar bytes.
    pub fn secret_bytes(&self) -> [u8; HASH_LEN] {
        self.signing.to_bytes().into()
    }

    /// The address derived from this keypair's public key.
    pub fn address(&self) -> String {
        // The public key came from a valid signing key, derivation cannot
        // fail.
        public_key_to_address(&self.public_key_bytes())
            .expect("a generated public key always derives an address")
    }

    /// Signs a precomputed 32-byte digest, returning `r || s` (64 bytes).
    pub fn sign_digest(&self, digest: &Hash256) -> [u8; SIGNATURE_LEN] {
        let sig: Signature = self
            .signing
            .sign_prehash(digest.as_bytes())
            .expect("RFC 6979 signing over a 32-byte digest cannot fail");
        sig.to_bytes().into()
    }
}

/// The node's long-lived p2p identity.
///
/// The 32-byte public half is the node's [`PeerId`]; the seed is persisted
/// under the `p2pPrivKey` meta key of the local chain so the identity is
/// stable across restarts.
pub struct NodeIdentity {
    signing: ed25519_dalek::SigningKey,
}

impl NodeIdentity {
    /// Generates a fresh identity keypair.
    pub fn generate() -> Self {
        Self {
            signing: ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Restores an identity from its persisted 32-byte seed.
    pub fn from_seed_bytes(bytes: &[u8]) -> Option<Self> {
        let seed: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Self {
            signing: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    /// The seed to persist.
    pub fn seed_bytes(&self) -> [u8; HASH_LEN] {
        self.signing.to_bytes()
    }

    /// The public identity other peers know this node by.
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.signing.verifying_key().to_bytes())
    }
}

/// Generates a random challenge word from the 62-character alphanumeric
/// alphabet.
pub fn random_challenge_word() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CHALLENGE_WORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak256_known_vector() {
        assert_eq!(
            keccak256(b"hello").to_hex(),
            "1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn address_derivation_known_vector() {
        // The secp256k1 generator point (public key of secret scalar 1).
        let mut pub_key = [0u8; PUBLIC_KEY_LEN];
        pub_key[0] = 0x04;
        pub_key[1..33].copy_from_slice(
            &hex::decode("79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                .unwrap(),
        );
        pub_key[33..].copy_from_slice(
            &hex::decode("483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8")
                .unwrap(),
        );

        let address = public_key_to_address(&pub_key).unwrap();
        assert_eq!(address, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }

    #[test]
    fn sign_verify_roundtrip() {
        let keypair = UserKeypair::generate();
        let digest = keccak256(b"{\"doc\":1}");
        let signature = keypair.sign_digest(&digest);

        assert!(verify_signature(
            &keypair.public_key_bytes(),
            &digest,
            &signature
        ));

        // A 65-byte recoverable signature verifies on its first 64 bytes.
        let mut recoverable = signature.to_vec();
        recoverable.push(1);
        assert!(verify_signature(
            &keypair.public_key_bytes(),
            &digest,
            &recoverable
        ));
    }

    #[test]
    fn tampered_signature_fails() {
        let keypair = UserKeypair::generate();
        let digest = keccak256(b"payload");
        let mut signature = keypair.sign_digest(&digest);
        signature[10] ^= 0xFF;
        assert!(!verify_signature(
            &keypair.public_key_bytes(),
            &digest,
            &signature
        ));
    }

    #[test]
    fn verify_rejects_garbage_inputs() {
        let digest = keccak256(b"x");
        assert!(!verify_signature(&[0u8; 65], &digest, &[0u8; 64]));
        assert!(!verify_signature(&[], &digest, &[]));
    }

    #[test]
    fn keypair_secret_roundtrip() {
        let keypair = UserKeypair::generate();
        let restored = UserKeypair::from_secret_bytes(&keypair.secret_bytes()).unwrap();
        assert_eq!(keypair.public_key_bytes(), restored.public_key_bytes());
        assert_eq!(keypair.address(), restored.address());
    }

    #[test]
    fn node_identity_is_stable_across_restore() {
        let identity = NodeIdentity::generate();
        let restored = NodeIdentity::from_seed_bytes(&identity.seed_bytes()).unwrap();
        assert_eq!(identity.peer_id(), restored.peer_id());
    }

    #[test]
    fn challenge_word_shape() {
        let word = random_challenge_word();
        assert_eq!(word.len(), CHALLENGE_WORD_LEN);
        assert!(word.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(word, random_challenge_word());
    }
}
