//! Account registry: identity records, permissions, and challenge-word
//! authentication.
//!
//! An in-memory map fronts the store's `accounts` namespace; every
//! mutation hits the store first and the cache second, so a crash can
//! never leave the cache ahead of durable state. Challenge words live in
//! a bounded TTL cache (~30 s) fed both by local issuance and by peer
//! broadcasts, and are strictly single-use.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::crypto::{keccak256, random_challenge_word, verify_signature};
use crate::ledger::{SharedStore, StorageError};
use crate::types::{Account, ROLE_ADMIN, Role};

/// How long an issued challenge word stays usable.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(30);

/// Registry failures, mapped to API errors by the gateway.
#[derive(Debug)]
pub enum RegistryError {
    /// No account under this address.
    NotFound,
    /// An account already exists under this address.
    AlreadyExists,
    /// No outstanding (unexpired) challenge word for this address.
    NoChallengeWord,
    /// The signature over the challenge word did not verify.
    SignatureInvalid,
    /// The stored public key is not usable hex.
    CorruptPublicKey,
    /// Underlying storage failure.
    Storage(StorageError),
}

impl From<StorageError> for RegistryError {
    fn from(e: StorageError) -> Self {
        RegistryError::Storage(e)
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound => write!(f, "account doesn't exist"),
            RegistryError::AlreadyExists => write!(f, "account exists already"),
            RegistryError::NoChallengeWord => write!(f, "no challenge word available"),
            RegistryError::SignatureInvalid => write!(f, "signature invalid"),
            RegistryError::CorruptPublicKey => write!(f, "stored public key is not valid"),
            RegistryError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RegistryError {}

struct ChallengeEntry {
    word: String,
    issued_at: Instant,
}

/// Identity records and challenge-word authentication over one store.
pub struct AccountRegistry {
    store: SharedStore,
    cache: Mutex<HashMap<String, Account>>,
    challenges: Mutex<HashMap<String, ChallengeEntry>>,
}

impl AccountRegistry {
    /// Loads all persisted accounts into the cache.
    pub fn new(store: SharedStore) -> Result<Self, RegistryError> {
        let mut cache = HashMap::new();
        for (address, account) in store.accounts()? {
            cache.insert(address, account);
        }
        Ok(AccountRegistry {
            store,
            cache: Mutex::new(cache),
            challenges: Mutex::new(HashMap::new()),
        })
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn persist(&self, address: &str, account: Account) -> Result<(), RegistryError> {
        self.store.put_account(address, &account)?;
        self.cache
            .lock()
            .expect("account cache lock poisoned")
            .insert(address.to_string(), account);
        Ok(())
    }

    /// Registers a brand new account; refuses to overwrite an existing
    /// one. Bumps `last_modified`.
    pub fn register(&self, address: &str, mut account: Account) -> Result<(), RegistryError> {
        if self.get(address).is_some() {
            return Err(RegistryError::AlreadyExists);
        }
        account.last_modified = Self::now_ms();
        self.persist(address, account)
    }

    /// Overwrites an existing account's record. Bumps `last_modified`.
    pub fn update(&self, address: &str, mut account: Account) -> Result<Account, RegistryError> {
        if self.get(address).is_none() {
            return Err(RegistryError::NotFound);
        }
        account.last_modified = Self::now_ms();
        self.persist(address, account.clone())?;
        Ok(account)
    }

    /// Rewrites the ACL portion of an account, keeping its role name.
    /// Admin-only at the API layer. Bumps `last_modified`.
    pub fn set_permissions(&self, address: &str, role: Role) -> Result<Account, RegistryError> {
        let mut account = self.get(address).ok_or(RegistryError::NotFound)?;
        let name = account.role.name.clone();
        account.role = role;
        account.role.name = name;
        account.last_modified = Self::now_ms();
        self.persist(address, account.clone())?;
        Ok(account)
    }

    /// Cache lookup by address.
    pub fn get(&self, address: &str) -> Option<Account> {
        self.cache
            .lock()
            .expect("account cache lock poisoned")
            .get(address)
            .cloned()
    }

    /// Snapshot of all accounts.
    pub fn all(&self) -> Vec<(String, Account)> {
        self.cache
            .lock()
            .expect("account cache lock poisoned")
            .iter()
            .map(|(address, account)| (address.clone(), account.clone()))
            .collect()
    }

    /// Issues a fresh 64-character challenge word for `address`, stores it
    /// on the account record and in the TTL cache, and returns it.
    pub fn issue_challenge(&self, address: &str) -> Result<String, RegistryError> {
        let mut account = self.get(address).ok_or(RegistryError::NotFound)?;
        let word = random_challenge_word();
        account.challenge_word = word.clone();
        account.last_modified = Self::now_ms();
        self.persist(address, account)?;

        self.challenges
            .lock()
            .expect("challenge cache lock poisoned")
            .insert(
                address.to_string(),
                ChallengeEntry {
                    word: word.clone(),
                    issued_at: Instant::now(),
                },
            );
        Ok(word)
    }

    /// Stores a challenge word learned from a peer broadcast, so a client
    /// holding a word issued elsewhere can authenticate here.
    pub fn accept_remote_challenge(&self, address: &str, word: &str) {
        self.challenges
            .lock()
            .expect("challenge cache lock poisoned")
            .insert(
                address.to_string(),
                ChallengeEntry {
                    word: word.to_string(),
                    issued_at: Instant::now(),
                },
            );
    }

    fn take_challenge(&self, address: &str) -> Option<String> {
        let mut challenges = self
            .challenges
            .lock()
            .expect("challenge cache lock poisoned");
        let entry = challenges.get(address)?;
        if entry.issued_at.elapsed() > CHALLENGE_TTL {
            challenges.remove(address);
            return None;
        }
        Some(entry.word.clone())
    }

    /// Verifies `signature` over the outstanding challenge word of
    /// `address` and clears the word on success. Challenge words are
    /// single-use: a second attempt fails with
    /// [`RegistryError::NoChallengeWord`].
    pub fn authenticate(&self, address: &str, signature: &[u8]) -> Result<Account, RegistryError> {
        let mut account = self.get(address).ok_or(RegistryError::NotFound)?;
        let word = self
            .take_challenge(address)
            .ok_or(RegistryError::NoChallengeWord)?;

        let pub_key =
            hex::decode(&account.public_key).map_err(|_| RegistryError::CorruptPublicKey)?;
        let digest = keccak256(word.as_bytes());
        if !verify_signature(&pub_key, &digest, signature) {
            return Err(RegistryError::SignatureInvalid);
        }

        account.challenge_word = String::new();
        account.last_modified = Self::now_ms();
        self.persist(address, account.clone())?;
        self.challenges
            .lock()
            .expect("challenge cache lock poisoned")
            .remove(address);

        Ok(account)
    }

    /// Drops expired challenge words; run periodically from a background
    /// task.
    pub fn evict_expired_challenges(&self) {
        self.challenges
            .lock()
            .expect("challenge cache lock poisoned")
            .retain(|_, entry| entry.issued_at.elapsed() <= CHALLENGE_TTL);
    }

    /// Applies an account pushed by a peer, last-writer-wins: accepted
    /// only when locally absent or strictly newer by `last_modified`.
    /// Returns whether the local record changed.
    pub fn merge_remote(&self, address: &str, account: Account) -> Result<bool, RegistryError> {
        if let Some(local) = self.get(address) {
            if local.last_modified >= account.last_modified {
                return Ok(false);
            }
        }
        // Keep the incoming stamp: bumping it here would make every merge
        // win future conflicts.
        self.persist(address, account)?;
        Ok(true)
    }

    /// Answers a peer's account-sync request. `known` maps addresses to
    /// the peer's `last_modified` stamps; the response contains every
    /// non-admin account the peer lacks or holds at an older stamp.
    pub fn accounts_for_peer(&self, known: &BTreeMap<String, String>) -> BTreeMap<String, Account> {
        let mut out = BTreeMap::new();
        for (address, account) in self.all() {
            if account.role.name == ROLE_ADMIN {
                continue;
            }
            match known.get(&address).and_then(|s| s.parse::<i64>().ok()) {
                None => {
                    out.insert(address, account);
                }
                Some(peer_stamp) => {
                    if account.last_modified > peer_stamp {
                        out.insert(address, account);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::UserKeypair;
    use crate::storage::MemChainStore;
    use crate::types::ROLE_USER;
    use std::sync::Arc;

    fn registry() -> AccountRegistry {
        AccountRegistry::new(Arc::new(MemChainStore::new())).unwrap()
    }

    fn account_for(keypair: &UserKeypair, role: &str) -> Account {
        Account {
            public_key: hex::encode(keypair.public_key_bytes()),
            role: Role {
                name: role.to_string(),
                ..Role::default()
            },
            ..Account::default()
        }
    }

    #[test]
    fn register_and_duplicate_rejection() {
        let registry = registry();
        let keypair = UserKeypair::generate();
        let address = keypair.address();

        registry
            .register(&address, account_for(&keypair, ROLE_USER))
            .unwrap();
        assert!(registry.get(&address).is_some());
        assert!(registry.get(&address).unwrap().last_modified > 0);

        match registry.register(&address, account_for(&keypair, ROLE_USER)) {
            Err(RegistryError::AlreadyExists) => {}
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[test]
    fn challenge_roundtrip_is_single_use() {
        let registry = registry();
        let keypair = UserKeypair::generate();
        let address = keypair.address();
        registry
            .register(&address, account_for(&keypair, ROLE_USER))
            .unwrap();

        let word = registry.issue_challenge(&address).unwrap();
        assert_eq!(word.len(), 64);
        assert_eq!(registry.get(&address).unwrap().challenge_word, word);

        let signature = keypair.sign_digest(&keccak256(word.as_bytes()));
        let account = registry.authenticate(&address, &signature).unwrap();
        assert_eq!(account.role.name, ROLE_USER);

        // The stored word is cleared and a replay fails.
        assert!(registry.get(&address).unwrap().challenge_word.is_empty());
        match registry.authenticate(&address, &signature) {
            Err(RegistryError::NoChallengeWord) => {}
            other => panic!("expected NoChallengeWord, got {other:?}"),
        }
    }

    #[test]
    fn wrong_signature_keeps_the_challenge() {
        let registry = registry();
        let keypair = UserKeypair::generate();
        let address = keypair.address();
        registry
            .register(&address, account_for(&keypair, ROLE_USER))
            .unwrap();

        let word = registry.issue_challenge(&address).unwrap();
        let impostor = UserKeypair::generate();
        let signature = impostor.sign_digest(&keccak256(word.as_bytes()));

        match registry.authenticate(&address, &signature) {
            Err(RegistryError::SignatureInvalid) => {}
            other => panic!("expected SignatureInvalid, got {other:?}"),
        }

        // The honest client can still use the word.
        let signature = keypair.sign_digest(&keccak256(word.as_bytes()));
        assert!(registry.authenticate(&address, &signature).is_ok());
    }

    #[test]
    fn remote_challenge_words_authenticate_here() {
        let registry = registry();
        let keypair = UserKeypair::generate();
        let address = keypair.address();
        registry
            .register(&address, account_for(&keypair, ROLE_USER))
            .unwrap();

        registry.accept_remote_challenge(&address, "peer-issued-word");
        let signature = keypair.sign_digest(&keccak256(b"peer-issued-word"));
        assert!(registry.authenticate(&address, &signature).is_ok());
    }

    #[test]
    fn merge_remote_is_last_writer_wins() {
        let registry = registry();
        let keypair = UserKeypair::generate();
        let address = keypair.address();

        let mut local = account_for(&keypair, ROLE_USER);
        local.first_name = "Local".to_string();
        registry.register(&address, local).unwrap();
        let local_stamp = registry.get(&address).unwrap().last_modified;

        // Older incoming record is ignored.
        let mut stale = account_for(&keypair, ROLE_USER);
        stale.first_name = "Stale".to_string();
        stale.last_modified = local_stamp - 5;
        assert!(!registry.merge_remote(&address, stale).unwrap());
        assert_eq!(registry.get(&address).unwrap().first_name, "Local");

        // Newer incoming record replaces, keeping its own stamp.
        let mut fresh = account_for(&keypair, ROLE_USER);
        fresh.first_name = "Fresh".to_string();
        fresh.last_modified = local_stamp + 5;
        assert!(registry.merge_remote(&address, fresh).unwrap());
        let merged = registry.get(&address).unwrap();
        assert_eq!(merged.first_name, "Fresh");
        assert_eq!(merged.last_modified, local_stamp + 5);
    }

    #[test]
    fn accounts_for_peer_filters_admins_and_fresh_records() {
        let registry = registry();
        let admin_keypair = UserKeypair::generate();
        let user_keypair = UserKeypair::generate();
        let other_keypair = UserKeypair::generate();

        registry
            .register(&admin_keypair.address(), account_for(&admin_keypair, ROLE_ADMIN))
            .unwrap();
        registry
            .register(&user_keypair.address(), account_for(&user_keypair, ROLE_USER))
            .unwrap();
        registry
            .register(&other_keypair.address(), account_for(&other_keypair, ROLE_USER))
            .unwrap();

        let user_stamp = registry.get(&user_keypair.address()).unwrap().last_modified;

        // The peer already has the user's record at the same stamp, has
        // never seen the other user, and must never receive admins.
        let mut known = BTreeMap::new();
        known.insert(user_keypair.address(), user_stamp.to_string());

        let response = registry.accounts_for_peer(&known);
        assert!(!response.contains_key(&admin_keypair.address()));
        assert!(!response.contains_key(&user_keypair.address()));
        assert!(response.contains_key(&other_keypair.address()));
    }

    #[test]
    fn set_permissions_keeps_the_role_name() {
        let registry = registry();
        let keypair = UserKeypair::generate();
        let address = keypair.address();
        registry
            .register(&address, account_for(&keypair, ROLE_USER))
            .unwrap();

        let updated = registry
            .set_permissions(
                &address,
                Role {
                    name: ROLE_ADMIN.to_string(), // must be ignored
                    collections_write: vec!["notes".to_string()],
                    collections_read_override: vec!["audit".to_string()],
                },
            )
            .unwrap();

        assert_eq!(updated.role.name, ROLE_USER);
        assert!(updated.can_write("notes"));
        assert!(updated.has_read_override("audit"));
    }

    #[test]
    fn cache_is_rebuilt_from_the_store() {
        let store: SharedStore = Arc::new(MemChainStore::new());
        let keypair = UserKeypair::generate();
        let address = keypair.address();

        {
            let registry = AccountRegistry::new(store.clone()).unwrap();
            registry
                .register(&address, account_for(&keypair, ROLE_USER))
                .unwrap();
        }

        let registry = AccountRegistry::new(store).unwrap();
        assert!(registry.get(&address).is_some());
    }
}
