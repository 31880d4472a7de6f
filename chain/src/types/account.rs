//! Account record: an end user's identity and access rights.
//!
//! The profile fields are a convenience for tracking identity and do not
//! affect ledger semantics; the load-bearing parts are the public key, the
//! role with its per-collection permissions, the ephemeral challenge word
//! and the `last_modified` stamp that drives last-writer-wins replication.

use serde::{Deserialize, Serialize};

/// Role name granted full administrative rights.
pub const ROLE_ADMIN: &str = "admin";

/// Role name for ordinary registered users.
pub const ROLE_USER: &str = "user";

/// Access rights to collections and API endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub name: String,

    /// Collections this account may submit documents to.
    #[serde(default)]
    pub collections_write: Vec<String>,

    /// Collections readable without the per-document ACL check.
    #[serde(default)]
    pub collections_read_override: Vec<String>,
}

/// An end user's information including the public key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    /// Postal address of the user (not the on-chain address).
    #[serde(default)]
    pub address: String,

    /// Hex-encoded uncompressed secp256k1 public key, 130 characters
    /// including the leading `04`.
    #[serde(default)]
    pub public_key: String,

    /// Ephemeral authentication nonce; empty when none is outstanding.
    #[serde(default)]
    pub challenge_word: String,

    #[serde(default)]
    pub role: Role,

    /// Milliseconds since Unix epoch of the last write; strictly increases
    /// on update and decides conflicts during replication.
    #[serde(default)]
    pub last_modified: i64,
}

impl Account {
    /// Whether this account may write to `collection`.
    pub fn can_write(&self, collection: &str) -> bool {
        self.role.collections_write.iter().any(|c| c == collection)
    }

    /// Whether this account may read `collection` bypassing per-document
    /// ACLs.
    pub fn has_read_override(&self, collection: &str) -> bool {
        self.role
            .collections_read_override
            .iter()
            .any(|c| c == collection)
    }

    pub fn is_admin(&self) -> bool {
        self.role.name == ROLE_ADMIN
    }

    /// Validates the profile fields of a registration or update payload.
    ///
    /// Mirrors the length constraints enforced at registration time; the
    /// public key is checked separately because updates never carry one.
    pub fn validate_profile(&self) -> Result<(), String> {
        if self.date_of_birth.len() != 10 {
            return Err("dateOfBirth must be 10 characters".to_string());
        }
        for (field, value) in [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("organization", &self.organization),
            ("position", &self.position),
        ] {
            if value.is_empty() {
                return Err(format!("{field} must not be empty"));
            }
        }
        if self.email.len() < 6 || self.email.len() > 80 {
            return Err("email must be between 6 and 80 characters".to_string());
        }
        if self.phone.len() < 6 || self.phone.len() > 40 {
            return Err("phone must be between 6 and 40 characters".to_string());
        }
        if self.address.len() < 10 || self.address.len() > 140 {
            return Err("address must be between 10 and 140 characters".to_string());
        }
        Ok(())
    }

    /// Projects the account into the externally visible map. Role and
    /// permission fields are only included for admin callers.
    pub fn to_public_map(&self, include_role: bool) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("dateOfBirth".into(), self.date_of_birth.clone().into());
        map.insert("firstName".into(), self.first_name.clone().into());
        map.insert("lastName".into(), self.last_name.clone().into());
        map.insert("organization".into(), self.organization.clone().into());
        map.insert("position".into(), self.position.clone().into());
        map.insert("email".into(), self.email.clone().into());
        map.insert("phone".into(), self.phone.clone().into());
        map.insert("address".into(), self.address.clone().into());
        map.insert("publicKey".into(), self.public_key.clone().into());

        if include_role {
            map.insert("roleName".into(), self.role.name.clone().into());
            map.insert(
                "collectionsWrite".into(),
                self.role.collections_write.clone().into(),
            );
            map.insert(
                "collectionsReadOverride".into(),
                self.role.collections_read_override.clone().into(),
            );
        }

        map
    }

    /// Canonical bincode-2 encoding for storage and the wire.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which would be a programming error: all
    /// fields are plain data.
    pub fn encode(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("Account should always be serializable with bincode 2 + serde")
    }

    /// Decodes an account from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let cfg = bincode::config::standard();
        let (account, _): (Account, usize) = bincode::serde::decode_from_slice(bytes, cfg).ok()?;
        Some(account)
    }
}
