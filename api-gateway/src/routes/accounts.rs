//! Account registration, authentication and permission routes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::json;

use docledger::accounts::RegistryError;
use docledger::crypto::public_key_to_address;
use docledger::p2p::{Message, REQUEST_TIMEOUT};
use docledger::types::{Account, ROLE_USER, Role, is_valid_address};

use crate::auth::{authenticate, issue_token};
use crate::routes::{ApiError, api_error};
use crate::state::SharedState;

/// Credentials for `POST /jwt`: the address plus a signature over its
/// outstanding challenge word.
#[derive(Debug, Deserialize)]
pub struct AuthPayload {
    pub address: String,
    pub signature: String,
}

/// ACL payload for `POST /setaccountpermission/{address}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPayload {
    #[serde(default)]
    pub collections_write: Vec<String>,
    #[serde(default)]
    pub collections_read_override: Vec<String>,
}

fn registry_error(e: RegistryError) -> ApiError {
    match e {
        RegistryError::NotFound => api_error(StatusCode::NOT_FOUND, e.to_string()),
        RegistryError::AlreadyExists => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        RegistryError::NoChallengeWord => api_error(StatusCode::NOT_FOUND, e.to_string()),
        RegistryError::SignatureInvalid => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        RegistryError::CorruptPublicKey => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        RegistryError::Storage(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn broadcast_account(state: &SharedState, address: String, account: Account) {
    let p2p = state.p2p.clone();
    tokio::spawn(async move {
        let mut accounts = std::collections::BTreeMap::new();
        accounts.insert(address, account);
        p2p.broadcast(&Message::Accounts(accounts), REQUEST_TIMEOUT)
            .await;
    });
}

/// `POST /account`
///
/// Open registration. The payload's `publicKey` carries the 128 hex chars
/// of the uncompressed point body; the role is forced to `user` and no
/// permissions can be smuggled in.
pub async fn register(
    State(state): State<SharedState>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut account: Account = serde_json::from_str(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing the json payload: {e}"),
        )
    })?;

    account
        .validate_profile()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("error validating the field: {e}")))?;
    if account.public_key.len() != 128 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "error validating the field: publicKey must be 128 hex characters",
        ));
    }

    // Prepend the uncompressed-point tag to match ecdsa.PublicKey form.
    account.public_key = format!("04{}", account.public_key);
    account.role = Role {
        name: ROLE_USER.to_string(),
        collections_write: Vec::new(),
        collections_read_override: Vec::new(),
    };
    account.challenge_word = String::new();

    let pub_key_bytes = hex::decode(&account.public_key).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing public key: {e}"),
        )
    })?;
    let address = public_key_to_address(&pub_key_bytes).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing public key: {e}"),
        )
    })?;

    state
        .registry
        .register(&address, account.clone())
        .map_err(registry_error)?;

    // The registry stamped last_modified; rebroadcast the stored record.
    if let Some(stored) = state.registry.get(&address) {
        broadcast_account(&state, address.clone(), stored);
    }

    Ok(Json(
        json!({ "message": "account created", "address": address }),
    ))
}

/// `POST /account/{address}`
///
/// Self-service profile update: only the token owner may update their own
/// record, and neither key nor role can change here.
pub async fn update(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(address): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&headers, false, &state.secret)?;
    if claims.address != address {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "you can only update your own account",
        ));
    }

    let mut account: Account = serde_json::from_str(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing the json payload: {e}"),
        )
    })?;
    account
        .validate_profile()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("error validating the field: {e}")))?;

    let old = state
        .registry
        .get(&address)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "account doesn't exist"))?;
    account.public_key = old.public_key;
    account.role = old.role;
    account.challenge_word = old.challenge_word;

    let updated = state
        .registry
        .update(&address, account)
        .map_err(registry_error)?;
    broadcast_account(&state, address.clone(), updated);

    Ok(Json(
        json!({ "message": "account updated", "address": address }),
    ))
}

/// `GET /account/{address}`
pub async fn get(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = authenticate(&headers, false, &state.secret)?;

    if !is_valid_address(&address) {
        return Err(api_error(StatusCode::BAD_REQUEST, "not a valid address"));
    }

    let account = state
        .registry
        .get(&address)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "account doesn't exist"))?;

    Ok(Json(serde_json::Value::Object(
        account.to_public_map(claims.is_admin()),
    )))
}

/// `POST /setaccountpermission/{address}` (admin)
pub async fn set_permissions(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(address): Path<String>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    authenticate(&headers, true, &state.secret)?;

    if !is_valid_address(&address) {
        return Err(api_error(StatusCode::BAD_REQUEST, "not a valid address"));
    }

    let payload: PermissionPayload = serde_json::from_str(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing the json payload: {e}"),
        )
    })?;

    let updated = state
        .registry
        .set_permissions(
            &address,
            Role {
                name: String::new(), // the registry keeps the stored name
                collections_write: payload.collections_write,
                collections_read_override: payload.collections_read_override,
            },
        )
        .map_err(registry_error)?;
    broadcast_account(&state, address.clone(), updated);

    Ok(Json(
        json!({ "message": "account permission updated", "address": address }),
    ))
}

/// `POST /jwt`
///
/// Verifies the signature over the outstanding challenge word and issues
/// a bearer token. The challenge word is cleared on success.
pub async fn jwt(
    State(state): State<SharedState>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload: AuthPayload = serde_json::from_str(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing the payload: {e}"),
        )
    })?;

    let signature = hex::decode(&payload.signature).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("couldn't process the signature: {e}"),
        )
    })?;

    let account = state
        .registry
        .authenticate(&payload.address, &signature)
        .map_err(registry_error)?;

    let token = issue_token(&payload.address, &account.role.name, &state.secret).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("couldn't issue jwt: {e}"),
        )
    })?;

    Ok(Json(json!({ "message": "JWT issued", "token": token })))
}

/// `GET /jwt/challenge/{address}`
///
/// Creates a random challenge word for the client to sign, and shares it
/// with peers so the signature can be redeemed anywhere.
pub async fn jwt_challenge(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !is_valid_address(&address) {
        return Err(api_error(StatusCode::BAD_REQUEST, "not a valid address"));
    }

    let word = state
        .registry
        .issue_challenge(&address)
        .map_err(registry_error)?;

    let p2p = state.p2p.clone();
    let broadcast_address = address.clone();
    let broadcast_word = word.clone();
    tokio::spawn(async move {
        p2p.broadcast(
            &Message::ChallengeWord {
                address: broadcast_address,
                word: broadcast_word,
            },
            REQUEST_TIMEOUT,
        )
        .await;
    });

    Ok(Json(
        json!({ "message": "challenge word created", "challenge": word }),
    ))
}
