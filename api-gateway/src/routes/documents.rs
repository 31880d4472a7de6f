//! Document submission and search routes.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

use docledger::pool::PutOutcome;
use docledger::search::SearchRequest;
use docledger::types::{BlockHash, TxId};

use crate::auth::authenticate;
use crate::routes::{ApiError, api_error};
use crate::state::SharedState;

/// Request body for `POST /document/{collection}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub raw_document: String,
    pub signature: String,
    #[serde(default)]
    pub permitted_addresses: Vec<String>,
}

/// Validation verdict returned to submitters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCreationResponse {
    pub status: String,
    pub field_errors: Option<BTreeMap<String, String>>,
    pub is_valid_signature: bool,
    #[serde(rename = "transactionID")]
    pub transaction_id: Option<String>,
}

/// Validation and count summary for bulk imports.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBulkCreationResponse {
    pub status: String,
    pub total: usize,
    pub accepted: usize,
    pub dropped: usize,
    pub field_errors: Option<BTreeMap<String, String>>,
}

/// One hydrated search hit.
#[derive(Debug, Serialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_blockId")]
    pub block_id: String,
    #[serde(rename = "_peerId")]
    pub peer_id: String,
    #[serde(rename = "_source")]
    pub source: String,
    #[serde(rename = "_timestamp")]
    pub timestamp: String,
    #[serde(rename = "_signature")]
    pub signature: String,
    #[serde(rename = "_address")]
    pub address: String,
}

/// Response body for `POST /search/{collection}`.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub collection: String,
    pub total_hits: u64,
    pub hits: Vec<Document>,
}

/// `POST /document/{collection}`
///
/// Admits one signed document. The submitter must hold write permission on
/// the collection; the signature is verified against the public key on the
/// caller's account record.
pub async fn submit(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<TransactionCreationResponse>), ApiError> {
    let claims = authenticate(&headers, false, &state.secret)?;

    if !state.search.has_collection(&collection) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no such collection: {collection}"),
        ));
    }

    let account = state
        .registry
        .get(&claims.address)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "account doesn't exist"))?;
    if !account.can_write(&collection) {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            format!("insufficient permission to write to collection: {collection}"),
        ));
    }

    let payload: TransactionPayload = serde_json::from_str(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing the payload: {e}"),
        )
    })?;

    let pub_key = hex::decode(&account.public_key).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("couldn't recognize the publicKey: {e}"),
        )
    })?;
    let signature = hex::decode(&payload.signature).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("couldn't process the signature: {e}"),
        )
    })?;

    let outcome = state
        .receiver
        .put(
            payload.raw_document.as_bytes(),
            &collection,
            &pub_key,
            &signature,
            payload.permitted_addresses,
        )
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let response = match outcome {
        PutOutcome::InvalidSignature => (
            StatusCode::BAD_REQUEST,
            TransactionCreationResponse {
                status: "bad signature".to_string(),
                field_errors: None,
                is_valid_signature: false,
                transaction_id: None,
            },
        ),
        PutOutcome::FieldErrors(errors) => (
            StatusCode::BAD_REQUEST,
            TransactionCreationResponse {
                status: "field validation failed".to_string(),
                field_errors: Some(errors),
                is_valid_signature: true,
                transaction_id: None,
            },
        ),
        PutOutcome::Accepted(tx_id) => {
            state.metrics.node.transactions_admitted.inc();
            (
                StatusCode::OK,
                TransactionCreationResponse {
                    status: "ok".to_string(),
                    field_errors: None,
                    is_valid_signature: true,
                    transaction_id: Some(tx_id.to_hex()),
                },
            )
        }
    };
    Ok((response.0, Json(response.1)))
}

/// `POST /bulk/{collection}`
///
/// Imports an array of documents without signatures, making them
/// unverifiable. Import stops at the first schema violation.
pub async fn bulk(
    State(state): State<SharedState>,
    Path(collection): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<TransactionBulkCreationResponse>), ApiError> {
    if !state.search.has_collection(&collection) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no such collection: {collection}"),
        ));
    }

    let documents: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&body)
        .map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("error parsing the payload: {e}"),
            )
        })?;

    let total = documents.len();
    let mut accepted = 0usize;
    for document in documents {
        let raw = serde_json::to_vec(&document).map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot serialize json document: {e}"),
            )
        })?;

        let outcome = state
            .receiver
            .put_unsigned(&raw, &collection, Vec::new())
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        match outcome {
            PutOutcome::FieldErrors(errors) => {
                return Ok((
                    StatusCode::BAD_REQUEST,
                    Json(TransactionBulkCreationResponse {
                        status: "field validation failed".to_string(),
                        total,
                        accepted,
                        dropped: total - accepted,
                        field_errors: Some(errors),
                    }),
                ));
            }
            PutOutcome::Accepted(_) => {
                state.metrics.node.transactions_admitted.inc();
                accepted += 1;
            }
            PutOutcome::InvalidSignature => unreachable!("unsigned path has no signature gate"),
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(TransactionBulkCreationResponse {
            status: "ok".to_string(),
            total,
            accepted,
            dropped: total - accepted,
            field_errors: None,
        }),
    ))
}

/// `POST /search/{collection}`
///
/// Runs a structured query. Callers without the collection read override
/// only see documents whose `_permittedAddresses` includes them; hits are
/// re-hydrated from the transaction store.
pub async fn search(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    body: String,
) -> Result<Json<SearchResponse>, ApiError> {
    let claims = authenticate(&headers, false, &state.secret)?;

    if !state.search.has_collection(&collection) {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no such collection: {collection}"),
        ));
    }

    let request: SearchRequest = serde_json::from_str(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing the query: {e}"),
        )
    })?;

    let account = state
        .registry
        .get(&claims.address)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "account doesn't exist"))?;
    let has_override = account.has_read_override(&collection);

    let hits = state
        .search
        .query(&collection, request, &claims.address, has_override)
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error executing query: {e}"),
            )
        })?;

    let mut documents = Vec::with_capacity(hits.keys.len());
    for key in &hits.keys {
        match hydrate(&state, key) {
            Ok(Some(document)) => documents.push(document),
            Ok(None) => {
                tracing::warn!(%key, "search hit has no backing transaction");
            }
            Err(message) => {
                tracing::error!(%key, error = %message, "failed to hydrate search hit");
            }
        }
    }

    Ok(Json(SearchResponse {
        collection,
        total_hits: hits.total,
        hits: documents,
    }))
}

/// Loads the transaction behind a `block_hex '_' tx_hex` hit key.
fn hydrate(state: &SharedState, key: &str) -> Result<Option<Document>, String> {
    let (block_part, tx_part) = key
        .split_once('_')
        .ok_or_else(|| "malformed hit key".to_string())?;
    let block_hash = BlockHash::from_hex(block_part).ok_or("bad block hash in hit key")?;
    let tx_id = TxId::from_hex(tx_part).ok_or("bad transaction id in hit key")?;

    let Some(tx) = state
        .chains
        .find_transaction(&block_hash, &tx_id)
        .map_err(|e| e.to_string())?
    else {
        return Ok(None);
    };

    let address = if tx.pub_key.is_empty() {
        String::new()
    } else {
        docledger::crypto::public_key_to_address(&tx.pub_key).unwrap_or_default()
    };

    let timestamp = chrono::DateTime::from_timestamp_millis(tx.accepted_timestamp_ms)
        .unwrap_or(chrono::DateTime::UNIX_EPOCH)
        .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);

    Ok(Some(Document {
        id: tx.id.to_hex(),
        block_id: block_hash.to_hex(),
        peer_id: tx.peer_id.to_hex(),
        source: String::from_utf8_lossy(&tx.raw_data).into_owned(),
        timestamp,
        signature: hex::encode(&tx.signature),
        address,
    }))
}
