//! Block inspection and merkle inclusion-proof routes.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::json;

use docledger::merkle::MerkleTree;
use docledger::types::{BlockHash, TxId};

use crate::auth::authenticate;
use crate::routes::{ApiError, api_error};
use crate::state::SharedState;

/// Information about one block.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub block_id: String,
    pub last_block_id: String,
    pub block_height: u64,
    pub total_transactions: u64,
}

/// `GET /block/{blockId}`
pub async fn block_info(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(block_id): Path<String>,
) -> Result<Json<BlockInfo>, ApiError> {
    authenticate(&headers, false, &state.secret)?;

    let hash = BlockHash::from_hex(&block_id)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "invalid block ID"))?;

    let block = state
        .chains
        .find_block(&hash)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "block doesn't exist"))?;

    Ok(Json(BlockInfo {
        block_id: block.hash.to_hex(),
        last_block_id: block
            .prev_block_hash
            .map(|h| h.to_hex())
            .unwrap_or_default(),
        block_height: block.height,
        total_transactions: block.total_transactions,
    }))
}

/// `GET /verification/{blockId}/{txId}`
///
/// Returns the sibling digests a client needs to recompute the merkle
/// root and prove the transaction's inclusion without trusting the store.
pub async fn merkle_path(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((block_id, tx_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    authenticate(&headers, false, &state.secret)?;

    let hash = BlockHash::from_hex(&block_id)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "invalid block transaction ID"))?;
    let tx_id = TxId::from_hex(&tx_id)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "invalid block transaction ID"))?;

    let block = state
        .chains
        .find_block_with_transactions(&hash)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "block doesn't exist"))?;

    let path = block
        .merkle_tree()
        .and_then(|tree: MerkleTree| tree.verification_path(&tx_id.0))
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "couldn't create the merkle tree for this transaction",
            )
        })?;

    let rendered: BTreeMap<usize, String> = path
        .into_iter()
        .map(|(index, digest)| (index, digest.to_hex()))
        .collect();

    Ok(Json(json!({
        "status": "ok",
        "verificationPath": rendered,
    })))
}
