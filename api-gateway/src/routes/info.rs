//! Banner and chain status routes.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::json;

use crate::auth::authenticate;
use crate::routes::{ApiError, api_error};
use crate::state::SharedState;

/// Current status information about the whole chain.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainInfo {
    pub newest_block_id: String,
    pub last_height: u64,
    pub total_transactions: u64,
}

/// `GET /`
pub async fn banner(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "docledger, the tamper-evident document datastore",
        "version": state.version,
    }))
}

/// `GET /info`
pub async fn info(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<BlockchainInfo>, ApiError> {
    authenticate(&headers, false, &state.secret)?;

    let local = state.chains.local();
    let tip = local
        .tip()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "chain is not initialized"))?;
    let height = local
        .height()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .unwrap_or(0);
    let total = local
        .total_transactions()
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(BlockchainInfo {
        newest_block_id: tip.to_hex(),
        last_height: height,
        total_transactions: total,
    }))
}
