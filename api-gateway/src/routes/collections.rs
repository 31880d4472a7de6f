//! Collection (schema) management routes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::json;

use docledger::p2p::Message;
use docledger::types::DocumentMapping;

use crate::auth::authenticate;
use crate::routes::{ApiError, api_error};
use crate::state::SharedState;

/// `POST /collection` (admin)
///
/// Creates a collection from a JSON schema payload and broadcasts the new
/// mapping to all known peers.
pub async fn create(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    authenticate(&headers, true, &state.secret)?;

    let mapping: DocumentMapping = serde_json::from_str(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("error parsing the collection schema: {e}"),
        )
    })?;
    if mapping.collection.is_empty() || mapping.fields.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "not a valid collection schema definition",
        ));
    }

    state.search.create_mapping(mapping.clone()).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("could not create the collection: {e}"),
        )
    })?;

    // Best-effort push to peers; failures are logged by the overlay.
    let p2p = state.p2p.clone();
    let name = mapping.collection.clone();
    tokio::spawn(async move {
        let mut mappings = std::collections::BTreeMap::new();
        mappings.insert(mapping.collection.clone(), mapping);
        p2p.broadcast(&Message::Mappings(mappings), docledger::p2p::REQUEST_TIMEOUT)
            .await;
    });

    Ok((
        StatusCode::OK,
        Json(json!({ "message": format!("collection {name} created") })),
    ))
}

/// `GET /collections`
pub async fn list(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    authenticate(&headers, false, &state.secret)?;
    Ok(Json(json!({
        "message": "ok",
        "collections": state.search.collections(),
    })))
}

/// `GET /collection/{name}`
pub async fn get(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<DocumentMapping>, ApiError> {
    authenticate(&headers, false, &state.secret)?;

    let mapping = state
        .search
        .mapping(&name)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("no such collection: {name}")))?;
    Ok(Json(mapping))
}
