use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use std::collections::BTreeMap;

use crate::error::GatewayError;
use crate::events::EventResponse;
use crate::gateway::GatewayState;
use crate::payload::FetchResponse;
use crate::signature::SignedRequest;

/// Create webhook routes mounted at the configured route prefix
pub fn webhook_routes(state: GatewayState) -> Router {
    let route = state.config.route.clone();
    Router::new()
        .route(&route, post(handle_webhook))
        .route(&format!("{}/store", route), post(store_data))
        .route(&format!("{}/get/{{document_name}}", route), get(get_data))
        .with_state(state)
}

/// POST {route} - Lifecycle event from the collaboration server
async fn handle_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<EventResponse, GatewayError> {
    state
        .ingest_webhook(&body, SignedRequest::signature_from(&headers))
        .await
}

/// POST {route}/store - Persist the encoded document state
async fn store_data(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    state
        .ingest_store(&body, SignedRequest::signature_from(&headers))
        .await?;
    Ok(EventResponse::Empty)
}

/// GET {route}/get/{document_name} - Stored state for the requesting collaborator
async fn get_data(
    State(state): State<GatewayState>,
    Path(document_name): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<FetchResponse>, GatewayError> {
    let response = state.fetch(
        &document_name,
        &query,
        SignedRequest::signature_from(&headers),
    )?;
    Ok(Json(response))
}
