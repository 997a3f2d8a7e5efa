use crate::api::{decode_inject, Gateway, GatewayError};
use crate::model::{is_valid_index, Action, ExchangeKv, InjectResponse};
use crate::store::HistoryEntry;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Clone)]
struct AdminState {
    token: String,
    gateway: Arc<Gateway>,
}

#[derive(Debug, Serialize)]
struct ValueView {
    client: String,
    index: i32,
    value: Option<String>,
    connected: bool,
    last_seen_unix_ms: Option<u64>,
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
struct SnapshotView {
    client: String,
    connected: bool,
    values: Vec<ExchangeKv>,
}

#[derive(Debug, Serialize)]
struct PendingView {
    client: String,
    actions: Vec<Action>,
}

pub async fn start(
    addr: SocketAddr,
    token: String,
    gateway: Arc<Gateway>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "admin listener ready");
    axum::serve(listener, router(token, gateway))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;
    Ok(())
}

fn router(token: String, gateway: Arc<Gateway>) -> Router {
    let state = Arc::new(AdminState { token, gateway });
    Router::new()
        .route("/health", get(health_check))
        .route("/clients/:client/actions", get(list_actions).post(inject_action))
        .route("/clients/:client/values", get(get_snapshot))
        .route("/clients/:client/values/:index", get(get_value))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn list_actions(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(client): Path<String>,
) -> Response {
    if !is_token_valid(&headers, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let actions = state.gateway.store().list_pending_actions(&client);
    Json(PendingView { client, actions }).into_response()
}

async fn inject_action(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(client): Path<String>,
    body: Bytes,
) -> Response {
    if !is_token_valid(&headers, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let result = decode_inject(&body).and_then(|params| state.gateway.inject(&client, params));
    match result {
        Ok(guid) => (
            StatusCode::OK,
            Json(InjectResponse {
                status: "ok",
                guid,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_snapshot(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(client): Path<String>,
) -> Response {
    if !is_token_valid(&headers, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let store = state.gateway.store();
    Json(SnapshotView {
        connected: store.is_connected(&client),
        values: store.get_all(&client, state.gateway.requested_indices()),
        client,
    })
    .into_response()
}

async fn get_value(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path((client, index)): Path<(String, i32)>,
) -> Response {
    if !is_token_valid(&headers, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !is_valid_index(index) {
        return error_response(GatewayError::InvalidIndex(index));
    }
    let store = state.gateway.store();
    Json(ValueView {
        value: store.get_value(&client, index),
        connected: store.is_connected(&client),
        last_seen_unix_ms: store.last_seen_unix_ms(&client),
        history: store.history(&client, index),
        client,
        index,
    })
    .into_response()
}

fn error_response(err: GatewayError) -> Response {
    (
        err.status(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn is_token_valid(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|provided| provided == token)
        .unwrap_or(false)
}
