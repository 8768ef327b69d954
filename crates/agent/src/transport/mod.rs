// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport assembly: the axum router carrying the WebSocket frame
//! channel, the out-of-band health/info endpoints, and the pairing HTTP
//! surface used before a device has a session.

pub mod auth;
pub mod conn;
pub mod state;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pairing::PairingError;
use state::AgentContext;

/// JSON error body for HTTP endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Build the agent router.
pub fn build_router(ctx: Arc<AgentContext>) -> Router {
    Router::new()
        .route("/ws", get(conn::ws_handler))
        .route("/health", get(health))
        .route("/info", get(info_endpoint))
        .route("/api/v1/pairing/initiate", post(pairing_initiate))
        .route("/api/v1/pairing/key", post(pairing_key))
        .route("/api/v1/pairing/verify", post(pairing_verify))
        .route("/api/v1/pairing/devices", get(pairing_devices))
        .route("/api/v1/pairing/devices/{device_id}", delete(pairing_revoke))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<AgentContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "listening");
    let router = build_router(ctx);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn info_endpoint(State(ctx): State<Arc<AgentContext>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "connections": ctx.connection_count(),
        "sessions": ctx.registry.session_count(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest {
    device_name: String,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    session_id: String,
    agent_fingerprint: String,
    agent_public_key: String,
    expires_at_ms: u64,
}

async fn pairing_initiate(
    State(ctx): State<Arc<AgentContext>>,
    Json(req): Json<InitiateRequest>,
) -> Response {
    match ctx.pairing.initiate_pairing(&req.device_name, req.timeout_ms) {
        Ok(init) => Json(InitiateResponse {
            session_id: init.session_id,
            agent_fingerprint: init.agent_fingerprint,
            agent_public_key: init.agent_public_key,
            expires_at_ms: init.expires_at_ms,
        })
        .into_response(),
        Err(e) => pairing_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRequest {
    session_id: String,
    public_key: String,
    device_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyResponse {
    verification_code: String,
    agent_fingerprint: String,
    mobile_fingerprint: String,
}

async fn pairing_key(
    State(ctx): State<Arc<AgentContext>>,
    Json(req): Json<KeyRequest>,
) -> Response {
    match ctx.pairing.process_mobile_key(&req.session_id, &req.public_key, &req.device_id) {
        Ok(exchange) => Json(KeyResponse {
            verification_code: exchange.verification_code,
            agent_fingerprint: exchange.agent_fingerprint,
            mobile_fingerprint: exchange.mobile_fingerprint,
        })
        .into_response(),
        Err(e) => pairing_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    session_id: String,
    confirmed: bool,
}

async fn pairing_verify(
    State(ctx): State<Arc<AgentContext>>,
    Json(req): Json<VerifyRequest>,
) -> Response {
    match ctx.pairing.confirm_verification(&req.session_id, req.confirmed) {
        Ok(device) => Json(device).into_response(),
        Err(e) => pairing_error_response(&e),
    }
}

async fn pairing_devices(State(ctx): State<Arc<AgentContext>>) -> impl IntoResponse {
    Json(ctx.pairing.store().list())
}

async fn pairing_revoke(
    State(ctx): State<Arc<AgentContext>>,
    Path(device_id): Path<String>,
) -> Response {
    match ctx.pairing.revoke_device(&device_id) {
        Ok(true) => Json(serde_json::json!({ "revoked": true })).into_response(),
        Ok(false) => pairing_error_response(&PairingError::DeviceNotFound),
        Err(e) => pairing_error_response(&e),
    }
}

fn pairing_error_response(e: &PairingError) -> Response {
    let status = match e {
        PairingError::SessionExpired => StatusCode::GONE,
        PairingError::InvalidState | PairingError::AlreadyPaired => StatusCode::CONFLICT,
        PairingError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        PairingError::UserRejected => StatusCode::FORBIDDEN,
        PairingError::VerificationFailed | PairingError::InvalidKey => StatusCode::BAD_REQUEST,
        PairingError::DeviceNotFound => StatusCode::NOT_FOUND,
        PairingError::DeviceRevoked => StatusCode::FORBIDDEN,
        PairingError::CryptoError(_) | PairingError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let retry_after_seconds = match e {
        PairingError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
        _ => None,
    };
    let body = ErrorResponse {
        code: e.as_str().to_owned(),
        message: e.to_string(),
        retry_after_seconds,
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
