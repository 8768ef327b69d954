// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface tests over `axum_test::TestServer`; no real TCP needed.

use axum_test::TestServer;

use super::*;
use crate::pairing::crypto::AgentKeyPair;
use crate::test_support::{ContextBuilder, ContextCtx};

fn server() -> anyhow::Result<(TestServer, ContextCtx)> {
    let handle = ContextBuilder::new().build()?;
    let router = build_router(std::sync::Arc::clone(&handle.ctx));
    Ok((TestServer::new(router)?, handle))
}

#[tokio::test]
async fn health_is_healthy() -> anyhow::Result<()> {
    let (server, _handle) = server()?;
    let resp = server.get("/health").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn info_reports_counts() -> anyhow::Result<()> {
    let (server, _handle) = server()?;
    let resp = server.get("/info").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["connections"], 0);
    assert_eq!(body["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn pairing_flow_over_http() -> anyhow::Result<()> {
    let (server, _handle) = server()?;

    let resp = server
        .post("/api/v1/pairing/initiate")
        .json(&serde_json::json!({ "deviceName": "Pixel 9" }))
        .await;
    resp.assert_status_ok();
    let init: serde_json::Value = resp.json();
    let session_id = init["sessionId"].as_str().unwrap_or_default().to_owned();
    assert!(init["agentFingerprint"].as_str().unwrap_or_default().starts_with("SHA256:"));

    let mobile = AgentKeyPair::generate().map_err(anyhow::Error::from)?;
    let resp = server
        .post("/api/v1/pairing/key")
        .json(&serde_json::json!({
            "sessionId": session_id,
            "publicKey": mobile.public_base64(),
            "deviceId": "m-1",
        }))
        .await;
    resp.assert_status_ok();
    let exchange: serde_json::Value = resp.json();
    assert_eq!(exchange["verificationCode"].as_str().unwrap_or_default().len(), 6);

    let resp = server
        .post("/api/v1/pairing/verify")
        .json(&serde_json::json!({ "sessionId": session_id, "confirmed": true }))
        .await;
    resp.assert_status_ok();
    let device: serde_json::Value = resp.json();
    assert_eq!(device["deviceId"], "m-1");
    assert_eq!(device["status"], "TRUSTED");

    let resp = server.get("/api/v1/pairing/devices").await;
    resp.assert_status_ok();
    let devices: Vec<serde_json::Value> = resp.json();
    assert_eq!(devices.len(), 1);

    let resp = server.delete("/api/v1/pairing/devices/m-1").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["revoked"], true);
    Ok(())
}

#[tokio::test]
async fn pairing_errors_map_to_http_statuses() -> anyhow::Result<()> {
    let (server, _handle) = server()?;

    // Unknown session: gone.
    let resp = server
        .post("/api/v1/pairing/key")
        .json(&serde_json::json!({
            "sessionId": "missing",
            "publicKey": "irrelevant",
            "deviceId": "m-1",
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::GONE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], "SESSION_EXPIRED");

    // Bad key: bad request.
    let resp = server
        .post("/api/v1/pairing/initiate")
        .json(&serde_json::json!({ "deviceName": "Pixel" }))
        .await;
    let init: serde_json::Value = resp.json();
    let session_id = init["sessionId"].as_str().unwrap_or_default().to_owned();
    let resp = server
        .post("/api/v1/pairing/key")
        .json(&serde_json::json!({
            "sessionId": session_id,
            "publicKey": "!!!",
            "deviceId": "m-2",
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], "INVALID_KEY");

    // Unknown device revoke: not found.
    let resp = server.delete("/api/v1/pairing/devices/ghost").await;
    resp.assert_status(axum::http::StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn rate_limited_key_exchange_carries_retry_after() -> anyhow::Result<()> {
    let (server, _handle) = server()?;

    for _ in 0..6 {
        let resp = server
            .post("/api/v1/pairing/initiate")
            .json(&serde_json::json!({ "deviceName": "Pixel" }))
            .await;
        let init: serde_json::Value = resp.json();
        let session_id = init["sessionId"].as_str().unwrap_or_default().to_owned();
        let _ = server
            .post("/api/v1/pairing/key")
            .json(&serde_json::json!({
                "sessionId": session_id,
                "publicKey": "bad",
                "deviceId": "m-flood",
            }))
            .await;
    }

    let resp = server
        .post("/api/v1/pairing/initiate")
        .json(&serde_json::json!({ "deviceName": "Pixel" }))
        .await;
    let init: serde_json::Value = resp.json();
    let session_id = init["sessionId"].as_str().unwrap_or_default().to_owned();
    let mobile = AgentKeyPair::generate().map_err(anyhow::Error::from)?;
    let resp = server
        .post("/api/v1/pairing/key")
        .json(&serde_json::json!({
            "sessionId": session_id,
            "publicKey": mobile.public_base64(),
            "deviceId": "m-flood",
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], "RATE_LIMITED");
    assert!(body["retry_after_seconds"].as_u64().unwrap_or(0) > 0);
    Ok(())
}
