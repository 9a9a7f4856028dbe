//! The HTTP surface: liveness, status, DevTools discovery,
//! `openAndAttach` over HTTP, and screenshot serving. Served on the
//! same loopback listener that hosts the WebSocket upgrades.

use crate::error::Error;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let targets: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|t| json!({ "sessionId": t.session_id, "targetId": t.target_id, "targetInfo": t.target_info }))
        .collect();
    let active_target_id = state.registry.first().map(|t| t.target_id);

    Json(json!({
        "connected": true,
        "extensionConnected": state.extension_slot.is_connected(),
        "targets": targets,
        "activeTargetId": active_target_id,
    }))
}

pub async fn extension_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "connected": state.extension_slot.is_connected() }))
}

fn cdp_ws_url(config: &crate::config::Config) -> String {
    format!("ws://{}/cdp", config.addr())
}

pub async fn discovery_version(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!({
        "Browser": "CDP-Relay/1.0",
        "Protocol-Version": "1.3",
        "User-Agent": "CDP-Relay/1.0",
        "V8-Version": "0",
        "WebKit-Version": "0",
    });
    if state.extension_slot.is_connected() {
        body["webSocketDebuggerUrl"] = Value::String(cdp_ws_url(&state.config));
    }
    Json(body)
}

pub async fn discovery_list(State(state): State<AppState>) -> Json<Value> {
    let ws_url = cdp_ws_url(&state.config);
    let entries: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|t| {
            let title = t.target_info.get("title").and_then(Value::as_str).unwrap_or_default();
            let url = t.target_info.get("url").and_then(Value::as_str).unwrap_or_default();
            json!({
                "id": t.target_id,
                "type": "page",
                "title": title,
                "url": url,
                "webSocketDebuggerUrl": ws_url,
            })
        })
        .collect();
    Json(Value::Array(entries))
}

#[derive(Debug, Deserialize)]
pub struct OpenUrlRequest {
    url: String,
    #[serde(default)]
    activate: bool,
}

/// Schemes `openAndAttach` will open a tab for; anything else (`file://`,
/// `chrome://`, …) is rejected before the extension is ever consulted.
fn has_allowed_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

pub async fn open_url(State(state): State<AppState>, Json(req): Json<OpenUrlRequest>) -> Response {
    if !has_allowed_scheme(&req.url) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Only http and https URLs are allowed" })),
        )
            .into_response();
    }
    let Some(link) = state.extension_slot.get() else {
        return error_response(&Error::NoExtension);
    };
    let timeout = Duration::from_secs(state.config.open_and_attach_timeout_secs);
    match link.open_and_attach(req.url, req.activate, timeout).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Maps the relay's error taxonomy onto an HTTP status code and an
/// `{error:<message>}` body.
fn error_response(err: &Error) -> Response {
    let status = match err.kind() {
        "invalid-params" => StatusCode::BAD_REQUEST,
        "no-extension" | "link-not-connected" | "extension-disconnected" => StatusCode::SERVICE_UNAVAILABLE,
        "unknown-target" => StatusCode::NOT_FOUND,
        "upstream-timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.client_message() }))).into_response()
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().unwrap_or_default() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

pub async fn screenshot(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    if filename.contains('/') || filename.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let path = std::path::Path::new(&state.config.screenshot_dir).join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_for(&filename))
            .header(header::CACHE_CONTROL, "public, max-age=3600")
            .body(Body::from(bytes))
            .expect("static response always builds"),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
