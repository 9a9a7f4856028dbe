//! End-to-end tests driving the relay over real HTTP and WebSocket
//! connections, covering the concrete scenarios a CDP client and an
//! extension link would actually produce.

mod common;

use cdp_relay::config::Config;
use common::{connect_cdp, connect_extension, recv_json, send_json, spawn_relay, spawn_relay_with};
use serde_json::json;

/// Scenario 1: discovery before the extension connects.
#[tokio::test]
async fn discovery_before_extension_connects() {
    let relay = spawn_relay().await;

    let cdp_upgrade = tokio_tungstenite::connect_async(relay.ws_url("/cdp")).await;
    assert!(cdp_upgrade.is_err(), "cdp upgrade must fail with no extension connected");

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(relay.http_url("/json/version"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body.get("webSocketDebuggerUrl").is_none());
}

/// Scenario 2: attach then close returns the registry to empty and
/// broadcasts the matching detach event.
#[tokio::test]
async fn attach_then_close_round_trips_the_registry() {
    let relay = spawn_relay().await;
    let mut ext = connect_extension(&relay).await;

    send_json(
        &mut ext,
        json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Target.attachedToTarget",
                "sessionId": "cb-tab-1",
                "params": {"targetInfo": {"targetId": "T-x", "type": "page"}}
            }
        }),
    )
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(relay.state.registry.len(), 1);

    let mut cdp = connect_cdp(&relay).await;
    send_json(
        &mut cdp,
        json!({"id": 1, "method": "Target.closeTarget", "params": {"targetId": "T-x"}}),
    )
    .await;

    // The close forwards to the extension; answer it.
    let forwarded = recv_json(&mut ext).await;
    assert_eq!(forwarded["method"], "forwardCDPCommand");
    assert_eq!(forwarded["params"]["method"], "Target.closeTarget");
    let call_id = forwarded["id"].as_u64().unwrap();
    send_json(&mut ext, json!({"id": call_id, "result": {"success": true}})).await;

    let response = recv_json(&mut cdp).await;
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["success"], true);

    // The extension also reports the detach once the tab's debugger detaches.
    send_json(
        &mut ext,
        json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Target.detachedFromTarget",
                "sessionId": "cb-tab-1",
                "params": {}
            }
        }),
    )
    .await;

    let event = recv_json(&mut cdp).await;
    assert_eq!(event["method"], "Target.detachedFromTarget");
    assert_eq!(event["params"]["sessionId"], "cb-tab-1");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(relay.state.registry.len(), 0);
}

/// Scenario 3: navigating a tab across origins preserves the session-id
/// but emits a synthetic detach-then-attach in order.
#[tokio::test]
async fn navigation_across_origins_emits_ordered_detach_then_attach() {
    let relay = spawn_relay().await;
    let mut ext = connect_extension(&relay).await;
    let mut cdp = connect_cdp(&relay).await;

    send_json(
        &mut cdp,
        json!({"id": 1, "method": "Target.setAutoAttach", "params": {}}),
    )
    .await;
    let _ack = recv_json(&mut cdp).await;

    send_json(
        &mut ext,
        json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Target.attachedToTarget",
                "sessionId": "cb-tab-3",
                "params": {"targetInfo": {"targetId": "T-a", "type": "page"}}
            }
        }),
    )
    .await;
    let first_attach = recv_json(&mut cdp).await;
    assert_eq!(first_attach["method"], "Target.attachedToTarget");

    send_json(
        &mut ext,
        json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Target.attachedToTarget",
                "sessionId": "cb-tab-3",
                "params": {"targetInfo": {"targetId": "T-b", "type": "page"}}
            }
        }),
    )
    .await;

    let detach = recv_json(&mut cdp).await;
    assert_eq!(detach["method"], "Target.detachedFromTarget");
    assert_eq!(detach["params"]["sessionId"], "cb-tab-3");
    assert_eq!(detach["params"]["targetId"], "T-a");

    let attach = recv_json(&mut cdp).await;
    assert_eq!(attach["method"], "Target.attachedToTarget");
    assert_eq!(attach["params"]["sessionId"], "cb-tab-3");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let entry = relay.state.registry.get_by_session("cb-tab-3").unwrap();
    assert_eq!(entry.target_id, "T-b");
}

/// Scenario 4: `openAndAttach` over HTTP succeeds and the new target shows
/// up in `/status`.
#[tokio::test]
async fn open_and_attach_happy_path_updates_status() {
    let relay = spawn_relay().await;
    let mut ext = connect_extension(&relay).await;

    let client = reqwest::Client::new();
    let open_call = tokio::spawn({
        let url = relay.http_url("/open-url");
        async move {
            client
                .post(url)
                .json(&json!({"url": "https://example.test"}))
                .send()
                .await
                .unwrap()
        }
    });

    let request = recv_json(&mut ext).await;
    assert_eq!(request["method"], "openAndAttach");
    assert_eq!(request["params"]["url"], "https://example.test");
    let call_id = request["id"].as_u64().unwrap();

    send_json(
        &mut ext,
        json!({
            "id": call_id,
            "result": {"tabId": 42, "sessionId": "cb-tab-9", "targetId": "T-open", "url": "https://example.test"}
        }),
    )
    .await;
    send_json(
        &mut ext,
        json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Target.attachedToTarget",
                "sessionId": "cb-tab-9",
                "params": {"targetInfo": {"targetId": "T-open", "type": "page", "url": "https://example.test"}}
            }
        }),
    )
    .await;

    let response = open_call.await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["sessionId"], "cb-tab-9");
    assert_eq!(body["targetId"], "T-open");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let status: serde_json::Value = reqwest::get(relay.http_url("/status")).await.unwrap().json().await.unwrap();
    let targets = status["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["targetId"], "T-open");
}

/// Scenario 5: non-http(s) schemes are rejected before the extension is
/// ever consulted.
#[tokio::test]
async fn open_and_attach_rejects_non_http_schemes() {
    let relay = spawn_relay().await;
    let _ext = connect_extension(&relay).await;

    let response = reqwest::Client::new()
        .post(relay.http_url("/open-url"))
        .json(&json!({"url": "file:///etc/passwd"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Only http and https URLs are allowed");
    assert_eq!(relay.state.registry.len(), 0);
}

/// Scenario 6: the discovery endpoints answer both with and without a
/// trailing slash.
#[tokio::test]
async fn discovery_endpoints_accept_trailing_slash_forms() {
    let relay = spawn_relay().await;
    let client = reqwest::Client::new();

    for path in ["/json", "/json/", "/json/list", "/json/list/"] {
        let response = client.get(relay.http_url(path)).send().await.unwrap();
        assert_eq!(response.status(), 200, "{path} should be routed");
    }
}

/// Scenario 7: a request whose header block exceeds the configured limit
/// is rejected before reaching any handler.
#[tokio::test]
async fn oversized_header_block_is_rejected() {
    let mut config = Config::default();
    config.max_header_bytes = 256;
    let relay = spawn_relay_with(config).await;

    let response = reqwest::Client::new()
        .get(relay.http_url("/status"))
        .header("x-padding", "x".repeat(512))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 431);
}

/// Scenario 8: the extension link flaps while a command is in flight; the
/// waiting CDP client gets an error frame and its socket is closed with a
/// 1011-class code.
#[tokio::test]
async fn extension_link_loss_fails_in_flight_commands_and_closes_peers() {
    let relay = spawn_relay().await;
    let mut ext = connect_extension(&relay).await;
    let mut cdp = connect_cdp(&relay).await;

    send_json(
        &mut cdp,
        json!({"id": 1, "method": "Runtime.evaluate", "params": {"expression": "1+1"}}),
    )
    .await;

    // Wait for the relay to have forwarded the call, then drop the link
    // without ever answering it.
    let _forwarded = recv_json(&mut ext).await;
    drop(ext);

    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message as TMessage;

    let mut saw_error = false;
    let mut close_code = None;
    loop {
        match cdp.next().await {
            Some(Ok(TMessage::Text(text))) => {
                let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                if frame.get("error").is_some() {
                    saw_error = true;
                }
            }
            Some(Ok(TMessage::Close(frame))) => {
                close_code = frame.map(|f| u16::from(f.code));
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => break,
        }
    }

    assert!(saw_error, "client should see an error for the in-flight command");
    assert_eq!(close_code, Some(1011));
}
