//! Shared harness for the relay's end-to-end tests.
//!
//! Spins up a real `axum::serve` instance on an ephemeral loopback port so
//! tests drive the relay the way a real CDP client and a real extension
//! would: over HTTP and WebSocket, never by calling internal types directly.

use cdp_relay::config::Config;
use cdp_relay::server::{serve_on, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as TMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub struct Relay {
    pub addr: SocketAddr,
    pub state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl Relay {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Signal graceful shutdown; does not wait for it to complete.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Bind on an ephemeral port and start serving in the background.
pub async fn spawn_relay() -> Relay {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.default_timeout_secs = 5;
    config.open_and_attach_timeout_secs = 5;
    spawn_relay_with(config).await
}

/// Like [`spawn_relay`], but lets a test tune the config (e.g. a smaller
/// `max_header_bytes` to exercise a limit without huge payloads).
pub async fn spawn_relay_with(mut config: Config) -> Relay {
    config.host = "127.0.0.1".to_string();
    config.port = 0;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let state = AppState::new(Arc::new(config));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_state = state.clone();
    tokio::spawn(async move {
        let _ = serve_on(listener, server_state, async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    Relay {
        addr,
        state,
        shutdown_tx: Some(shutdown_tx),
    }
}

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connect a fake extension to `/extension` and return its socket.
pub async fn connect_extension(relay: &Relay) -> WsStream {
    let (ws, _resp) = tokio_tungstenite::connect_async(relay.ws_url("/extension"))
        .await
        .expect("extension upgrade succeeds");
    ws
}

/// Connect a fake CDP client to `/cdp` and return its socket.
pub async fn connect_cdp(relay: &Relay) -> WsStream {
    let (ws, _resp) = tokio_tungstenite::connect_async(relay.ws_url("/cdp"))
        .await
        .expect("cdp upgrade succeeds");
    ws
}

/// Read the next text frame and parse it as JSON, skipping pings/pongs.
pub async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        match ws.next().await.expect("stream not closed").expect("frame ok") {
            TMessage::Text(text) => return serde_json::from_str(&text).expect("valid json frame"),
            TMessage::Ping(_) | TMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(TMessage::Text(value.to_string())).await.expect("send frame");
}
