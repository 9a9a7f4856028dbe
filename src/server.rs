//! The peer transport: a single loopback listener hosting the
//! `/extension` and `/cdp` WebSocket upgrades plus the HTTP surface.
//! Loopback- and origin-gates every upgrade before it completes.

use crate::client_pool::ClientPool;
use crate::config::Config;
use crate::error::Error;
use crate::extension_link::{ExtensionLink, ExtensionLinkSlot};
use crate::http;
use crate::registry::TargetRegistry;
use crate::router::Router as CommandRouter;
use crate::wire::{decode_cdp_command, decode_extension_frame, ExtensionInboundFrame};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Bound on the extension link's outbound mailbox.
const EXTENSION_MAILBOX_CAPACITY: usize = 256;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TargetRegistry>,
    pub extension_slot: Arc<ExtensionLinkSlot>,
    pub clients: Arc<ClientPool>,
    pub router: Arc<CommandRouter>,
    pub config: Arc<Config>,
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let registry = Arc::new(TargetRegistry::new());
        let extension_slot = Arc::new(ExtensionLinkSlot::new());
        let clients = Arc::new(ClientPool::new());
        let router = Arc::new(CommandRouter::new(
            registry.clone(),
            extension_slot.clone(),
            clients.clone(),
            Duration::from_secs(config.default_timeout_secs),
        ));
        let (shutdown, _) = broadcast::channel(1);
        Self {
            registry,
            extension_slot,
            clients,
            router,
            config,
            shutdown,
        }
    }
}

pub fn build_router(state: AppState) -> AxumRouter {
    let body_limit = state.config.max_body_bytes;
    let header_limit = state.config.max_header_bytes;
    AxumRouter::new()
        .route("/", get(root).head(root))
        .route("/status", get(http::status))
        .route("/extension/status", get(http::extension_status))
        .route("/json/version", get(http::discovery_version))
        .route("/json/version/", get(http::discovery_version))
        .route("/json", get(http::discovery_list))
        .route("/json/", get(http::discovery_list))
        .route("/json/list", get(http::discovery_list))
        .route("/json/list/", get(http::discovery_list))
        .route("/open-url", post(http::open_url))
        .route("/screenshots/:filename", get(http::screenshot))
        .route("/extension", get(extension_upgrade))
        .route("/cdp", get(cdp_upgrade))
        .layer(axum::middleware::from_fn_with_state(header_limit, enforce_header_limit))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind and serve until the process receives a shutdown signal. Returns
/// once every connection has been told to close.
pub async fn serve(state: AppState, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<(), Error> {
    let addr = state.config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "relay listening");
    serve_on(listener, state, shutdown).await
}

/// Serve on an already-bound listener. Split out of [`serve`] so tests can
/// bind an ephemeral port and learn the real address before connecting.
pub async fn serve_on(
    listener: TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let shutdown_tx = state.shutdown.clone();
    let app = build_router(state.clone());

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown signal received, closing peers");
            let _ = shutdown_tx.send(());
        });

    server.await?;
    Ok(())
}

async fn root() -> impl IntoResponse {
    StatusCode::OK
}

/// Reject a request whose header block exceeds the configured size, the
/// way a server's own header-limit setting would, before any handler or
/// the body-limit layer sees it.
async fn enforce_header_limit(State(limit): State<usize>, request: Request, next: Next) -> Response {
    let total: usize = request
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 2)
        .sum();
    if total > limit {
        return StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE.into_response();
    }
    next.run(request).await
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}

/// Extensions always present a `chrome-extension://…` origin; ordinary
/// web pages do not, so an absent header is allowed but a mismatched one
/// is rejected.
fn is_valid_origin(headers: &HeaderMap) -> bool {
    match headers.get(axum::http::header::ORIGIN) {
        None => true,
        Some(value) => value
            .to_str()
            .map(|s| s.starts_with("chrome-extension://"))
            .unwrap_or(false),
    }
}

async fn extension_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if !is_loopback(addr.ip()) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !is_valid_origin(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if state.extension_slot.is_connected() {
        return StatusCode::CONFLICT.into_response();
    }
    ws.on_upgrade(move |socket| handle_extension_socket(socket, state))
}

async fn cdp_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if !is_loopback(addr.ip()) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !is_valid_origin(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !state.extension_slot.is_connected() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_cdp_socket(socket, state))
}

async fn handle_extension_socket(socket: WebSocket, state: AppState) {
    let (out_tx, mut out_rx) = mpsc::channel::<String>(EXTENSION_MAILBOX_CAPACITY);
    let link = match state.extension_slot.claim(ExtensionLink::new(out_tx)) {
        Ok(link) => link,
        Err(_) => return,
    };
    info!("extension connected");

    let (mut sink, mut stream) = socket.split();
    let ping_interval = Duration::from_secs(state.config.ping_interval_secs);
    let ping_link = link.clone();
    let mut shutdown_rx = state.shutdown.subscribe();
    let writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        loop {
            tokio::select! {
                biased;
                text = out_rx.recv() => {
                    match text {
                        Some(text) => { if sink.send(WsMessage::Text(text)).await.is_err() { break; } }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let _ = ping_link.send_ping().await;
                }
                _ = shutdown_rx.recv() => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: 1000,
                            reason: "server shutting down".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => handle_extension_frame(&state, &link, &text),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "extension link read error");
                break;
            }
        }
    }

    writer.abort();
    state.extension_slot.release(&link);
    link.fail_all_pending();
    state.registry.clear();
    state.clients.close_all(1011, "extension disconnected");
    info!("extension disconnected");
}

fn handle_extension_frame(state: &AppState, link: &Arc<ExtensionLink>, text: &str) {
    match decode_extension_frame(text) {
        Some(ExtensionInboundFrame::Response { id, result, error }) => {
            link.resolve(id, result, error);
        }
        Some(ExtensionInboundFrame::ForwardCdpEvent { method, session_id, params }) => {
            state.router.handle_extension_event(&method, session_id, params);
        }
        Some(ExtensionInboundFrame::Pong) => debug!("pong received"),
        Some(ExtensionInboundFrame::Ignored) | None => {}
    }
}

async fn handle_cdp_socket(socket: WebSocket, state: AppState) {
    let (peer_id, mut mailbox_rx, mut control_rx) = state.clients.register();
    let (mut sink, mut stream) = socket.split();
    let mut shutdown_rx = state.shutdown.subscribe();

    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                frame = mailbox_rx.recv() => {
                    match frame {
                        Some(value) => {
                            if sink.send(WsMessage::Text(value.to_string())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                close = control_rx.recv() => {
                    if let Some(close) = close {
                        let _ = sink
                            .send(WsMessage::Close(Some(CloseFrame {
                                code: close.code,
                                reason: close.reason.into(),
                            })))
                            .await;
                    }
                    break;
                }
                _ = shutdown_rx.recv() => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "going away".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                if let Some(cmd) = decode_cdp_command(&text) {
                    let router = state.router.clone();
                    tokio::spawn(async move { router.handle_command(peer_id, cmd).await; });
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "cdp peer read error");
                break;
            }
        }
    }

    state.clients.unregister(peer_id);
    writer.abort();
}
