//! The transport that dials the relay's `/extension` endpoint from the
//! agent side, using `tokio_tungstenite::connect_async` with the
//! client/server roles reversed: here the agent is the one dialing out.

use crate::agent::agent::ExtensionAgent;
use crate::agent::debugger::DebuggerApi;
use crate::error::Error;
use crate::wire::decode_agent_frame;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const OUTBOUND_MAILBOX_CAPACITY: usize = 256;

/// Dial `url` (the relay's `/extension` endpoint) and run the agent's
/// read/write loop until the connection drops. Returns once the socket
/// is closed, by either side.
pub async fn run<D: DebuggerApi + 'static>(url: &str, agent: Arc<ExtensionAgent<D>>) -> Result<(), Error> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| Error::websocket(e.to_string()))?;
    let (mut write, mut read) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_MAILBOX_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    agent.set_link(out_tx);

    let events_agent = agent.clone();
    let events_task = tokio::spawn(async move { events_agent.forward_debugger_events().await });

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(frame) = decode_agent_frame(&text) {
                    let agent = agent.clone();
                    tokio::spawn(async move { agent.handle_frame(frame).await });
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "agent link read error");
                break;
            }
        }
    }

    debug!("agent link closed");
    agent.clear_link();
    writer.abort();
    events_task.abort();
    Ok(())
}
