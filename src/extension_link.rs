//! The extension link.
//!
//! At most one extension link exists at a time. Writes to the link are
//! serialised through a single mailbox (one producer/consumer of
//! extension frames); this module stays transport-agnostic (it deals
//! in JSON text, not the axum/tungstenite `Message` enum) so the
//! upgrade handler in `server.rs` is the only place that touches a
//! concrete WebSocket type.

use crate::error::Error;
use crate::pending::{await_pending, PendingCallTable};
use crate::wire::ExtensionRequestFrame;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// A live extension link: one outbound mailbox plus the pending-call table
/// for requests sent over it.
pub struct ExtensionLink {
    outbound: mpsc::Sender<String>,
    pending: PendingCallTable,
}

impl ExtensionLink {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            outbound,
            pending: PendingCallTable::new(),
        }
    }

    /// Send a `forwardCDPCommand` and await its response.
    pub async fn forward_cdp_command(
        &self,
        method: impl Into<String>,
        session_id: Option<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, Error> {
        let method = method.into();
        let id = self.pending.next_id();
        let rx = self.pending.register(id);
        let frame = ExtensionRequestFrame::forward_cdp_command(id, method.clone(), session_id, params);
        self.send_raw(&frame).await?;
        await_pending(rx, timeout, &method).await
    }

    /// Send an `openAndAttach` and await its response.
    pub async fn open_and_attach(
        &self,
        url: impl Into<String>,
        activate: bool,
        timeout: Duration,
    ) -> Result<Value, Error> {
        let id = self.pending.next_id();
        let rx = self.pending.register(id);
        let frame = ExtensionRequestFrame::open_and_attach(id, url, activate);
        self.send_raw(&frame).await?;
        await_pending(rx, timeout, "openAndAttach").await
    }

    /// Send a keepalive ping. A missing pong is not itself a disconnect
    /// trigger, so failures are logged by the caller, not surfaced as an
    /// error here beyond the send failing.
    pub async fn send_ping(&self) -> Result<(), Error> {
        self.send_raw(&ExtensionRequestFrame::ping()).await
    }

    async fn send_raw(&self, frame: &ExtensionRequestFrame) -> Result<(), Error> {
        self.outbound
            .send(frame.to_json())
            .await
            .map_err(|_| Error::LinkNotConnected)
    }

    /// Resolve a response frame by id; returns `true` if a waiter existed.
    pub fn resolve(&self, id: u64, result: Option<Value>, error: Option<String>) -> bool {
        self.pending.resolve(id, result, error)
    }

    /// Fail every outstanding call (link lost).
    pub fn fail_all_pending(&self) {
        self.pending.fail_all();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Holds the single extension link slot, enforcing "at most one at a time".
#[derive(Default)]
pub struct ExtensionLinkSlot {
    inner: RwLock<Option<Arc<ExtensionLink>>>,
}

impl ExtensionLinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to claim the slot for a new link. Fails with a conflict
    /// error if one is already connected (HTTP 409 at upgrade time).
    pub fn claim(&self, link: ExtensionLink) -> Result<Arc<ExtensionLink>, Error> {
        let mut slot = self.inner.write().expect("extension link slot poisoned");
        if slot.is_some() {
            return Err(Error::internal("extension link already connected"));
        }
        let link = Arc::new(link);
        *slot = Some(link.clone());
        Ok(link)
    }

    /// Release the slot (link closed). No-op if a different, newer link
    /// already replaced it.
    pub fn release(&self, link: &Arc<ExtensionLink>) {
        let mut slot = self.inner.write().expect("extension link slot poisoned");
        if let Some(current) = slot.as_ref() {
            if Arc::ptr_eq(current, link) {
                *slot = None;
            }
        }
    }

    pub fn get(&self) -> Option<Arc<ExtensionLink>> {
        self.inner.read().expect("extension link slot poisoned").clone()
    }

    pub fn is_connected(&self) -> bool {
        self.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_fails_when_already_connected() {
        let slot = ExtensionLinkSlot::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let first = slot.claim(ExtensionLink::new(tx1)).unwrap();

        let (tx2, _rx2) = mpsc::channel(8);
        assert!(slot.claim(ExtensionLink::new(tx2)).is_err());

        slot.release(&first);
        assert!(!slot.is_connected());
    }

    #[tokio::test]
    async fn release_is_a_noop_for_a_stale_link() {
        let slot = ExtensionLinkSlot::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let first = slot.claim(ExtensionLink::new(tx1)).unwrap();
        slot.release(&first);

        let (tx2, _rx2) = mpsc::channel(8);
        let second = slot.claim(ExtensionLink::new(tx2)).unwrap();

        // Releasing the stale `first` handle must not evict `second`.
        slot.release(&first);
        assert!(slot.is_connected());
        drop(second);
    }

    #[tokio::test]
    async fn forward_cdp_command_round_trips_through_the_pending_table() {
        let (tx, mut rx) = mpsc::channel(8);
        let link = Arc::new(ExtensionLink::new(tx));

        let caller = link.clone();
        let call = tokio::spawn(async move {
            caller
                .forward_cdp_command("Page.navigate", None, None, Duration::from_secs(1))
                .await
        });

        let sent = rx.recv().await.unwrap();
        let frame: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(frame["method"], "forwardCDPCommand");
        assert_eq!(frame["params"]["method"], "Page.navigate");
        let id = frame["id"].as_u64().unwrap();

        assert!(link.resolve(id, Some(serde_json::json!({"frameId": "f1"})), None));
        let result = call.await.unwrap().unwrap();
        assert_eq!(result["frameId"], "f1");
    }
}
