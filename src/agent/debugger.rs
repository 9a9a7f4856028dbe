//! The seam between the agent's attach/detach/command logic and the
//! actual browser debugger API: production code talks to a real browser
//! through `async_trait`, tests talk to an in-memory double with no
//! browser or extension host involved. Besides request/response calls,
//! the seam carries one asynchronous event channel (`take_events`) the
//! browser uses to push notifications the agent didn't ask for.

use crate::error::Error;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// An asynchronous notification the browser debugger emits outside of any
/// command's direct response — `Page.*`/`Network.*`/`Runtime.*` events, or
/// a `Target.attachedToTarget` the browser fires on its own for a child
/// session (an iframe, a worker) it auto-attached under `tab_id`.
#[derive(Debug, Clone)]
pub struct DebuggerEvent {
    /// The tab whose debugger session produced this event.
    pub tab_id: String,
    /// The CDP session this event already carries, if the browser tagged
    /// one directly (otherwise the agent addresses it to `tab_id`'s own
    /// session).
    pub session_id: Option<String>,
    pub method: String,
    pub params: Value,
}

/// The browser-debugger operations the agent needs. A real implementation
/// (out of this crate's reach — it lives in the extension's JS host) would
/// bridge these to `chrome.debugger`/`chrome.tabs`; `MockDebugger` below
/// bridges them to an in-memory tab table for testing.
#[async_trait]
pub trait DebuggerApi: Send + Sync {
    /// Attach the browser debugger to `tab_id` at protocol 1.3.
    async fn attach(&self, tab_id: &str) -> Result<(), Error>;

    /// Detach the browser debugger from `tab_id`. Best-effort: the tab
    /// may already be gone.
    async fn detach(&self, tab_id: &str) -> Result<(), Error>;

    /// Send a CDP method to the tab's debugger session (or a child
    /// session, if provided) and return its result.
    async fn send_command(
        &self,
        tab_id: &str,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, Error>;

    /// Create a new tab at `url`, optionally making it the active tab.
    /// Returns the new tab's id.
    async fn create_tab(&self, url: &str, active: bool) -> Result<String, Error>;

    /// Close `tab_id`. Returns whether a tab was actually closed.
    async fn close_tab(&self, tab_id: &str) -> Result<bool, Error>;

    /// Focus the tab's window and activate it, without touching the
    /// debugger.
    async fn activate_tab(&self, tab_id: &str) -> Result<(), Error>;

    /// Poll `tab_id` until its navigation reaches `status: "complete"`,
    /// or fail once `timeout` elapses. Returns the tab's current URL.
    async fn wait_until_complete(&self, tab_id: &str, timeout: Duration) -> Result<String, Error>;

    /// Take ownership of this debugger's event receiver. The agent calls
    /// this exactly once per link, then drains it for the link's
    /// lifetime to forward `Page.*`/`Network.*`/`Runtime.*` and child
    /// `Target.attachedToTarget`/`Target.detachedFromTarget` events
    /// upstream. Panics if called more than once.
    fn take_events(&self) -> mpsc::Receiver<DebuggerEvent>;
}

#[derive(Debug, Clone)]
struct MockTab {
    url: String,
    attached: bool,
}

/// In-memory `DebuggerApi` double. Tabs "complete" immediately; tests
/// that need to exercise the pending/connecting window do so by holding
/// the agent's internal locks directly rather than by delaying the mock.
pub struct MockDebugger {
    next_tab: AtomicU64,
    next_target: AtomicU64,
    tabs: Mutex<HashMap<String, MockTab>>,
    events_tx: mpsc::Sender<DebuggerEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<DebuggerEvent>>>,
}

impl Default for MockDebugger {
    fn default() -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            next_tab: AtomicU64::new(0),
            next_target: AtomicU64::new(0),
            tabs: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }
}

impl MockDebugger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a synthetic debugger event, standing in for a real browser's
    /// asynchronous notification.
    pub fn emit_event(&self, event: DebuggerEvent) {
        let _ = self.events_tx.try_send(event);
    }

    /// Pre-register an existing tab (as if opened outside the agent),
    /// returning its id.
    pub fn seed_tab(&self, url: &str) -> String {
        let id = format!("tab-{}", self.next_tab.fetch_add(1, Ordering::SeqCst));
        self.tabs.lock().expect("mock debugger lock poisoned").insert(
            id.clone(),
            MockTab {
                url: url.to_string(),
                attached: false,
            },
        );
        id
    }

    fn target_id_for(&self, tab_id: &str) -> String {
        format!("target-{tab_id}-{}", self.next_target.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl DebuggerApi for MockDebugger {
    async fn attach(&self, tab_id: &str) -> Result<(), Error> {
        let mut tabs = self.tabs.lock().expect("mock debugger lock poisoned");
        let tab = tabs.get_mut(tab_id).ok_or_else(|| Error::internal("no such tab"))?;
        tab.attached = true;
        Ok(())
    }

    async fn detach(&self, tab_id: &str) -> Result<(), Error> {
        if let Some(tab) = self.tabs.lock().expect("mock debugger lock poisoned").get_mut(tab_id) {
            tab.attached = false;
        }
        Ok(())
    }

    async fn send_command(
        &self,
        tab_id: &str,
        _session_id: Option<&str>,
        method: &str,
        _params: Value,
    ) -> Result<Value, Error> {
        match method {
            "Target.getTargetInfo" => {
                let url = self
                    .tabs
                    .lock()
                    .expect("mock debugger lock poisoned")
                    .get(tab_id)
                    .map(|t| t.url.clone())
                    .ok_or_else(|| Error::internal("no such tab"))?;
                Ok(json!({
                    "targetId": self.target_id_for(tab_id),
                    "type": "page",
                    "url": url,
                    "title": "",
                }))
            }
            _ => Ok(json!({})),
        }
    }

    async fn create_tab(&self, url: &str, _active: bool) -> Result<String, Error> {
        Ok(self.seed_tab(url))
    }

    async fn close_tab(&self, tab_id: &str) -> Result<bool, Error> {
        Ok(self.tabs.lock().expect("mock debugger lock poisoned").remove(tab_id).is_some())
    }

    async fn activate_tab(&self, _tab_id: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn wait_until_complete(&self, tab_id: &str, _timeout: Duration) -> Result<String, Error> {
        self.tabs
            .lock()
            .expect("mock debugger lock poisoned")
            .get(tab_id)
            .map(|t| t.url.clone())
            .ok_or_else(|| Error::internal("no such tab"))
    }

    fn take_events(&self) -> mpsc::Receiver<DebuggerEvent> {
        self.events_rx
            .lock()
            .expect("mock debugger lock poisoned")
            .take()
            .expect("mock debugger events already taken")
    }
}
