//! The extension-side agent: owns tab/session bookkeeping and executes
//! commands the relay forwards against a [`DebuggerApi`].

use crate::agent::debugger::{DebuggerApi, DebuggerEvent};
use crate::agent::state::{SessionIndex, TabBinding};
use crate::error::Error;
use crate::wire::{agent_error_frame, agent_event_frame, agent_pong_frame, agent_success_frame, AgentInboundFrame};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// Delay between the best-effort `Runtime.disable` and the real
/// `Runtime.enable` in the Runtime.enable special case. Treated as a
/// floor, not a precise wall-clock contract.
const RUNTIME_ENABLE_SETTLE: Duration = Duration::from_millis(50);

/// Delay after `Target.createTarget` before attaching, giving the
/// browser time to register the new tab.
const CREATE_TARGET_SETTLE: Duration = Duration::from_millis(100);

pub struct ExtensionAgent<D: DebuggerApi> {
    debugger: Arc<D>,
    sessions: SessionIndex,
    tab_load_timeout: Duration,
    upstream: RwLock<Option<mpsc::Sender<Message>>>,
}

impl<D: DebuggerApi> ExtensionAgent<D> {
    pub fn new(debugger: Arc<D>, tab_load_timeout: Duration) -> Self {
        Self {
            debugger,
            sessions: SessionIndex::new(),
            tab_load_timeout,
            upstream: RwLock::new(None),
        }
    }

    pub fn set_link(&self, sender: mpsc::Sender<Message>) {
        *self.upstream.write().expect("agent upstream lock poisoned") = Some(sender);
    }

    pub fn clear_link(&self) {
        *self.upstream.write().expect("agent upstream lock poisoned") = None;
    }

    fn send_frame(&self, frame: Value) {
        let sender = self.upstream.read().expect("agent upstream lock poisoned").clone();
        let Some(sender) = sender else { return };
        if sender.try_send(Message::Text(frame.to_string())).is_err() {
            warn!("agent upstream mailbox full or closed, dropping frame");
        }
    }

    /// Dispatch one decoded relay->agent frame.
    pub async fn handle_frame(&self, frame: AgentInboundFrame) {
        match frame {
            AgentInboundFrame::ForwardCdpCommand { id, method, session_id, params } => {
                let result = self.execute_command(&method, session_id, params).await;
                self.respond(id, result);
            }
            AgentInboundFrame::OpenAndAttach { id, url, activate } => {
                let result = self.open_and_attach(&url, activate).await;
                self.respond(id, result);
            }
            AgentInboundFrame::Ping => self.send_frame(agent_pong_frame()),
            AgentInboundFrame::Ignored => {}
        }
    }

    fn respond(&self, id: u64, result: Result<Value, Error>) {
        let frame = match result {
            Ok(value) => agent_success_frame(id, value),
            Err(err) => agent_error_frame(id, err.client_message()),
        };
        self.send_frame(frame);
    }

    /// Attach procedure. Refuses a reentrant attach on the same
    /// tab id while one is already in flight or completed.
    pub async fn attach_tab(&self, tab_id: &str, skip_attached_event: bool) -> Result<TabBinding, Error> {
        if !self.sessions.begin_connecting(tab_id) {
            return Err(Error::internal("attach already in progress for this tab"));
        }
        let outcome = self.attach_tab_inner(tab_id, skip_attached_event).await;
        if outcome.is_err() {
            self.sessions.end_connecting(tab_id);
        }
        outcome
    }

    async fn attach_tab_inner(&self, tab_id: &str, skip_attached_event: bool) -> Result<TabBinding, Error> {
        self.debugger.attach(tab_id).await?;
        let _ = self.debugger.send_command(tab_id, None, "Page.enable", json!({})).await;

        let target_info = self.debugger.send_command(tab_id, None, "Target.getTargetInfo", json!({})).await?;
        let target_id = target_info
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::internal("no-target-id"))?
            .to_string();

        let session_id = self.sessions.mint_session_id();
        let binding = TabBinding {
            tab_id: tab_id.to_string(),
            session_id: session_id.clone(),
            target_id: target_id.clone(),
        };
        self.sessions.bind(binding.clone());

        if !skip_attached_event {
            self.send_frame(agent_event_frame(
                "Target.attachedToTarget",
                Some(&session_id),
                json!({
                    "sessionId": session_id,
                    "targetInfo": target_info,
                    "waitingForDebugger": false,
                }),
            ));
        }

        Ok(binding)
    }

    /// Detach procedure.
    pub async fn detach_tab(&self, tab_id: &str, reason: &str) {
        if let Some(binding) = self.sessions.unbind(tab_id) {
            self.send_frame(agent_event_frame(
                "Target.detachedFromTarget",
                Some(&binding.session_id),
                json!({
                    "sessionId": binding.session_id,
                    "targetId": binding.target_id,
                    "reason": reason,
                }),
            ));
        }
        let _ = self.debugger.detach(tab_id).await;
    }

    /// `openAndAttach(url, activate)` flow.
    pub async fn open_and_attach(&self, url: &str, activate: bool) -> Result<Value, Error> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::invalid_params("Only http and https URLs are allowed"));
        }

        let tab_id = self.debugger.create_tab(url, activate).await?;
        self.sessions.mark_pending_open(&tab_id);
        let outcome = self.finish_open_and_attach(&tab_id, url).await;
        self.sessions.unmark_pending_open(&tab_id);
        outcome
    }

    async fn finish_open_and_attach(&self, tab_id: &str, url: &str) -> Result<Value, Error> {
        self.debugger.wait_until_complete(tab_id, self.tab_load_timeout).await?;
        let binding = self.attach_tab(tab_id, false).await?;
        Ok(json!({
            "tabId": tab_id,
            "sessionId": binding.session_id,
            "targetId": binding.target_id,
            "url": url,
        }))
    }

    /// Command forwarding: resolve the owning tab, apply the documented
    /// special cases, otherwise pass the method straight to the debugger.
    pub async fn execute_command(
        &self,
        method: &str,
        session_id: Option<String>,
        params: Option<Value>,
    ) -> Result<Value, Error> {
        let params = params.unwrap_or(Value::Null);
        let tab_id = self.resolve_tab(session_id.as_deref(), &params)?;

        match method {
            "Runtime.enable" => {
                let _ = self.debugger.send_command(&tab_id, None, "Runtime.disable", json!({})).await;
                tokio::time::sleep(RUNTIME_ENABLE_SETTLE).await;
                self.debugger.send_command(&tab_id, None, "Runtime.enable", params).await
            }
            "Target.createTarget" => {
                let url = params.get("url").and_then(Value::as_str).unwrap_or("about:blank");
                let new_tab = self.debugger.create_tab(url, true).await?;
                tokio::time::sleep(CREATE_TARGET_SETTLE).await;
                let binding = self.attach_tab(&new_tab, true).await?;
                Ok(json!({ "targetId": binding.target_id }))
            }
            "Target.closeTarget" => {
                let target_tab = params
                    .get("targetId")
                    .and_then(Value::as_str)
                    .and_then(|tid| self.sessions.tab_for_target(tid))
                    .unwrap_or(tab_id);
                let success = self.debugger.close_tab(&target_tab).await.unwrap_or(false);
                Ok(json!({ "success": success }))
            }
            "Target.activateTarget" => {
                self.debugger.activate_tab(&tab_id).await?;
                Ok(json!({}))
            }
            _ => {
                let child = session_id
                    .as_deref()
                    .filter(|sid| self.sessions.is_child_session_of(&tab_id, sid))
                    .map(str::to_string);
                self.debugger.send_command(&tab_id, child.as_deref(), method, params).await
            }
        }
    }

    /// Tab selection rule: relay session-id, then child session-id,
    /// then explicit target-id, then the first attached tab.
    fn resolve_tab(&self, session_id: Option<&str>, params: &Value) -> Result<String, Error> {
        if let Some(sid) = session_id {
            if let Some(tab) = self.sessions.tab_for_session(sid) {
                return Ok(tab);
            }
            if let Some(tab) = self.sessions.tab_for_child_session(sid) {
                return Ok(tab);
            }
        }
        if let Some(target_id) = params.get("targetId").and_then(Value::as_str) {
            if let Some(tab) = self.sessions.tab_for_target(target_id) {
                return Ok(tab);
            }
        }
        self.sessions.first_attached_tab().ok_or_else(|| Error::internal("no-attached-tab"))
    }

    /// Record a child session observed on an inbound `Target.attachedToTarget`
    /// debugger event, so later commands addressed to it route correctly.
    pub fn record_child_session(&self, tab_id: &str, child_session_id: &str) {
        self.sessions.record_child(child_session_id.to_string(), tab_id.to_string());
    }

    pub fn remove_child_session(&self, child_session_id: &str) {
        self.sessions.remove_child(child_session_id);
    }

    /// Drain the debugger's event channel for as long as it stays open,
    /// forwarding every event upstream and tracking child sessions along
    /// the way. Returns once the channel closes.
    pub async fn forward_debugger_events(&self) {
        let mut events = self.debugger.take_events();
        while let Some(event) = events.recv().await {
            self.handle_debugger_event(event);
        }
    }

    fn handle_debugger_event(&self, event: DebuggerEvent) {
        let Some(binding) = self.sessions.binding_for(&event.tab_id) else {
            return;
        };
        let session_id = event.session_id.clone().unwrap_or(binding.session_id);

        match event.method.as_str() {
            "Target.attachedToTarget" => {
                if let Some(child) = event.params.get("sessionId").and_then(Value::as_str) {
                    self.record_child_session(&event.tab_id, child);
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(child) = event.params.get("sessionId").and_then(Value::as_str) {
                    self.remove_child_session(child);
                }
            }
            _ => {}
        }

        self.send_frame(agent_event_frame(&event.method, Some(&session_id), event.params));
    }

    pub fn is_attached(&self, tab_id: &str) -> bool {
        self.sessions.is_attached(tab_id)
    }

    pub fn attached_count(&self) -> usize {
        self.sessions.attached_count()
    }
}
