//! Wire frame types for the two duplex protocols the relay speaks:
//! relay <-> extension and relay <-> CDP client.
//!
//! Frames are parsed once at the edge and matched internally; nothing
//! downstream of `decode_*` touches raw `serde_json::Value` for the
//! frame envelope itself (command/event `params` stay untyped, since
//! the relay never interprets CDP payloads beyond dispatch routing).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame sent from the relay to the extension link.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExtensionRequestFrame {
    /// `{id, method:"forwardCDPCommand", params:{method, sessionId?, params?}}`
    ForwardCdpCommand {
        id: u64,
        method: &'static str,
        params: ForwardCdpCommandParams,
    },
    /// `{id, method:"openAndAttach", params:{url, activate}}`
    OpenAndAttach {
        id: u64,
        method: &'static str,
        params: OpenAndAttachParams,
    },
    /// `{method:"ping"}`
    Ping { method: &'static str },
}

#[derive(Debug, Clone, Serialize)]
pub struct ForwardCdpCommandParams {
    pub method: String,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAndAttachParams {
    pub url: String,
    pub activate: bool,
}

impl ExtensionRequestFrame {
    pub fn forward_cdp_command(
        id: u64,
        method: impl Into<String>,
        session_id: Option<String>,
        params: Option<Value>,
    ) -> Self {
        ExtensionRequestFrame::ForwardCdpCommand {
            id,
            method: "forwardCDPCommand",
            params: ForwardCdpCommandParams {
                method: method.into(),
                session_id,
                params,
            },
        }
    }

    pub fn open_and_attach(id: u64, url: impl Into<String>, activate: bool) -> Self {
        ExtensionRequestFrame::OpenAndAttach {
            id,
            method: "openAndAttach",
            params: OpenAndAttachParams {
                url: url.into(),
                activate,
            },
        }
    }

    pub fn ping() -> Self {
        ExtensionRequestFrame::Ping { method: "ping" }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("extension request frame always serializes")
    }
}

/// A raw frame received from the extension, before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExtensionFrame {
    pub id: Option<u64>,
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A classified frame received on the extension link.
#[derive(Debug, Clone)]
pub enum ExtensionInboundFrame {
    /// Response to a previously-sent `forwardCDPCommand`/`openAndAttach` call.
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<String>,
    },
    /// `{method:"forwardCDPEvent", params:{method, sessionId?, params?}}`
    ForwardCdpEvent {
        method: String,
        session_id: Option<String>,
        params: Value,
    },
    /// `{method:"pong"}`
    Pong,
    /// Anything else recognised-but-ignored (e.g. operational log frames).
    Ignored,
}

/// Decode a raw text frame from the extension link.
///
/// Malformed JSON yields `None`; the caller drops it silently.
pub fn decode_extension_frame(text: &str) -> Option<ExtensionInboundFrame> {
    let raw: RawExtensionFrame = serde_json::from_str(text).ok()?;

    if let Some(id) = raw.id {
        // A non-empty `error` field takes precedence over any `result`.
        let error = raw.error.filter(|e| !e.is_empty());
        return Some(ExtensionInboundFrame::Response {
            id,
            result: raw.result,
            error,
        });
    }

    match raw.method.as_deref() {
        Some("forwardCDPEvent") => {
            let params = raw.params.unwrap_or(Value::Null);
            let method = params
                .get("method")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let session_id = params
                .get("sessionId")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let inner_params = params.get("params").cloned().unwrap_or(Value::Null);
            Some(ExtensionInboundFrame::ForwardCdpEvent {
                method,
                session_id,
                params: inner_params,
            })
        }
        Some("pong") => Some(ExtensionInboundFrame::Pong),
        Some(_) => Some(ExtensionInboundFrame::Ignored),
        None => Some(ExtensionInboundFrame::Ignored),
    }
}

/// A command frame received from a CDP client.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpCommandFrame {
    pub id: u64,
    pub method: String,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub params: Value,
}

/// Decode a raw text frame from a CDP client.
///
/// Anything that is not a JSON object with integer `id` and string
/// `method` is ignored.
pub fn decode_cdp_command(text: &str) -> Option<CdpCommandFrame> {
    serde_json::from_str(text).ok()
}

/// Build a success response frame for a CDP client.
pub fn cdp_success_frame(id: u64, session_id: Option<&str>, result: Value) -> Value {
    let mut obj = serde_json::json!({ "id": id, "result": result });
    if let Some(sid) = session_id {
        obj["sessionId"] = Value::String(sid.to_string());
    }
    obj
}

/// Build an error response frame for a CDP client.
pub fn cdp_error_frame(id: u64, session_id: Option<&str>, message: impl Into<String>) -> Value {
    let mut obj = serde_json::json!({ "id": id, "error": { "message": message.into() } });
    if let Some(sid) = session_id {
        obj["sessionId"] = Value::String(sid.to_string());
    }
    obj
}

/// Build a broadcast event frame (from the registry or forwarded from the
/// extension) addressed with an optional session id.
pub fn cdp_event_frame(method: &str, session_id: Option<&str>, params: Value) -> Value {
    let mut obj = serde_json::json!({ "method": method, "params": params });
    if let Some(sid) = session_id {
        obj["sessionId"] = Value::String(sid.to_string());
    }
    obj
}

/// A raw frame received by the extension-side agent from the relay.
#[derive(Debug, Clone, Deserialize)]
struct RawAgentFrame {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A classified frame received on the agent's relay link, the mirror
/// image of [`ExtensionInboundFrame`] for the other end of the wire.
#[derive(Debug, Clone)]
pub enum AgentInboundFrame {
    ForwardCdpCommand {
        id: u64,
        method: String,
        session_id: Option<String>,
        params: Option<Value>,
    },
    OpenAndAttach {
        id: u64,
        url: String,
        activate: bool,
    },
    Ping,
    Ignored,
}

/// Decode a raw text frame received by the agent. Malformed JSON yields
/// `None`; the agent drops it silently, mirroring the relay's own
/// malformed-frame handling.
pub fn decode_agent_frame(text: &str) -> Option<AgentInboundFrame> {
    let raw: RawAgentFrame = serde_json::from_str(text).ok()?;

    match (raw.id, raw.method.as_deref()) {
        (Some(id), Some("forwardCDPCommand")) => {
            let method = raw
                .params
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let session_id = raw
                .params
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let params = raw.params.get("params").cloned();
            Some(AgentInboundFrame::ForwardCdpCommand {
                id,
                method,
                session_id,
                params,
            })
        }
        (Some(id), Some("openAndAttach")) => {
            let url = raw.params.get("url").and_then(Value::as_str).unwrap_or_default().to_string();
            let activate = raw.params.get("activate").and_then(Value::as_bool).unwrap_or(false);
            Some(AgentInboundFrame::OpenAndAttach { id, url, activate })
        }
        (None, Some("ping")) => Some(AgentInboundFrame::Ping),
        _ => Some(AgentInboundFrame::Ignored),
    }
}

/// Build a success response frame sent upstream by the agent.
pub fn agent_success_frame(id: u64, result: Value) -> Value {
    serde_json::json!({ "id": id, "result": result })
}

/// Build an error response frame sent upstream by the agent.
pub fn agent_error_frame(id: u64, message: impl Into<String>) -> Value {
    serde_json::json!({ "id": id, "error": message.into() })
}

/// Build a `forwardCDPEvent` frame sent upstream by the agent.
pub fn agent_event_frame(method: &str, session_id: Option<&str>, params: Value) -> Value {
    let mut inner = serde_json::json!({ "method": method, "params": params });
    if let Some(sid) = session_id {
        inner["sessionId"] = Value::String(sid.to_string());
    }
    serde_json::json!({ "method": "forwardCDPEvent", "params": inner })
}

/// Build a `pong` frame sent upstream by the agent in reply to a ping.
pub fn agent_pong_frame() -> Value {
    serde_json::json!({ "method": "pong" })
}
