//! The router: the heart of the relay.
//!
//! Classifies each inbound CDP command by method and either answers it
//! synthetically from the registry, or forwards it to the extension
//! link. Also folds inbound `forwardCDPEvent` frames from the extension
//! into registry updates and CDP-client broadcasts.

use crate::client_pool::ClientPool;
use crate::error::Error;
use crate::extension_link::ExtensionLinkSlot;
use crate::registry::{AttachOutcome, TargetRegistry};
use crate::wire::{cdp_error_frame, cdp_event_frame, cdp_success_frame, CdpCommandFrame};
use phf::phf_map;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Methods the router answers without a round trip to the extension.
/// A `phf::Map` gives O(1) static dispatch.
#[derive(Debug, Clone, Copy)]
enum LocalMethod {
    BrowserGetVersion,
    BrowserSetDownloadBehavior,
    TargetSetAutoAttach,
    TargetSetDiscoverTargets,
    TargetGetTargets,
    TargetGetTargetInfo,
    TargetAttachToTarget,
}

static LOCAL_METHODS: phf::Map<&'static str, LocalMethod> = phf_map! {
    "Browser.getVersion" => LocalMethod::BrowserGetVersion,
    "Browser.setDownloadBehavior" => LocalMethod::BrowserSetDownloadBehavior,
    "Target.setAutoAttach" => LocalMethod::TargetSetAutoAttach,
    "Target.setDiscoverTargets" => LocalMethod::TargetSetDiscoverTargets,
    "Target.getTargets" => LocalMethod::TargetGetTargets,
    "Target.getTargetInfo" => LocalMethod::TargetGetTargetInfo,
    "Target.attachToTarget" => LocalMethod::TargetAttachToTarget,
};

const RELAY_PRODUCT: &str = "CDP-Relay/1.0";

pub struct Router {
    registry: Arc<TargetRegistry>,
    extension: Arc<ExtensionLinkSlot>,
    clients: Arc<ClientPool>,
    default_timeout: Duration,
}

impl Router {
    pub fn new(
        registry: Arc<TargetRegistry>,
        extension: Arc<ExtensionLinkSlot>,
        clients: Arc<ClientPool>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            extension,
            clients,
            default_timeout,
        }
    }

    /// Handle one inbound CDP command from `peer`, sending its response
    /// (and any replay events) directly to that peer's mailbox.
    pub async fn handle_command(&self, peer: Uuid, cmd: CdpCommandFrame) {
        let session_id = cmd.session_id.clone();
        match self.dispatch(peer, &cmd).await {
            Ok(result) => {
                self.clients
                    .send_to(peer, cdp_success_frame(cmd.id, session_id.as_deref(), result));
                self.replay_for(peer, &cmd);
            }
            Err(err) => {
                debug!(method = %cmd.method, error = %err, "command failed");
                self.clients.send_to(
                    peer,
                    cdp_error_frame(cmd.id, session_id.as_deref(), err.client_message()),
                );
            }
        }
    }

    async fn dispatch(&self, peer: Uuid, cmd: &CdpCommandFrame) -> Result<Value, Error> {
        if let Some(local) = LOCAL_METHODS.get(cmd.method.as_str()) {
            return self.dispatch_local(*local, peer, cmd);
        }
        self.forward(&cmd.method, cmd.session_id.clone(), cmd.params.clone()).await
    }

    fn dispatch_local(&self, local: LocalMethod, peer: Uuid, cmd: &CdpCommandFrame) -> Result<Value, Error> {
        match local {
            LocalMethod::BrowserGetVersion => Ok(json!({
                "protocolVersion": "1.3",
                "product": RELAY_PRODUCT,
                "revision": "1.0.0",
                "userAgent": RELAY_PRODUCT,
                "jsVersion": "n/a",
            })),
            LocalMethod::BrowserSetDownloadBehavior => Ok(json!({})),
            LocalMethod::TargetSetAutoAttach => Ok(json!({})),
            LocalMethod::TargetSetDiscoverTargets => Ok(json!({})),
            LocalMethod::TargetGetTargets => {
                let infos: Vec<Value> = self
                    .registry
                    .list()
                    .into_iter()
                    .map(|t| {
                        let mut info = t.target_info;
                        if let Some(obj) = info.as_object_mut() {
                            obj.insert("attached".to_string(), Value::Bool(true));
                        }
                        info
                    })
                    .collect();
                Ok(json!({ "targetInfos": infos }))
            }
            LocalMethod::TargetGetTargetInfo => {
                let by_param = cmd
                    .params
                    .get("targetId")
                    .and_then(Value::as_str)
                    .and_then(|id| self.registry.get_by_target(id));
                let by_session = cmd
                    .session_id
                    .as_deref()
                    .and_then(|sid| self.registry.get_by_session(sid));
                let resolved = by_param.or(by_session).or_else(|| self.registry.first());
                match resolved {
                    Some(target) => Ok(json!({ "targetInfo": target.target_info })),
                    None => Err(Error::unknown_target("no attached targets")),
                }
            }
            LocalMethod::TargetAttachToTarget => {
                let target_id = cmd
                    .params
                    .get("targetId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_params("targetId is required"))?;
                let target = self
                    .registry
                    .get_by_target(target_id)
                    .ok_or_else(|| Error::unknown_target(target_id))?;
                self.clients.send_to(
                    peer,
                    cdp_event_frame(
                        "Target.attachedToTarget",
                        None,
                        json!({
                            "sessionId": target.session_id,
                            "targetInfo": target.target_info,
                            "waitingForDebugger": false,
                        }),
                    ),
                );
                Ok(json!({ "sessionId": target.session_id }))
            }
        }
    }

    /// Forward a command to the extension-side agent over the extension
    /// link.
    async fn forward(&self, method: &str, session_id: Option<String>, params: Value) -> Result<Value, Error> {
        let link = self.extension.get().ok_or(Error::NoExtension)?;
        let params = if params.is_null() { None } else { Some(params) };
        link.forward_cdp_command(method, session_id, params, self.default_timeout)
            .await
    }

    /// Replay synthetic target notifications triggered by a just-handled
    /// command: exactly-once per subscribing call, to the originating
    /// client only.
    fn replay_for(&self, peer: Uuid, cmd: &CdpCommandFrame) {
        if cmd.method == "Target.setAutoAttach" && cmd.session_id.is_none() {
            for target in self.registry.list() {
                self.clients.send_to(
                    peer,
                    cdp_event_frame(
                        "Target.attachedToTarget",
                        None,
                        json!({
                            "sessionId": target.session_id,
                            "targetInfo": target.target_info,
                            "waitingForDebugger": false,
                        }),
                    ),
                );
            }
        }

        if cmd.method == "Target.setDiscoverTargets"
            && cmd.params.get("discover").and_then(Value::as_bool).unwrap_or(false)
        {
            for target in self.registry.list() {
                self.clients.send_to(
                    peer,
                    cdp_event_frame(
                        "Target.targetCreated",
                        None,
                        json!({ "targetInfo": target.target_info }),
                    ),
                );
            }
        }
    }

    /// Fold an inbound `forwardCDPEvent` from the extension into the
    /// registry and the CDP-client broadcast.
    pub fn handle_extension_event(&self, method: &str, session_id: Option<String>, params: Value) {
        match method {
            "Target.attachedToTarget" => self.handle_attached_to_target(session_id, params),
            "Target.detachedFromTarget" => self.handle_detached_from_target(session_id, params),
            "Target.targetInfoChanged" => self.handle_target_info_changed(params),
            _ => {
                self.clients
                    .broadcast(cdp_event_frame(method, session_id.as_deref(), params));
            }
        }
    }

    fn handle_attached_to_target(&self, session_id: Option<String>, params: Value) {
        let Some(session_id) = session_id else {
            warn!("Target.attachedToTarget missing sessionId");
            return;
        };
        let target_info = params.get("targetInfo").cloned().unwrap_or(Value::Null);
        let target_type = target_info.get("type").and_then(Value::as_str).unwrap_or("");
        if target_type != "page" {
            return;
        }
        let Some(target_id) = target_info.get("targetId").and_then(Value::as_str).map(str::to_string) else {
            warn!("Target.attachedToTarget missing targetId");
            return;
        };

        match self.registry.attach(session_id.clone(), target_id.clone(), target_info.clone()) {
            AttachOutcome::Inserted(_) => {
                self.clients.broadcast(cdp_event_frame(
                    "Target.attachedToTarget",
                    None,
                    json!({
                        "sessionId": session_id,
                        "targetInfo": target_info,
                        "waitingForDebugger": params.get("waitingForDebugger").cloned().unwrap_or(Value::Bool(false)),
                    }),
                ));
            }
            AttachOutcome::Replaced { stale_target_id, new } => {
                // Synthesize the detach for the stale target before the new attach.
                self.clients.broadcast(cdp_event_frame(
                    "Target.detachedFromTarget",
                    None,
                    json!({ "sessionId": session_id, "targetId": stale_target_id }),
                ));
                self.clients.broadcast(cdp_event_frame(
                    "Target.attachedToTarget",
                    None,
                    json!({
                        "sessionId": new.session_id,
                        "targetInfo": new.target_info,
                        "waitingForDebugger": false,
                    }),
                ));
            }
        }
    }

    fn handle_detached_from_target(&self, session_id: Option<String>, params: Value) {
        let Some(session_id) = session_id else { return };
        if self.registry.detach(&session_id).is_some() {
            self.clients.broadcast(cdp_event_frame(
                "Target.detachedFromTarget",
                None,
                json!({ "sessionId": session_id, "reason": params.get("reason").cloned().unwrap_or(Value::Null) }),
            ));
        }
    }

    fn handle_target_info_changed(&self, params: Value) {
        let Some(target_info) = params.get("targetInfo").cloned() else { return };
        let Some(target_id) = target_info.get("targetId").and_then(Value::as_str) else { return };
        self.registry.update_target_info(target_id, target_info.clone());
        self.clients.broadcast(cdp_event_frame(
            "Target.targetInfoChanged",
            None,
            json!({ "targetInfo": target_info }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_cdp_command;

    fn make_router() -> (Router, Arc<TargetRegistry>, Arc<ClientPool>) {
        let registry = Arc::new(TargetRegistry::new());
        let extension = Arc::new(ExtensionLinkSlot::new());
        let clients = Arc::new(ClientPool::new());
        let router = Router::new(
            registry.clone(),
            extension,
            clients.clone(),
            Duration::from_secs(1),
        );
        (router, registry, clients)
    }

    #[tokio::test]
    async fn browser_get_version_is_served_locally() {
        let (router, _registry, clients) = make_router();
        let (peer, mut rx, _ctrl) = clients.register();
        let cmd = decode_cdp_command(r#"{"id":1,"method":"Browser.getVersion"}"#).unwrap();
        router.handle_command(peer, cmd).await;
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp["result"]["protocolVersion"], "1.3");
    }

    #[tokio::test]
    async fn get_targets_reflects_registry_with_attached_true() {
        let (router, registry, clients) = make_router();
        registry.attach("s1".into(), "t1".into(), json!({"targetId": "t1", "type": "page"}));
        let (peer, mut rx, _ctrl) = clients.register();
        let cmd = decode_cdp_command(r#"{"id":2,"method":"Target.getTargets"}"#).unwrap();
        router.handle_command(peer, cmd).await;
        let resp = rx.recv().await.unwrap();
        let infos = resp["result"]["targetInfos"].as_array().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0]["attached"], true);
    }

    #[tokio::test]
    async fn attach_to_unknown_target_is_an_error() {
        let (router, _registry, clients) = make_router();
        let (peer, mut rx, _ctrl) = clients.register();
        let cmd =
            decode_cdp_command(r#"{"id":3,"method":"Target.attachToTarget","params":{"targetId":"missing"}}"#)
                .unwrap();
        router.handle_command(peer, cmd).await;
        let resp = rx.recv().await.unwrap();
        assert!(resp.get("error").is_some());
    }

    #[tokio::test]
    async fn attach_to_target_returns_session_and_emits_attach_event_to_caller_only() {
        let (router, registry, clients) = make_router();
        registry.attach("s1".into(), "t1".into(), json!({"targetId": "t1", "type": "page"}));
        let (peer, mut rx, _ctrl) = clients.register();
        let (other, mut other_rx, _other_ctrl) = clients.register();
        let cmd =
            decode_cdp_command(r#"{"id":4,"method":"Target.attachToTarget","params":{"targetId":"t1"}}"#).unwrap();
        router.handle_command(peer, cmd).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event["method"], "Target.attachedToTarget");
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp["result"]["sessionId"], "s1");
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn set_auto_attach_replays_existing_targets_once_to_caller_only() {
        let (router, registry, clients) = make_router();
        registry.attach("s1".into(), "t1".into(), json!({"targetId": "t1", "type": "page"}));
        let (peer, mut rx, _ctrl) = clients.register();
        let (_other, mut other_rx, _other_ctrl) = clients.register();
        let cmd = decode_cdp_command(r#"{"id":5,"method":"Target.setAutoAttach","params":{"autoAttach":true}}"#)
            .unwrap();
        router.handle_command(peer, cmd).await;

        let resp = rx.recv().await.unwrap();
        assert_eq!(resp["result"], json!({}));
        let replay = rx.recv().await.unwrap();
        assert_eq!(replay["method"], "Target.attachedToTarget");
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_extension_link_fails_forwarded_commands() {
        let (router, _registry, clients) = make_router();
        let (peer, mut rx, _ctrl) = clients.register();
        let cmd = decode_cdp_command(r#"{"id":6,"method":"Page.navigate","params":{"url":"https://x"}}"#).unwrap();
        router.handle_command(peer, cmd).await;
        let resp = rx.recv().await.unwrap();
        assert_eq!(resp["error"]["message"], "Extension not connected");
    }

    #[test]
    fn navigation_across_origins_emits_detach_then_attach() {
        let (router, registry, clients) = make_router();
        registry.attach("s3".into(), "t-a".into(), json!({"targetId": "t-a", "type": "page"}));
        let (_peer, mut rx, _ctrl) = clients.register();
        router.handle_extension_event(
            "Target.attachedToTarget",
            Some("s3".into()),
            json!({"targetInfo": {"targetId": "t-b", "type": "page"}}),
        );
        let first = rx.try_recv().unwrap();
        assert_eq!(first["method"], "Target.detachedFromTarget");
        assert_eq!(first["params"]["targetId"], "t-a");
        let second = rx.try_recv().unwrap();
        assert_eq!(second["method"], "Target.attachedToTarget");
        assert_eq!(second["params"]["targetInfo"]["targetId"], "t-b");
        assert_eq!(registry.get_by_session("s3").unwrap().target_id, "t-b");
    }
}
