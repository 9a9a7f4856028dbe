//! Tab/session bookkeeping for the extension-side agent.
//!
//! Mirrors the relay's `registry.rs` in shape (one `RwLock`-guarded map
//! per index, plain structs, no async), but keyed the other way round:
//! the agent's source of truth is the tab id, not the relay session id.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// One attached tab: its relay-minted session id and the browser's own
/// target id as of the last attach/navigation.
#[derive(Debug, Clone)]
pub struct TabBinding {
    pub tab_id: String,
    pub session_id: String,
    pub target_id: String,
}

/// Tracks attach state, session-id mappings, and pending-open tabs for
/// the extension's lifetime. `cb-tab-<N>` ids are minted from a single
/// monotonically increasing counter.
#[derive(Default)]
pub struct SessionIndex {
    next_n: AtomicU64,
    connecting: RwLock<HashSet<String>>,
    bindings: RwLock<HashMap<String, TabBinding>>,
    session_to_tab: RwLock<HashMap<String, String>>,
    child_to_tab: RwLock<HashMap<String, String>>,
    pending_open: RwLock<HashSet<String>>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint_session_id(&self) -> String {
        let n = self.next_n.fetch_add(1, Ordering::SeqCst) + 1;
        format!("cb-tab-{n}")
    }

    /// Enter the `connecting` state for `tab_id`. Returns `false` if the
    /// tab is already connecting or connected, refusing a reentrant
    /// attach.
    pub fn begin_connecting(&self, tab_id: &str) -> bool {
        if self.bindings.read().expect("session index lock poisoned").contains_key(tab_id) {
            return false;
        }
        self.connecting
            .write()
            .expect("session index lock poisoned")
            .insert(tab_id.to_string())
    }

    /// Leave the `connecting` state without having reached `connected`
    /// (attach failed).
    pub fn end_connecting(&self, tab_id: &str) {
        self.connecting.write().expect("session index lock poisoned").remove(tab_id);
    }

    pub fn bind(&self, binding: TabBinding) {
        self.connecting.write().expect("session index lock poisoned").remove(&binding.tab_id);
        self.session_to_tab
            .write()
            .expect("session index lock poisoned")
            .insert(binding.session_id.clone(), binding.tab_id.clone());
        self.bindings
            .write()
            .expect("session index lock poisoned")
            .insert(binding.tab_id.clone(), binding);
    }

    /// Drop the primary binding and any child sessions parented to this
    /// tab. Returns the dropped binding, if any.
    pub fn unbind(&self, tab_id: &str) -> Option<TabBinding> {
        self.connecting.write().expect("session index lock poisoned").remove(tab_id);
        let binding = self.bindings.write().expect("session index lock poisoned").remove(tab_id)?;
        self.session_to_tab
            .write()
            .expect("session index lock poisoned")
            .remove(&binding.session_id);
        self.child_to_tab
            .write()
            .expect("session index lock poisoned")
            .retain(|_, owner| owner != tab_id);
        Some(binding)
    }

    pub fn record_child(&self, child_session_id: String, tab_id: String) {
        self.child_to_tab
            .write()
            .expect("session index lock poisoned")
            .insert(child_session_id, tab_id);
    }

    pub fn remove_child(&self, child_session_id: &str) {
        self.child_to_tab.write().expect("session index lock poisoned").remove(child_session_id);
    }

    /// `true` if `session_id` is a recorded child session of `tab_id`.
    pub fn is_child_session_of(&self, tab_id: &str, session_id: &str) -> bool {
        self.child_to_tab
            .read()
            .expect("session index lock poisoned")
            .get(session_id)
            .is_some_and(|owner| owner == tab_id)
    }

    pub fn tab_for_session(&self, session_id: &str) -> Option<String> {
        self.session_to_tab
            .read()
            .expect("session index lock poisoned")
            .get(session_id)
            .cloned()
    }

    pub fn tab_for_child_session(&self, child_session_id: &str) -> Option<String> {
        self.child_to_tab
            .read()
            .expect("session index lock poisoned")
            .get(child_session_id)
            .cloned()
    }

    pub fn tab_for_target(&self, target_id: &str) -> Option<String> {
        self.bindings
            .read()
            .expect("session index lock poisoned")
            .values()
            .find(|b| b.target_id == target_id)
            .map(|b| b.tab_id.clone())
    }

    pub fn first_attached_tab(&self) -> Option<String> {
        self.bindings
            .read()
            .expect("session index lock poisoned")
            .keys()
            .next()
            .cloned()
    }

    pub fn binding_for(&self, tab_id: &str) -> Option<TabBinding> {
        self.bindings.read().expect("session index lock poisoned").get(tab_id).cloned()
    }

    pub fn is_attached(&self, tab_id: &str) -> bool {
        self.bindings.read().expect("session index lock poisoned").contains_key(tab_id)
    }

    pub fn mark_pending_open(&self, tab_id: &str) {
        self.pending_open
            .write()
            .expect("session index lock poisoned")
            .insert(tab_id.to_string());
    }

    pub fn unmark_pending_open(&self, tab_id: &str) {
        self.pending_open.write().expect("session index lock poisoned").remove(tab_id);
    }

    pub fn is_pending_open(&self, tab_id: &str) -> bool {
        self.pending_open.read().expect("session index lock poisoned").contains(tab_id)
    }

    pub fn attached_count(&self) -> usize {
        self.bindings.read().expect("session index lock poisoned").len()
    }
}
