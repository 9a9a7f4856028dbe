//! Target registry.
//!
//! The single source of truth for what CDP clients see as "known
//! targets". Holds only page-type targets currently attached via the
//! extension's debugger; eventually consistent with the real browser
//! (never ahead of it).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// One attached page target, keyed by its relay session-id.
#[derive(Debug, Clone)]
pub struct ConnectedTarget {
    pub session_id: String,
    pub target_id: String,
    pub target_info: Value,
}

/// Outcome of inserting/updating an attach event, telling the caller
/// what (if anything) needs to be broadcast to CDP clients.
#[derive(Debug, Clone)]
pub enum AttachOutcome {
    /// Brand new session-id; emit `attachedToTarget` for it.
    Inserted(ConnectedTarget),
    /// Same session-id, new target-id (cross-origin navigation): emit a
    /// synthetic `detachedFromTarget` for `stale_target_id` first, then
    /// `attachedToTarget` for the new entry.
    Replaced {
        stale_target_id: String,
        new: ConnectedTarget,
    },
}

/// The relay-side target registry.
#[derive(Default)]
pub struct TargetRegistry {
    by_session: RwLock<HashMap<String, ConnectedTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle an inbound `Target.attachedToTarget` event for a `page`
    /// target. Callers filter non-page target types before calling this.
    pub fn attach(&self, session_id: String, target_id: String, target_info: Value) -> AttachOutcome {
        let new = ConnectedTarget {
            session_id: session_id.clone(),
            target_id: target_id.clone(),
            target_info,
        };

        let mut map = self.by_session.write().expect("registry lock poisoned");
        match map.insert(session_id, new.clone()) {
            Some(prev) if prev.target_id != target_id => AttachOutcome::Replaced {
                stale_target_id: prev.target_id,
                new,
            },
            _ => AttachOutcome::Inserted(new),
        }
    }

    /// Handle an inbound `Target.targetInfoChanged` event: merge fields
    /// for any entry whose target-id matches.
    pub fn update_target_info(&self, target_id: &str, target_info: Value) {
        let mut map = self.by_session.write().expect("registry lock poisoned");
        for entry in map.values_mut() {
            if entry.target_id == target_id {
                entry.target_info = target_info;
                return;
            }
        }
    }

    /// Handle an inbound `Target.detachedFromTarget` event.
    pub fn detach(&self, session_id: &str) -> Option<ConnectedTarget> {
        self.by_session
            .write()
            .expect("registry lock poisoned")
            .remove(session_id)
    }

    /// Snapshot of every attached target, for subscription replay and
    /// `Target.getTargets`.
    pub fn list(&self) -> Vec<ConnectedTarget> {
        self.by_session
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get_by_session(&self, session_id: &str) -> Option<ConnectedTarget> {
        self.by_session
            .read()
            .expect("registry lock poisoned")
            .get(session_id)
            .cloned()
    }

    pub fn get_by_target(&self, target_id: &str) -> Option<ConnectedTarget> {
        self.by_session
            .read()
            .expect("registry lock poisoned")
            .values()
            .find(|t| t.target_id == target_id)
            .cloned()
    }

    /// First registry entry in iteration order; used by the
    /// `Target.getTargetInfo` fallback (see DESIGN.md Open Question).
    pub fn first(&self) -> Option<ConnectedTarget> {
        self.by_session
            .read()
            .expect("registry lock poisoned")
            .values()
            .next()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_session.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry (extension link lost).
    pub fn clear(&self) {
        self.by_session.write().expect("registry lock poisoned").clear();
    }
}
