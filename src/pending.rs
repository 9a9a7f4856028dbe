//! Pending relay->extension calls.
//!
//! Correlates a numeric id to a one-shot completion with a deadline, so
//! the completion carries the relay's own outcome type rather than a
//! CDP-specific response.

use crate::error::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Outcome of a call delivered to a waiter.
#[derive(Debug)]
pub enum CallOutcome {
    /// The extension responded with a `result`.
    Success(Value),
    /// The extension responded with a non-empty `error`.
    UpstreamError(String),
    /// The extension link was lost before a response arrived.
    LinkLost,
}

/// A single outstanding call, waiting on the extension's response frame.
struct PendingCall {
    sender: oneshot::Sender<CallOutcome>,
}

/// Map of outstanding relay->extension calls, keyed by numeric id.
///
/// Id allocation is atomic; ids are strictly monotonically increasing
/// and never repeat within a link's lifetime.
pub struct PendingCallTable {
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl Default for PendingCallTable {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a pending call under `id`, returning the receiver half.
    pub fn register(&self, id: u64) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.calls
            .lock()
            .expect("pending call table lock poisoned")
            .insert(id, PendingCall { sender: tx });
        rx
    }

    /// Resolve a pending call by id with the extension's response.
    ///
    /// Every response frame's id is expected to match exactly one
    /// outstanding call; anything else is dropped silently. Returns
    /// `true` if a pending call was found.
    pub fn resolve(&self, id: u64, result: Option<Value>, error: Option<String>) -> bool {
        let entry = self
            .calls
            .lock()
            .expect("pending call table lock poisoned")
            .remove(&id);
        match entry {
            Some(pending) => {
                let outcome = match error {
                    Some(message) => CallOutcome::UpstreamError(message),
                    None => CallOutcome::Success(result.unwrap_or(Value::Null)),
                };
                let _ = pending.sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove a call that timed out so a late response doesn't resurrect it.
    pub fn remove(&self, id: u64) {
        self.calls
            .lock()
            .expect("pending call table lock poisoned")
            .remove(&id);
    }

    /// Fail every outstanding call (extension link lost), draining the
    /// table. Must be empty immediately after.
    pub fn fail_all(&self) {
        let mut calls = self.calls.lock().expect("pending call table lock poisoned");
        for (_, pending) in calls.drain() {
            let _ = pending.sender.send(CallOutcome::LinkLost);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().expect("pending call table lock poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().expect("pending call table lock poisoned").len()
    }
}

/// Await a pending call's completion with the given deadline, translating
/// timeout/drop into the relay's error taxonomy.
pub async fn await_pending(
    rx: oneshot::Receiver<CallOutcome>,
    timeout: Duration,
    method: &str,
) -> Result<Value, Error> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(CallOutcome::Success(value))) => Ok(value),
        Ok(Ok(CallOutcome::UpstreamError(message))) => Err(Error::upstream_error(message)),
        Ok(Ok(CallOutcome::LinkLost)) | Ok(Err(_)) => Err(Error::ExtensionDisconnected),
        Err(_) => Err(Error::upstream_timeout(format!("{method} timed out"))),
    }
}
