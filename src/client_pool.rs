//! CDP client pool.
//!
//! Each accepted CDP peer gets a bounded outbound mailbox; broadcast is
//! snapshot-then-iterate, and a peer whose mailbox is full is dropped
//! rather than buffered. Adapted from a single `tokio::sync::broadcast`
//! topic to per-peer bounded mailboxes because the relay needs addressed
//! sends (a response only its author should see) as well as broadcasts.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Bound on a peer's outbound mailbox before it is dropped.
const MAILBOX_CAPACITY: usize = 256;

/// Instructs a peer's write task to close the socket with a specific code:
/// extension link loss or clean shutdown use different codes/reasons.
#[derive(Debug, Clone, Copy)]
pub struct ClosePeer {
    pub code: u16,
    pub reason: &'static str,
}

struct Peer {
    tx: mpsc::Sender<Value>,
    control: mpsc::Sender<ClosePeer>,
}

/// The set of currently-connected CDP client peers.
#[derive(Default)]
pub struct ClientPool {
    peers: RwLock<HashMap<Uuid, Peer>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly-accepted peer, returning its id, the receiver half
    /// its write task should drain for outbound frames, and the receiver
    /// half it should race against for an out-of-band close instruction.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<Value>, mpsc::Receiver<ClosePeer>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(1);
        self.peers.write().expect("client pool lock poisoned").insert(
            id,
            Peer {
                tx,
                control: control_tx,
            },
        );
        (id, rx, control_rx)
    }

    /// Unregister a peer (socket closed, mailbox overflowed).
    pub fn unregister(&self, id: Uuid) {
        self.peers.write().expect("client pool lock poisoned").remove(&id);
    }

    /// Send a frame addressed to a single peer. Drops the peer if its
    /// mailbox is full or closed.
    pub fn send_to(&self, id: Uuid, frame: Value) {
        let tx = self
            .peers
            .read()
            .expect("client pool lock poisoned")
            .get(&id)
            .map(|p| p.tx.clone());
        let Some(tx) = tx else { return };
        if tx.try_send(frame).is_err() {
            warn!(peer = %id, "outbound mailbox full or closed, dropping peer");
            self.unregister(id);
        }
    }

    /// Broadcast a frame to every connected peer (snapshot-then-iterate).
    pub fn broadcast(&self, frame: Value) {
        let snapshot: Vec<(Uuid, mpsc::Sender<Value>)> = self
            .peers
            .read()
            .expect("client pool lock poisoned")
            .iter()
            .map(|(id, peer)| (*id, peer.tx.clone()))
            .collect();

        for (id, tx) in snapshot {
            if tx.try_send(frame.clone()).is_err() {
                warn!(peer = %id, "outbound mailbox full or closed, dropping peer");
                self.unregister(id);
            }
        }
    }

    /// Close every connected peer with `code`/`reason` and forget them.
    /// Used on extension link loss (1011-class, "extension disconnected")
    /// and on clean shutdown (1001 going-away).
    pub fn close_all(&self, code: u16, reason: &'static str) {
        let snapshot: Vec<(Uuid, mpsc::Sender<ClosePeer>)> = {
            let mut peers = self.peers.write().expect("client pool lock poisoned");
            peers
                .drain()
                .map(|(id, peer)| (id, peer.control))
                .collect()
        };
        for (id, control) in snapshot {
            if control.try_send(ClosePeer { code, reason }).is_err() {
                warn!(peer = %id, "failed to signal close to peer write task");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("client pool lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_to_delivers_only_to_addressed_peer() {
        let pool = ClientPool::new();
        let (a, mut a_rx, _a_ctrl) = pool.register();
        let (_b, mut b_rx, _b_ctrl) = pool.register();

        pool.send_to(a, json!({"hello": "a"}));
        assert_eq!(a_rx.recv().await.unwrap()["hello"], "a");
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let pool = ClientPool::new();
        let (_a, mut a_rx, _a_ctrl) = pool.register();
        let (_b, mut b_rx, _b_ctrl) = pool.register();

        pool.broadcast(json!({"method": "Target.detachedFromTarget"}));
        assert!(a_rx.recv().await.is_some());
        assert!(b_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn unregister_removes_from_subsequent_broadcasts() {
        let pool = ClientPool::new();
        let (a, _a_rx, _a_ctrl) = pool.register();
        pool.unregister(a);
        assert_eq!(pool.len(), 0);
        // Broadcasting after unregister must not panic even though the
        // receiver has been dropped.
        pool.broadcast(json!({}));
    }

    #[tokio::test]
    async fn close_all_signals_every_peer_and_clears_the_pool() {
        let pool = ClientPool::new();
        let (_a, _a_rx, mut a_ctrl) = pool.register();
        let (_b, _b_rx, mut b_ctrl) = pool.register();

        pool.close_all(1011, "extension disconnected");

        assert_eq!(a_ctrl.recv().await.unwrap().code, 1011);
        assert_eq!(b_ctrl.recv().await.unwrap().code, 1011);
        assert_eq!(pool.len(), 0);
    }
}
