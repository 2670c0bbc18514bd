//! Session registry: id → outbound handle, plus admission accounting.
//!
//! Concurrency note: admission uses lock-free atomics with an optimistic
//! increment/check pattern. Under extreme contention a brief overshoot of
//! the caps is possible before the counter corrects; that trade avoids a
//! global lock on the accept path.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use kairos_proto::types::caps;
use kairos_proto::{KairosError, Result};
use tokio::sync::mpsc;

/// Which transport a session arrived on. Doubles as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Local,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Local => "local",
        }
    }
}

/// One registered session's shared face: everything another thread may
/// need without touching the session task's private state.
pub struct SessionEntry {
    pub client_id: u32,
    pub transport: Transport,
    /// Peer key for per-address admission (IP for TCP, socket path for local).
    pub peer_key: String,
    /// Encoded frames to transmit; the session task owns the socket end.
    pub outbound: mpsc::Sender<Bytes>,
    /// Negotiated capability bitset, 0 until the handshake completes.
    pub capabilities: AtomicU32,
}

impl SessionEntry {
    /// Lossy send used for broadcasts; a slow consumer misses frames
    /// rather than stalling the sender.
    pub fn try_send(&self, frame: Bytes) -> bool {
        self.outbound.try_send(frame).is_ok()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u32, Arc<SessionEntry>>,
    peer_counts: DashMap<String, AtomicU32>,
    total: AtomicU32,
    next_client_id: AtomicU32,
    total_accepted: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            peer_counts: DashMap::new(),
            total: AtomicU32::new(0),
            // Client id 0 means "unassigned" on the wire.
            next_client_id: AtomicU32::new(1),
            total_accepted: AtomicU64::new(0),
        }
    }

    pub fn next_client_id(&self) -> u32 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve an admission slot for `peer_key`, enforcing the global and
    /// per-peer caps. The returned guard releases both counts on drop.
    pub fn admit(
        self: &Arc<Self>,
        peer_key: &str,
        max_total: u32,
        max_per_peer: u32,
    ) -> Result<AdmissionGuard> {
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        if total > max_total {
            self.total.fetch_sub(1, Ordering::AcqRel);
            return Err(KairosError::ResourceExhausted("session limit reached".into()));
        }

        let per_peer = self
            .peer_counts
            .entry(peer_key.to_owned())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::AcqRel)
            + 1;
        if max_per_peer > 0 && per_peer > max_per_peer {
            self.release_counts(peer_key);
            return Err(KairosError::ResourceExhausted(format!(
                "per-peer session limit reached for {peer_key}"
            )));
        }

        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        Ok(AdmissionGuard { registry: Arc::clone(self), peer_key: peer_key.to_owned() })
    }

    fn release_counts(&self, peer_key: &str) {
        self.total.fetch_sub(1, Ordering::AcqRel);
        if let Some(count) = self.peer_counts.get(peer_key) {
            if count.fetch_sub(1, Ordering::AcqRel) == 1 {
                drop(count);
                // Remove only when still zero; a racing admit re-creates it.
                self.peer_counts
                    .remove_if(peer_key, |_, c| c.load(Ordering::Acquire) == 0);
            }
        }
    }

    pub fn register(&self, entry: Arc<SessionEntry>) {
        self.sessions.insert(entry.client_id, entry);
    }

    pub fn unregister(&self, client_id: u32) {
        self.sessions.remove(&client_id);
    }

    pub fn get(&self, client_id: u32) -> Option<Arc<SessionEntry>> {
        self.sessions.get(&client_id).map(|e| Arc::clone(e.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    /// Best-effort broadcast of one encoded frame to every session.
    ///
    /// `send_to_layer` routes through here as well: the wire protocol has
    /// no layer-subscription message, so per-layer delivery degenerates to
    /// a broadcast until clients can express interest.
    pub fn broadcast(&self, frame: &Bytes) -> usize {
        let mut sent = 0;
        for entry in self.sessions.iter() {
            if entry.try_send(frame.clone()) {
                sent += 1;
            }
        }
        sent
    }

    /// Broadcast restricted to sessions that negotiated a capability bit.
    pub fn broadcast_capable(&self, frame: &Bytes, capability: u32) -> usize {
        let mut sent = 0;
        for entry in self.sessions.iter() {
            if entry.capabilities.load(Ordering::Relaxed) & capability != 0
                && entry.try_send(frame.clone())
            {
                sent += 1;
            }
        }
        sent
    }

    /// Broadcast a frame-callback payload to interested clients.
    pub fn broadcast_frame_callback(&self, frame: &Bytes) -> usize {
        self.broadcast_capable(frame, caps::FRAME_CALLBACKS)
    }
}

/// RAII admission slot; returned by [`SessionRegistry::admit`].
pub struct AdmissionGuard {
    registry: Arc<SessionRegistry>,
    peer_key: String,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.registry.release_counts(&self.peer_key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(client_id: u32, tx: mpsc::Sender<Bytes>) -> Arc<SessionEntry> {
        Arc::new(SessionEntry {
            client_id,
            transport: Transport::Tcp,
            peer_key: "127.0.0.1".into(),
            outbound: tx,
            capabilities: AtomicU32::new(0),
        })
    }

    #[test]
    fn admission_caps_enforced() {
        let reg = Arc::new(SessionRegistry::new());
        let a = reg.admit("10.0.0.1", 2, 10).unwrap();
        let _b = reg.admit("10.0.0.2", 2, 10).unwrap();
        assert!(reg.admit("10.0.0.3", 2, 10).is_err());

        drop(a);
        assert!(reg.admit("10.0.0.3", 2, 10).is_ok());
    }

    #[test]
    fn per_peer_cap_enforced() {
        let reg = Arc::new(SessionRegistry::new());
        let _a = reg.admit("10.0.0.1", 100, 2).unwrap();
        let _b = reg.admit("10.0.0.1", 100, 2).unwrap();
        assert!(reg.admit("10.0.0.1", 100, 2).is_err());
        assert!(reg.admit("10.0.0.2", 100, 2).is_ok());
    }

    #[tokio::test]
    async fn broadcast_respects_capabilities() {
        let reg = SessionRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let e1 = entry(1, tx1);
        e1.capabilities.store(caps::FRAME_CALLBACKS, Ordering::Relaxed);
        let e2 = entry(2, tx2);
        reg.register(e1);
        reg.register(e2);

        let sent = reg.broadcast_frame_callback(&Bytes::from_static(b"f"));
        assert_eq!(sent, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn client_ids_are_dense_and_nonzero() {
        let reg = SessionRegistry::new();
        assert_eq!(reg.next_client_id(), 1);
        assert_eq!(reg.next_client_id(), 2);
    }
}
