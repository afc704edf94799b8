use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_core::types::PushEnvelope;
use pulse_engine::traits::PushSink;
use pulse_telemetry::metrics::{self, Labels};

/// One open push channel for a connected recipient.
///
/// The registry holds both channel ends: the sender for delivery and a
/// receiver clone so overflow can evict the oldest undelivered payload.
/// The transport reads from the [`SessionHandle`]'s end and must
/// `unregister` when the connection closes.
struct SessionEntry {
    id: Uuid,
    tx: flume::Sender<PushEnvelope>,
    rx: flume::Receiver<PushEnvelope>,
}

/// Consumer side of a registered session, owned by the push transport.
pub struct SessionHandle {
    id: Uuid,
    user_id: i64,
    rx: flume::Receiver<PushEnvelope>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Await the next payload queued for this session.
    pub async fn recv(&self) -> Option<PushEnvelope> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking read, `None` when the buffer is empty.
    pub fn try_recv(&self) -> Option<PushEnvelope> {
        self.rx.try_recv().ok()
    }
}

/// Connected-recipient registry with bounded per-session buffers.
///
/// The map is sharded internally, so register/unregister/deliver for one
/// user serialize on that user's shard entry without a global lock. A
/// session whose buffer fills drops its oldest undelivered payload;
/// back-pressure never reaches the notification insert path.
pub struct SessionRegistry {
    sessions: DashMap<i64, Vec<SessionEntry>>,
    buffer_capacity: usize,
    dropped: AtomicU64,
}

impl SessionRegistry {
    /// `buffer_capacity` is the per-session payload budget (config
    /// default 64).
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            buffer_capacity: buffer_capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new session for the user and hand back its consumer end.
    pub fn register(&self, user_id: i64) -> SessionHandle {
        let (tx, rx) = flume::bounded(self.buffer_capacity);
        let id = Uuid::new_v4();
        self.sessions.entry(user_id).or_default().push(SessionEntry {
            id,
            tx,
            rx: rx.clone(),
        });
        debug!(user_id, session_id = %id, "session registered");
        SessionHandle { id, user_id, rx }
    }

    /// Remove one session. Returns `false` when it was already gone.
    pub fn unregister(&self, user_id: i64, session_id: Uuid) -> bool {
        let removed = match self.sessions.get_mut(&user_id) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|s| s.id != session_id);
                before != entry.len()
            }
            None => false,
        };
        // Drop the user's key once the last session is gone, so
        // `is_online` stays an existence check.
        self.sessions
            .remove_if(&user_id, |_, sessions| sessions.is_empty());
        if removed {
            debug!(user_id, session_id = %session_id, "session unregistered");
        }
        removed
    }

    /// Open sessions for one user.
    pub fn session_count(&self, user_id: i64) -> usize {
        self.sessions.get(&user_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Total payloads dropped to overflow since startup.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn queue_for_session(&self, user_id: i64, session: &SessionEntry, envelope: PushEnvelope) -> bool {
        match session.tx.try_send(envelope) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(envelope)) => {
                // Bounded buffer: evict the oldest undelivered payload,
                // then queue the new one.
                let _ = session.rx.try_recv();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::global().inc(metrics::PUSH_DROPPED_TOTAL, Labels::empty());
                warn!(
                    user_id,
                    session_id = %session.id,
                    "session buffer full, dropped oldest payload"
                );
                session.tx.try_send(envelope).is_ok()
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        }
    }
}

impl PushSink for SessionRegistry {
    fn is_online(&self, user_id: i64) -> bool {
        self.sessions
            .get(&user_id)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    fn deliver(&self, user_id: i64, envelope: PushEnvelope) -> usize {
        let Some(sessions) = self.sessions.get(&user_id) else {
            return 0;
        };
        let mut queued = 0;
        for session in sessions.iter() {
            if self.queue_for_session(user_id, session, envelope.clone()) {
                queued += 1;
            }
        }
        if queued > 0 {
            metrics::global().inc_by(
                metrics::PUSH_DELIVERED_TOTAL,
                Labels::empty(),
                queued as u64,
            );
        }
        queued
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
