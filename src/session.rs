use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::GatewayError;

/// Per-conversation lock serializing turns of one conversation.
pub type TurnLock = Arc<tokio::sync::Mutex<()>>;

/// Snapshot of one conversation's upstream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    pub conversation_id: String,
    /// Token returned by the previous turn, sent back on the next one.
    pub continuation_id: Option<String>,
    /// Generated at creation and never changed.
    pub upstream_token: String,
}

struct SessionEntry {
    session: ConversationSession,
    ephemeral: bool,
    turn_lock: TurnLock,
}

#[derive(Default)]
struct StoreInner {
    sessions: FxHashMap<String, SessionEntry>,
    explicit_count: usize,
}

/// In-memory conversation store.
///
/// Every operation takes the map lock once and never holds it across an
/// `.await`. State does not survive a restart.
pub struct SessionStore {
    inner: Mutex<StoreInner>,
    max_sessions: Option<usize>,
}

impl SessionStore {
    #[must_use]
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_sessions,
        }
    }

    /// Create a conversation that lives until the process exits.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Capacity` when `max_sessions` explicit
    /// conversations already exist.
    pub fn create(&self) -> Result<ConversationSession, GatewayError> {
        let mut inner = self.inner.lock();
        if let Some(max) = self.max_sessions {
            if inner.explicit_count >= max {
                return Err(GatewayError::Capacity(format!(
                    "conversation limit of {max} reached"
                )));
            }
        }
        let session = Self::insert_new(&mut inner, false);
        inner.explicit_count += 1;
        drop(inner);
        tracing::debug!(conversation_id = %session.conversation_id, "conversation created");
        Ok(session)
    }

    /// Create a conversation owned by one request. It is deleted when the
    /// returned guard is dropped.
    #[must_use]
    pub fn create_ephemeral(self: &Arc<Self>) -> EphemeralGuard {
        let session = Self::insert_new(&mut self.inner.lock(), true);
        tracing::debug!(conversation_id = %session.conversation_id, "ephemeral conversation created");
        EphemeralGuard {
            store: Arc::clone(self),
            session,
        }
    }

    fn insert_new(inner: &mut StoreInner, ephemeral: bool) -> ConversationSession {
        let session = ConversationSession {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            continuation_id: None,
            upstream_token: uuid::Uuid::new_v4().to_string(),
        };
        inner.sessions.insert(
            session.conversation_id.clone(),
            SessionEntry {
                session: session.clone(),
                ephemeral,
                turn_lock: TurnLock::default(),
            },
        );
        session
    }

    /// # Errors
    ///
    /// Returns `GatewayError::InvalidSession` for an unknown id.
    pub fn get(&self, conversation_id: &str) -> Result<ConversationSession, GatewayError> {
        self.inner
            .lock()
            .sessions
            .get(conversation_id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| GatewayError::InvalidSession(conversation_id.to_string()))
    }

    /// Lock handle for serializing turns on `conversation_id`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidSession` for an unknown id.
    pub fn turn_lock(&self, conversation_id: &str) -> Result<TurnLock, GatewayError> {
        self.inner
            .lock()
            .sessions
            .get(conversation_id)
            .map(|entry| Arc::clone(&entry.turn_lock))
            .ok_or_else(|| GatewayError::InvalidSession(conversation_id.to_string()))
    }

    /// Record the continuation id of a finished turn. Unknown ids are ignored.
    pub fn update(&self, conversation_id: &str, continuation_id: String) {
        if let Some(entry) = self.inner.lock().sessions.get_mut(conversation_id) {
            entry.session.continuation_id = Some(continuation_id);
        }
    }

    /// Remove a conversation; returns whether it existed.
    pub fn delete(&self, conversation_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.remove(conversation_id) {
            Some(entry) => {
                if !entry.ephemeral {
                    inner.explicit_count -= 1;
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, conversation_id: &str) -> bool {
        self.inner.lock().sessions.contains_key(conversation_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns an ephemeral conversation and deletes it on drop, whether the turn
/// succeeded, failed, or the client went away mid-stream.
pub struct EphemeralGuard {
    store: Arc<SessionStore>,
    session: ConversationSession,
}

impl EphemeralGuard {
    #[must_use]
    pub fn session(&self) -> &ConversationSession {
        &self.session
    }
}

impl Drop for EphemeralGuard {
    fn drop(&mut self) {
        if self.store.delete(&self.session.conversation_id) {
            tracing::debug!(
                conversation_id = %self.session.conversation_id,
                "ephemeral conversation removed"
            );
        }
    }
}
