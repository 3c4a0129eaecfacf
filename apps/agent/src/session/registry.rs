//! Which devices have a session right now.
//!
//! The registry is the only owner of the device → session mapping. Every operation takes the lock
//! for a single map access and does no I/O while holding it.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::SessionState;
use crate::device::DeviceId;
use crate::ignore_poison::IgnorePoison;
use crate::transfer::CancellationToken;

/// The registry's record of one active session, shared with the session itself.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub token: CancellationToken,
    /// Distinguishes this session from a later one for the same device
    pub session_id: Uuid,
    pub started_at: DateTime<Local>,
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            session_id: Uuid::new_v4(),
            started_at: Local::now(),
            state: Arc::new(Mutex::new(SessionState::Created)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock_ignore_poison()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock_ignore_poison() = state;
    }
}

/// Point-in-time view of a session, for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub device_id: DeviceId,
    pub session_id: String,
    pub state: SessionState,
    pub started_at: String,
    pub cancelled: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<DeviceId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for `id` unless one is already active. Check and insert happen
    /// under one lock, so of two racing callers exactly one gets `Some`.
    pub fn try_register(&self, id: &DeviceId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock_ignore_poison();
        if sessions.contains_key(id) {
            return None;
        }
        let handle = SessionHandle::new();
        sessions.insert(id.clone(), handle.clone());
        Some(handle)
    }

    pub fn get(&self, id: &DeviceId) -> Option<SessionInfo> {
        let handle = self.sessions.lock_ignore_poison().get(id).cloned()?;
        Some(SessionInfo {
            device_id: id.clone(),
            session_id: handle.session_id.to_string(),
            state: handle.state(),
            started_at: handle.started_at.to_rfc3339(),
            cancelled: handle.token.is_cancelled(),
        })
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.sessions.lock_ignore_poison().contains_key(id)
    }

    /// Removes whatever session is registered for `id`.
    pub fn unregister(&self, id: &DeviceId) -> Option<SessionHandle> {
        self.sessions.lock_ignore_poison().remove(id)
    }

    /// Removes the entry for `id` only if it still belongs to `handle`'s session. A finishing
    /// session uses this so it can't evict a newer session registered after a detach.
    pub fn release(&self, id: &DeviceId, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.lock_ignore_poison();
        match sessions.get(id) {
            Some(current) if current.session_id == handle.session_id => {
                sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Flips the cancellation token for `id`. Returns false if no session is registered.
    pub fn set_cancelled(&self, id: &DeviceId) -> bool {
        match self.sessions.lock_ignore_poison().get(id) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every active session and returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.sessions.lock_ignore_poison();
        for handle in sessions.values() {
            handle.token.cancel();
        }
        sessions.len()
    }

    pub fn active_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.sessions.lock_ignore_poison().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock_ignore_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
