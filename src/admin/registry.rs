// SPDX-License-Identifier: Apache-2.0

//! Session Registry
//!
//! The live sessions of one console instance. Newest sessions come first.
//! Every operation takes the lock for its whole duration and does no I/O
//! while holding it.

use std::collections::VecDeque;

use parking_lot::Mutex;

use sqlgate_core::SessionId;

pub struct SessionRegistry<T> {
    sessions: Mutex<VecDeque<(SessionId, T)>>,
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
        }
    }

    /// Prepends a session
    pub fn insert(&self, id: SessionId, entry: T) {
        self.sessions.lock().push_front((id, entry));
    }

    /// Unlinks a session, keeping the order of the others
    pub fn remove(&self, id: SessionId) -> Option<T> {
        let mut sessions = self.sessions.lock();
        let idx = sessions.iter().position(|(sid, _)| *sid == id)?;
        sessions.remove(idx).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().iter().any(|(sid, _)| *sid == id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().iter().map(|(sid, _)| *sid).collect()
    }
}

impl<T: Clone> SessionRegistry<T> {
    /// Copy of the list, newest first
    pub fn snapshot(&self) -> Vec<(SessionId, T)> {
        self.sessions.lock().iter().cloned().collect()
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
