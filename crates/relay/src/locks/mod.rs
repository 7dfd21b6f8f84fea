// Per-element exclusive locks.
//
// First writer wins. A denied acquire is final for that attempt; clients
// retry by sending a new request. Locks never expire: they are held until the
// owner releases them or its session is unregistered.

use std::collections::{BTreeSet, HashMap};

use drawsync_common::protocol::ws::{LockSnapshot, CANVAS_ELEMENT_ID};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, String>>,
}

impl LockTable {
    /// Claim `element_id` for `session_id`.
    ///
    /// Re-acquiring a lock the session already owns succeeds without change.
    /// The canvas element is never lockable.
    pub async fn acquire(&self, element_id: &str, session_id: &str) -> bool {
        if element_id == CANVAS_ELEMENT_ID {
            return false;
        }

        let mut guard = self.locks.lock().await;
        match guard.get(element_id) {
            Some(owner) => owner == session_id,
            None => {
                guard.insert(element_id.to_string(), session_id.to_string());
                true
            }
        }
    }

    /// Release `element_id` if, and only if, `session_id` owns it.
    pub async fn release(&self, element_id: &str, session_id: &str) -> bool {
        let mut guard = self.locks.lock().await;
        if guard.get(element_id).is_some_and(|owner| owner == session_id) {
            guard.remove(element_id);
            true
        } else {
            false
        }
    }

    /// Drop every lock owned by `session_id`, returning the freed element ids.
    pub async fn release_all(&self, session_id: &str) -> BTreeSet<String> {
        let mut guard = self.locks.lock().await;
        let released = guard
            .iter()
            .filter(|(_, owner)| owner.as_str() == session_id)
            .map(|(element_id, _)| element_id.clone())
            .collect::<BTreeSet<_>>();
        for element_id in &released {
            guard.remove(element_id);
        }
        released
    }

    pub async fn snapshot(&self) -> LockSnapshot {
        self.locks
            .lock()
            .await
            .iter()
            .map(|(element_id, owner)| (element_id.clone(), owner.clone()))
            .collect()
    }

    #[cfg(test)]
    pub async fn holder(&self, element_id: &str) -> Option<String> {
        self.locks.lock().await.get(element_id).cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
