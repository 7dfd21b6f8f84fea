use crate::document::{DocumentStore, PLACEHOLDER_DOCUMENT};
use crate::locks::LockTable;
use crate::ws::hub::BroadcastHub;
use drawsync_common::protocol::ws::UserInfo;
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: u32 = 8_388_608;
pub(crate) const SESSION_ID_LEN: usize = 8;

/// Everything a connection handler needs, shared across all connections.
#[derive(Clone)]
pub struct CollabState {
    pub(crate) documents: Arc<DocumentStore>,
    pub(crate) locks: Arc<LockTable>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) hub: Arc<BroadcastHub>,
}

impl CollabState {
    pub fn new(initial_document: impl Into<String>) -> Self {
        let locks = Arc::new(LockTable::default());
        Self {
            documents: Arc::new(DocumentStore::new(initial_document)),
            sessions: Arc::new(SessionRegistry::new(Arc::clone(&locks))),
            locks,
            hub: Arc::new(BroadcastHub::default()),
        }
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }
}

impl Default for CollabState {
    fn default() -> Self {
        Self::new(PLACEHOLDER_DOCUMENT)
    }
}

/// Live users, keyed by session id.
///
/// Unregistering a session releases its locks while the registry is still
/// held, so no other connection can observe the user gone with locks left.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, UserInfo>>,
    locks: Arc<LockTable>,
}

impl SessionRegistry {
    pub fn new(locks: Arc<LockTable>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), locks }
    }

    /// Add or overwrite a session.
    pub async fn register(&self, session_id: String, info: UserInfo) {
        let mut guard = self.sessions.write().await;
        register_locked(&mut guard, session_id, info);
    }

    /// Allocate a fresh session id, stamp it into `info` as `id` and register it.
    pub async fn open(&self, mut info: UserInfo) -> (String, UserInfo) {
        let mut guard = self.sessions.write().await;
        let session_id = loop {
            let candidate = new_session_id();
            if !guard.contains_key(&candidate) {
                break candidate;
            }
        };

        info.insert("id".to_string(), Value::String(session_id.clone()));
        register_locked(&mut guard, session_id.clone(), info.clone());
        (session_id, info)
    }

    /// Remove the session and every lock it owns; returns the freed element ids.
    pub async fn unregister(&self, session_id: &str) -> BTreeSet<String> {
        let mut guard = self.sessions.write().await;
        guard.remove(session_id);
        self.locks.release_all(session_id).await
    }

    pub async fn list(&self) -> Vec<UserInfo> {
        self.sessions.read().await.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

// The write guard is held by the caller, so an id check and its insert are one step.
fn register_locked(sessions: &mut HashMap<String, UserInfo>, session_id: String, info: UserInfo) {
    sessions.insert(session_id, info);
}

fn new_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SESSION_ID_LEN);
    id
}
