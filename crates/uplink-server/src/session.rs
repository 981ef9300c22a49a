//! Sessions, UIs, and the registry that resolves inbound connections.
//!
//! A session's UIs live behind one async mutex. Holding the guard is
//! the session lock: every read or write of UI state and every push
//! send happens under it, and release is the guard drop on every exit
//! path.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use uplink_core::{PushError, PushMode, SessionId, UiId};

use crate::connection::PushConnection;
use crate::protocol::StateSerializer;

/// Server-side object representing one browser view.
pub struct Ui {
    id: UiId,
    push_mode: PushMode,
    security_token: String,
    connection: Option<PushConnection>,
    sync_id: u64,
    pending_changes: Vec<serde_json::Value>,
    rpc_journal: Vec<serde_json::Value>,
}

impl Ui {
    fn new(id: UiId, push_mode: PushMode) -> Self {
        Self {
            id,
            push_mode,
            security_token: Uuid::now_v7().to_string(),
            connection: None,
            sync_id: 0,
            pending_changes: Vec::new(),
            rpc_journal: Vec::new(),
        }
    }

    pub fn id(&self) -> UiId {
        self.id
    }

    pub fn push_mode(&self) -> PushMode {
        self.push_mode
    }

    /// Token the RPC decoder checks on every inbound payload.
    pub fn security_token(&self) -> &str {
        &self.security_token
    }

    /// Queue a state change to be flushed on the next push.
    pub fn queue_change(&mut self, change: serde_json::Value) {
        self.pending_changes.push(change);
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending_changes.is_empty()
    }

    /// Take everything queued so far and advance the sync id. The
    /// serializer seam calls this exactly once per produced payload.
    pub fn drain_changes(&mut self) -> (u64, Vec<serde_json::Value>) {
        self.sync_id += 1;
        (self.sync_id, std::mem::take(&mut self.pending_changes))
    }

    /// Apply one decoded RPC invocation.
    pub fn apply_rpc(&mut self, invocation: serde_json::Value) {
        self.rpc_journal.push(invocation);
    }

    pub fn rpc_journal(&self) -> &[serde_json::Value] {
        &self.rpc_journal
    }

    /// Attach the active push connection. Replaces any previous one.
    pub fn set_push_connection(&mut self, connection: PushConnection) {
        self.connection = Some(connection);
    }

    pub fn push_connection(&self) -> Option<&PushConnection> {
        self.connection.as_ref()
    }

    pub fn push_connection_mut(&mut self) -> Option<&mut PushConnection> {
        self.connection.as_mut()
    }

    /// The active connection, only if it is actually usable.
    pub fn connected_push(&self) -> Option<&PushConnection> {
        self.connection.as_ref().filter(|c| c.is_connected())
    }

    pub fn clear_push_connection(&mut self) -> Option<PushConnection> {
        self.connection.take()
    }

    /// Serialize pending state via `serializer` and send it over the
    /// active connection.
    pub fn push(
        &mut self,
        serializer: &dyn StateSerializer,
        initial: bool,
    ) -> Result<(), PushError> {
        let payload = serializer.serialize(self, initial)?;
        self.connected_push()
            .ok_or(PushError::NotConnected)?
            .push(payload)
    }
}

/// All UIs of one session. Only reachable through the session lock.
#[derive(Default)]
pub struct SessionUis {
    next_ui: u32,
    uis: HashMap<UiId, Ui>,
}

impl SessionUis {
    pub fn create_ui(&mut self, push_mode: PushMode) -> &mut Ui {
        let id = UiId(self.next_ui);
        self.next_ui += 1;
        self.uis.entry(id).or_insert_with(|| Ui::new(id, push_mode))
    }

    pub fn ui(&self, id: UiId) -> Option<&Ui> {
        self.uis.get(&id)
    }

    pub fn ui_mut(&mut self, id: UiId) -> Option<&mut Ui> {
        self.uis.get_mut(&id)
    }

    pub fn remove_ui(&mut self, id: UiId) -> Option<Ui> {
        self.uis.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.uis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uis.is_empty()
    }
}

/// Server-side context shared by all UIs in one browser tab group.
/// The unit of locking.
pub struct Session {
    id: SessionId,
    default_push_mode: PushMode,
    uis: Mutex<SessionUis>,
}

impl Session {
    pub fn new(default_push_mode: PushMode) -> Self {
        Self {
            id: SessionId::new(),
            default_push_mode,
            uis: Mutex::new(SessionUis::default()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn default_push_mode(&self) -> PushMode {
        self.default_push_mode
    }

    /// Acquire the session lock. The guard must be held for the full
    /// duration of any UI mutation or push send, and is never
    /// re-acquired by the same flow.
    pub async fn lock(&self) -> MutexGuard<'_, SessionUis> {
        self.uis.lock().await
    }
}

/// Resolves inbound physical connections to their owning session.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn create_session(&self, default_push_mode: PushMode) -> Arc<Session> {
        let session = Arc::new(Session::new(default_push_mode));
        self.sessions.insert(session.id().clone(), Arc::clone(&session));
        session
    }

    pub fn resolve(&self, id: &SessionId) -> Result<Arc<Session>, PushError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(PushError::SessionExpired)
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn ui_ids_are_monotonic_per_session() {
        let session = Session::new(PushMode::Automatic);
        let mut uis = session.lock().await;
        let a = uis.create_ui(PushMode::Automatic).id();
        let b = uis.create_ui(PushMode::Automatic).id();
        assert_eq!(a, UiId(0));
        assert_eq!(b, UiId(1));
        assert_eq!(uis.len(), 2);
    }

    #[tokio::test]
    async fn ui_lookup_and_removal() {
        let session = Session::new(PushMode::Manual);
        let mut uis = session.lock().await;
        let id = uis.create_ui(PushMode::Manual).id();
        assert!(uis.ui(id).is_some());
        assert!(uis.ui(UiId(99)).is_none());

        uis.remove_ui(id);
        assert!(uis.ui(id).is_none());
        assert!(uis.is_empty());
    }

    #[tokio::test]
    async fn drain_changes_advances_sync_id() {
        let session = Session::new(PushMode::Automatic);
        let mut uis = session.lock().await;
        let ui = uis.create_ui(PushMode::Automatic);
        ui.queue_change(serde_json::json!({"label": "hello"}));
        assert!(ui.has_pending_changes());

        let (sync_id, changes) = ui.drain_changes();
        assert_eq!(sync_id, 1);
        assert_eq!(changes.len(), 1);
        assert!(!ui.has_pending_changes());

        let (sync_id, changes) = ui.drain_changes();
        assert_eq!(sync_id, 2);
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn security_tokens_differ_between_uis() {
        let session = Session::new(PushMode::Automatic);
        let mut uis = session.lock().await;
        let a = uis.create_ui(PushMode::Automatic).security_token().to_owned();
        let b = uis.create_ui(PushMode::Automatic).security_token().to_owned();
        assert_ne!(a, b);
    }

    #[test]
    fn registry_create_resolve_remove() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.count(), 0);

        let session = registry.create_session(PushMode::Automatic);
        assert_eq!(registry.count(), 1);
        assert!(registry.resolve(session.id()).is_ok());

        registry.remove(session.id());
        assert!(matches!(
            registry.resolve(session.id()),
            Err(PushError::SessionExpired)
        ));
    }

    #[test]
    fn resolving_unknown_session_is_expired() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.resolve(&SessionId::new()),
            Err(PushError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn session_lock_serializes_access() {
        let session = Arc::new(Session::new(PushMode::Automatic));
        let in_section = Arc::new(AtomicBool::new(false));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = Arc::clone(&session);
            let in_section = Arc::clone(&in_section);
            tasks.push(tokio::spawn(async move {
                let _guard = session.lock().await;
                assert!(
                    !in_section.swap(true, Ordering::SeqCst),
                    "two tasks inside the locked section"
                );
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_section.store(false, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
