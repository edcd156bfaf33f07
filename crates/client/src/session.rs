//! Session state machine: `Bootstrapping -> Unauthenticated <-> Authenticated`.
//!
//! One [`SessionManager`] exists per application, created at startup
//! and handed by `Arc` to every component that needs it (HTTP client,
//! poller). It owns the current-user snapshot and the token store;
//! the network transitions (silent refresh, `/@me` fallback) live on
//! [`ApiClient`](crate::api::ApiClient), which mutates the session
//! through these methods.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use vmpanel_core::{DbId, User, Vm};

use crate::storage::{TokenKind, TokenStorage, DEFAULT_TOKEN_TTL_DAYS};

/// Externally observable authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Initial silent-refresh / claim-decode pass is still running.
    Bootstrapping,
    Unauthenticated,
    Authenticated,
}

struct SessionState {
    /// Immutable user snapshot; reconciliation swaps the whole `Arc`.
    user: Option<Arc<User>>,
    bootstrapping: bool,
}

/// Process-wide session: current user, token store handle, and an
/// [`AuthState`] watch channel so observers can react to login and
/// forced logout without polling.
pub struct SessionManager {
    store: Arc<dyn TokenStorage>,
    state: RwLock<SessionState>,
    state_tx: watch::Sender<AuthState>,
}

impl SessionManager {
    /// A new session in the `Bootstrapping` state.
    pub fn new(store: Arc<dyn TokenStorage>) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Bootstrapping);
        Self {
            store,
            state: RwLock::new(SessionState {
                user: None,
                bootstrapping: true,
            }),
            state_tx,
        }
    }

    /// Subscribe to authentication state changes. A forced logout
    /// (failed refresh) is observable here.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    pub fn auth_state(&self) -> AuthState {
        let state = self.read();
        if state.user.is_some() {
            AuthState::Authenticated
        } else if state.bootstrapping {
            AuthState::Bootstrapping
        } else {
            AuthState::Unauthenticated
        }
    }

    /// Authenticated iff a current user is set.
    pub fn is_authenticated(&self) -> bool {
        self.read().user.is_some()
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.read().bootstrapping
    }

    pub fn current_user(&self) -> Option<Arc<User>> {
        self.read().user.clone()
    }

    /// Snapshot of the current user's VM inventory. Empty when
    /// unauthenticated.
    pub fn vms(&self) -> Vec<Vm> {
        self.read()
            .user
            .as_ref()
            .map(|user| user.vms.clone())
            .unwrap_or_default()
    }

    pub fn has_vm(&self, vm_id: DbId) -> bool {
        self.read()
            .user
            .as_ref()
            .is_some_and(|user| user.has_vm(vm_id))
    }

    /// Enter the authenticated state with an already-known user,
    /// persisting any tokens supplied. Does not call the network.
    pub fn login(&self, user: User, access_token: Option<&str>, refresh_token: Option<&str>) {
        if let Some(token) = access_token {
            self.store
                .set(TokenKind::Access, token, DEFAULT_TOKEN_TTL_DAYS);
        }
        if let Some(token) = refresh_token {
            self.store
                .set(TokenKind::Refresh, token, DEFAULT_TOKEN_TTL_DAYS);
        }
        {
            let mut state = self.write();
            state.user = Some(Arc::new(user));
        }
        tracing::info!("Session authenticated");
        self.notify();
    }

    /// Clear the user and both tokens unconditionally. Synchronous and
    /// not retryable.
    pub fn logout(&self) {
        {
            let mut state = self.write();
            state.user = None;
        }
        self.clear_tokens();
        tracing::info!("Session cleared");
        self.notify();
    }

    /// Replace the current user snapshot.
    pub fn set_user(&self, user: User) {
        {
            let mut state = self.write();
            state.user = Some(Arc::new(user));
        }
        self.notify();
    }

    /// Remove a VM from the user's inventory by swapping in a fresh
    /// snapshot (no in-place mutation, so concurrent readers never see
    /// a torn list). Returns `false` when the VM is not present or no
    /// user is set.
    pub fn remove_vm(&self, vm_id: DbId) -> bool {
        let mut state = self.write();
        let Some(user) = state.user.as_ref() else {
            return false;
        };
        if !user.has_vm(vm_id) {
            return false;
        }
        state.user = Some(Arc::new(user.without_vm(vm_id)));
        true
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.get(TokenKind::Access)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.get(TokenKind::Refresh)
    }

    /// Persist a freshly minted access/refresh pair. The refresh half
    /// is optional because the backend may choose not to rotate it.
    pub fn store_token_pair(&self, access_token: &str, refresh_token: Option<&str>) {
        self.store
            .set(TokenKind::Access, access_token, DEFAULT_TOKEN_TTL_DAYS);
        if let Some(token) = refresh_token {
            self.store
                .set(TokenKind::Refresh, token, DEFAULT_TOKEN_TTL_DAYS);
        }
    }

    pub fn clear_tokens(&self) {
        self.store.remove(TokenKind::Access);
        self.store.remove(TokenKind::Refresh);
    }

    /// Leave the `Bootstrapping` state. Called once by
    /// [`ApiClient::bootstrap`](crate::api::ApiClient::bootstrap).
    pub(crate) fn finish_bootstrap(&self) {
        {
            let mut state = self.write();
            state.bootstrapping = false;
        }
        self.notify();
    }

    fn notify(&self) {
        self.state_tx.send_replace(self.auth_state());
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().expect("session lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().expect("session lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTokenStorage;

    fn test_user(vm_ids: &[DbId]) -> User {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "email": "a@b.com",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "VMs": vm_ids
                .iter()
                .map(|id| serde_json::json!({ "id": id, "hostname": format!("h{id}") }))
                .collect::<Vec<_>>(),
        }))
        .expect("user fixture should deserialize")
    }

    fn session() -> SessionManager {
        SessionManager::new(Arc::new(MemoryTokenStorage::new()))
    }

    #[test]
    fn starts_bootstrapping_then_unauthenticated() {
        let session = session();
        assert_eq!(session.auth_state(), AuthState::Bootstrapping);
        session.finish_bootstrap();
        assert_eq!(session.auth_state(), AuthState::Unauthenticated);
    }

    #[test]
    fn login_persists_tokens_and_authenticates() {
        let session = session();
        session.login(test_user(&[5]), Some("t1"), Some("r1"));

        assert_eq!(session.auth_state(), AuthState::Authenticated);
        assert_eq!(session.access_token().as_deref(), Some("t1"));
        assert_eq!(session.refresh_token().as_deref(), Some("r1"));
        assert_eq!(session.vms().len(), 1);
    }

    #[test]
    fn login_without_tokens_leaves_store_untouched() {
        let session = session();
        session.login(test_user(&[]), None, None);
        assert!(session.is_authenticated());
        assert_eq!(session.access_token(), None);
    }

    #[test]
    fn logout_clears_user_and_both_tokens() {
        let session = session();
        session.login(test_user(&[5]), Some("t1"), Some("r1"));
        session.logout();

        assert_eq!(session.auth_state(), AuthState::Bootstrapping); // still pre-bootstrap
        assert!(!session.is_authenticated());
        assert_eq!(session.access_token(), None);
        assert_eq!(session.refresh_token(), None);
        assert!(session.vms().is_empty());
    }

    #[test]
    fn remove_vm_swaps_in_a_new_snapshot() {
        let session = session();
        session.login(test_user(&[5, 7]), None, None);

        // Readers holding the old snapshot still see both VMs.
        let before = session.current_user().expect("user is set");

        assert!(session.remove_vm(7));
        assert!(!session.has_vm(7));
        assert!(session.has_vm(5));
        assert!(before.has_vm(7));

        // Removing again reports absence.
        assert!(!session.remove_vm(7));
    }

    #[test]
    fn remove_vm_without_user_is_false() {
        let session = session();
        assert!(!session.remove_vm(5));
    }

    #[test]
    fn watch_channel_observes_forced_logout() {
        let session = session();
        let rx = session.subscribe();

        session.login(test_user(&[]), None, None);
        assert_eq!(*rx.borrow(), AuthState::Authenticated);

        session.finish_bootstrap();
        session.logout();
        assert_eq!(*rx.borrow(), AuthState::Unauthenticated);
    }
}
