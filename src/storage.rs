use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventStream, Subscriber, CHANNEL_CAPACITY, REPLAY_BUFFER_SIZE};

/// UI flag purged on logout: whether the low-stock alert banner was already
/// shown this session.
pub const STOCK_ALERTS_SHOWN_FLAG: &str = "stock_alerts_shown";

/// Persisted authentication state. Mirrors what the store writes through its
/// backend; session-scoped UI flags deliberately stay out of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedAuth {
    /// Bearer token for API requests, absent when logged out
    pub access_token: Option<String>,
    /// Active tenant id, scopes multi-tenant requests
    pub tenant_id: Option<String>,
    /// Last email used to log in. Prefill convenience, not a security boundary.
    pub auth_email: Option<String>,
}

/// Change notification published by the store. `origin` identifies the handle
/// that performed the write, so a listener can ignore its own writes and
/// treat everything else as an external signal, the way a browser tab only
/// hears storage events raised by other tabs.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub origin: Uuid,
    pub token: Option<String>,
}

/// Persistence seam behind the token store. The file backend is the normal
/// deployment; the memory backend keeps tests hermetic.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedAuth>>;
    async fn save(&self, auth: &PersistedAuth) -> Result<()>;
}

/// JSON-file persistence, surviving restarts of the hosting shell
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn load(&self) -> Result<Option<PersistedAuth>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let auth = serde_json::from_str(&contents).map_err(|e| Error::Storage {
                    reason: format!("failed to parse {}: {}", self.path.display(), e),
                })?;
                Ok(Some(auth))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage {
                reason: format!("failed to read {}: {}", self.path.display(), e),
            }),
        }
    }

    async fn save(&self, auth: &PersistedAuth) -> Result<()> {
        let contents = serde_json::to_string_pretty(auth).map_err(|e| Error::Storage {
            reason: format!("failed to serialize auth state: {}", e),
        })?;

        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Err(Error::Storage {
                    reason: format!("failed to create {}: {}", parent.display(), e),
                });
            }
        }

        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| Error::Storage {
                reason: format!("failed to write {}: {}", self.path.display(), e),
            })
    }
}

/// In-memory persistence for tests and ephemeral shells
#[derive(Default)]
pub struct MemoryBackend {
    auth: RwLock<Option<PersistedAuth>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<PersistedAuth>> {
        Ok(self.auth.read().await.clone())
    }

    async fn save(&self, auth: &PersistedAuth) -> Result<()> {
        *self.auth.write().await = Some(auth.clone());
        Ok(())
    }
}

struct StoreState {
    auth: PersistedAuth,
    ui_flags: HashMap<String, bool>,
}

struct StoreInner {
    state: RwLock<StoreState>,
    backend: Arc<dyn StorageBackend>,
    events: EventStream<StorageEvent>,
}

/// Single source of truth for the bearer token, tenant id, and cached login
/// email. Every component reads through a handle; handles created with
/// [`TokenStore::handle`] carry distinct identities so change events can be
/// attributed, which is what makes two session managers sharing one store
/// behave like two browser tabs sharing localStorage.
///
/// Reads never fail. Backend write failures are logged and the in-memory
/// state stays authoritative for this process; the session continues rather
/// than erroring out of an otherwise valid login.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<StoreInner>,
    handle_id: Uuid,
}

impl TokenStore {
    /// Open a store over the given backend, restoring any persisted state
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Self {
        let auth = match backend.load().await {
            Ok(Some(auth)) => {
                debug!("Restored persisted auth state");
                auth
            }
            Ok(None) => PersistedAuth::default(),
            Err(e) => {
                warn!(error = %e, "Failed to restore persisted auth state, starting empty");
                PersistedAuth::default()
            }
        };

        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState {
                    auth,
                    ui_flags: HashMap::new(),
                }),
                backend,
                events: EventStream::new(CHANNEL_CAPACITY, REPLAY_BUFFER_SIZE),
            }),
            handle_id: Uuid::new_v4(),
        }
    }

    /// In-memory store, convenient for tests
    pub async fn in_memory() -> Self {
        Self::open(Arc::new(MemoryBackend::new())).await
    }

    /// A new handle onto the same store with its own identity. Writes made
    /// through this handle are external events from every other handle's
    /// point of view.
    pub fn handle(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            handle_id: Uuid::new_v4(),
        }
    }

    /// Identity of this handle, used to filter out self-originated events
    pub fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    /// Subscribe to change events from all handles (including this one;
    /// listeners filter by [`StorageEvent::origin`])
    pub fn subscribe(&self) -> Subscriber<StorageEvent> {
        self.inner.events.subscribe()
    }

    /// Current bearer token, if any. Never fails.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.state.read().await.auth.access_token.clone()
    }

    /// Store or clear the bearer token. Clearing means the session is no
    /// longer valid for subsequent requests.
    pub async fn set_access_token(&self, token: Option<&str>) {
        {
            let mut state = self.inner.state.write().await;
            state.auth.access_token = token.map(str::to_string);
        }
        self.persist().await;
        self.publish_token_change().await;
    }

    pub async fn tenant_id(&self) -> Option<String> {
        self.inner.state.read().await.auth.tenant_id.clone()
    }

    /// Store the active tenant id so tenant-scoped requests resolve
    /// correctly. Switching tenants invalidates session-scoped UI flags;
    /// they describe the previous tenant's session.
    pub async fn set_tenant_id(&self, tenant_id: Option<&str>) {
        {
            let mut state = self.inner.state.write().await;
            let new_id = tenant_id.map(str::to_string);
            if state.auth.tenant_id != new_id {
                state.ui_flags.clear();
            }
            state.auth.tenant_id = new_id;
        }
        self.persist().await;
    }

    pub async fn auth_email(&self) -> Option<String> {
        self.inner.state.read().await.auth.auth_email.clone()
    }

    /// Remember the last-used login email for prefill
    pub async fn set_auth_email(&self, email: Option<&str>) {
        {
            let mut state = self.inner.state.write().await;
            state.auth.auth_email = email.map(str::to_string);
        }
        self.persist().await;
    }

    /// Session-scoped UI flag, false when never set
    pub async fn ui_flag(&self, name: &str) -> bool {
        self.inner
            .state
            .read()
            .await
            .ui_flags
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// Set a session-scoped UI flag. Not persisted; purged on logout.
    pub async fn set_ui_flag(&self, name: &str, value: bool) {
        let mut state = self.inner.state.write().await;
        state.ui_flags.insert(name.to_string(), value);
    }

    /// Clear token, tenant, and session-scoped UI flags in one write. The
    /// login email survives so the form can prefill next time.
    pub async fn clear_session(&self) {
        {
            let mut state = self.inner.state.write().await;
            state.auth.access_token = None;
            state.auth.tenant_id = None;
            state.ui_flags.clear();
        }
        self.persist().await;
        self.publish_token_change().await;
        info!("Session state cleared from token store");
    }

    async fn persist(&self) {
        let auth = self.inner.state.read().await.auth.clone();
        if let Err(e) = self.inner.backend.save(&auth).await {
            warn!(error = %e, "Failed to persist auth state, keeping in-memory copy");
        }
    }

    async fn publish_token_change(&self) {
        let token = self.inner.state.read().await.auth.access_token.clone();
        self.inner
            .events
            .publish(StorageEvent {
                origin: self.handle_id,
                token,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_never_fail_and_default_to_none() {
        let store = TokenStore::in_memory().await;
        assert_eq!(store.access_token().await, None);
        assert_eq!(store.tenant_id().await, None);
        assert_eq!(store.auth_email().await, None);
        assert!(!store.ui_flag(STOCK_ALERTS_SHOWN_FLAG).await);
    }

    #[tokio::test]
    async fn writes_are_visible_to_other_handles() {
        let store = TokenStore::in_memory().await;
        let other = store.handle();

        store.set_access_token(Some("tok1")).await;
        assert_eq!(other.access_token().await, Some("tok1".to_string()));
        assert_ne!(store.handle_id(), other.handle_id());
    }

    #[tokio::test]
    async fn token_writes_raise_change_events_with_origin() {
        let store = TokenStore::in_memory().await;
        let mut sub = store.subscribe();

        store.set_access_token(Some("tok1")).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.origin, store.handle_id());
        assert_eq!(event.token, Some("tok1".to_string()));

        store.set_access_token(None).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.token, None);
    }

    #[tokio::test]
    async fn clear_session_purges_flags_but_keeps_email() {
        let store = TokenStore::in_memory().await;
        store.set_access_token(Some("tok1")).await;
        store.set_tenant_id(Some("t-5")).await;
        store.set_auth_email(Some("a@b.com")).await;
        store.set_ui_flag(STOCK_ALERTS_SHOWN_FLAG, true).await;

        store.clear_session().await;

        assert_eq!(store.access_token().await, None);
        assert_eq!(store.tenant_id().await, None);
        assert!(!store.ui_flag(STOCK_ALERTS_SHOWN_FLAG).await);
        assert_eq!(store.auth_email().await, Some("a@b.com".to_string()));
    }

    #[tokio::test]
    async fn switching_tenants_invalidates_ui_flags() {
        let store = TokenStore::in_memory().await;
        store.set_tenant_id(Some("t-5")).await;
        store.set_ui_flag(STOCK_ALERTS_SHOWN_FLAG, true).await;

        // Same tenant: flags survive
        store.set_tenant_id(Some("t-5")).await;
        assert!(store.ui_flag(STOCK_ALERTS_SHOWN_FLAG).await);

        // Different tenant: flags reset
        store.set_tenant_id(Some("t-9")).await;
        assert!(!store.ui_flag(STOCK_ALERTS_SHOWN_FLAG).await);
    }

    #[tokio::test]
    async fn file_backend_round_trips_state() {
        let path = std::env::temp_dir().join(format!("veranda-store-{}.json", Uuid::new_v4()));
        let backend = Arc::new(FileBackend::new(&path));

        {
            let store = TokenStore::open(backend.clone()).await;
            store.set_access_token(Some("tok1")).await;
            store.set_tenant_id(Some("acme")).await;
        }

        let reopened = TokenStore::open(backend).await;
        assert_eq!(reopened.access_token().await, Some("tok1".to_string()));
        assert_eq!(reopened.tenant_id().await, Some("acme".to_string()));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn corrupt_persisted_state_starts_empty() {
        let path = std::env::temp_dir().join(format!("veranda-store-{}.json", Uuid::new_v4()));
        std::fs::write(&path, "{ not json").unwrap();

        let store = TokenStore::open(Arc::new(FileBackend::new(&path))).await;
        assert_eq!(store.access_token().await, None);

        let _ = std::fs::remove_file(&path);
    }
}
