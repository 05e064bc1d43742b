use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{AuthApi, Identity, LoginOutcome, Tenant, User};
use crate::error::Result;
use crate::events::{EventStream, Subscriber, CHANNEL_CAPACITY, REPLAY_BUFFER_SIZE};
use crate::storage::TokenStore;
use crate::token::{decode_expiry, refresh_delay};

/// Events published for shell components that render session state
#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    /// Session state transitioned; carries the full new snapshot
    StateChanged { snapshot: SessionSnapshot },
    /// A silent refresh was scheduled
    RefreshScheduled { when: chrono::DateTime<chrono::Utc> },
    /// A silent refresh completed and the token was replaced
    TokenRefreshed,
    /// The session ended, locally or from another tab
    SignedOut,
}

/// Point-in-time view of the session, consumed by the route guards
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    /// Startup sequence finished; guards render nothing until this is true
    pub loaded: bool,
    pub user: Option<User>,
    pub tenant: Option<Tenant>,
    /// A raw token exists in the store, whether or not it validated yet
    pub has_token: bool,
}

struct SessionState {
    user: Option<User>,
    tenant: Option<Tenant>,
    loaded: bool,
    /// Bumped whenever a transition invalidates in-flight identity lookups;
    /// a `me()` response from an older epoch is discarded instead of applied.
    epoch: u64,
}

struct SessionInner {
    api: AuthApi,
    store: TokenStore,
    state: RwLock<SessionState>,
    events: EventStream<SessionEvent>,
    /// Serializes the timer-driven refresh against cross-tab adoption so the
    /// two paths cannot interleave their refresh/me/apply sequences.
    reconcile: tokio::sync::Mutex<()>,
    refresh_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    listener_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for slot in [&self.refresh_task, &self.listener_task] {
            if let Ok(mut guard) = slot.lock() {
                if let Some(task) = guard.take() {
                    task.abort();
                }
            }
        }
    }
}

/// Owner of the current user, current tenant, and the auth-loaded flag for
/// the lifetime of the application. The only component allowed to transition
/// them.
///
/// Cheap to clone; all clones share state. Background work (the one-shot
/// silent-refresh timer, the storage-change listener) holds only weak
/// references, so dropping the last handle tears both down.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a manager over the given API and store. The manager takes its
    /// own store handle so its writes are distinguishable from other tabs'.
    pub fn new(api: AuthApi, store: &TokenStore) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                store: store.handle(),
                state: RwLock::new(SessionState {
                    user: None,
                    tenant: None,
                    loaded: false,
                    epoch: 0,
                }),
                events: EventStream::new(CHANNEL_CAPACITY, REPLAY_BUFFER_SIZE),
                reconcile: tokio::sync::Mutex::new(()),
                refresh_task: std::sync::Mutex::new(None),
                listener_task: std::sync::Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> Subscriber<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The manager's handle onto the shared token store. Read-side access
    /// for shells (prefill email, UI flags); session transitions stay the
    /// manager's job.
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// Current snapshot for guards and shells
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.read().await;
        SessionSnapshot {
            loaded: state.loaded,
            user: state.user.clone(),
            tenant: state.tenant.clone(),
            has_token: self.inner.store.access_token().await.is_some(),
        }
    }

    /// Run the startup sequence once: restore or silently acquire a session,
    /// then mark auth as loaded no matter how that went. Never fails; an
    /// unexpected error degrades to anonymous. Also attaches the cross-tab
    /// listener for the rest of the manager's lifetime.
    pub async fn initialize(&self) {
        if let Err(e) = self.try_initialize().await {
            error!(error = %e, "Session startup failed, continuing as anonymous");
        }

        {
            let mut state = self.inner.state.write().await;
            state.loaded = true;
        }
        self.publish_state().await;
        info!("Session initialized");

        self.spawn_storage_listener();
    }

    async fn try_initialize(&self) -> Result<()> {
        let token = match self.inner.store.access_token().await {
            Some(token) => Some(token),
            // No cached token: one shot at a silent refresh before giving up
            None => match self.inner.api.refresh().await {
                Ok(Some(access)) => {
                    self.install_token(&access).await;
                    Some(access)
                }
                Ok(None) => None,
                Err(e) => {
                    debug!(error = %e, "Silent refresh unreachable during startup");
                    None
                }
            },
        };

        let Some(token) = token else {
            debug!("No session to restore, starting anonymous");
            return Ok(());
        };

        // Arm the refresh timer as soon as a token exists; every later token
        // change rearms it.
        self.schedule_refresh(&token).await;

        match self.inner.api.me().await {
            Ok(identity) => {
                self.adopt_identity(identity, self.epoch().await).await;
                Ok(())
            }
            Err(e) if e.is_auth_rejection() => {
                debug!("Cached token rejected, attempting refresh before giving up");
                match self.inner.api.refresh().await {
                    Ok(Some(access)) => {
                        self.install_token(&access).await;
                        match self.inner.api.me().await {
                            Ok(identity) => {
                                self.adopt_identity(identity, self.epoch().await).await;
                                Ok(())
                            }
                            Err(e2) if e2.is_auth_rejection() => {
                                // Refreshed token rejected too: the session is gone
                                self.clear_session_state().await;
                                Ok(())
                            }
                            // Transport mid-sequence: keep the token for later
                            Err(_) => Ok(()),
                        }
                    }
                    Ok(None) => {
                        // The server disowned both the token and the refresh
                        // credential; this is an explicit rejection, not noise
                        self.clear_session_state().await;
                        Ok(())
                    }
                    Err(e2) => {
                        debug!(error = %e2, "Refresh unreachable, keeping cached token");
                        Ok(())
                    }
                }
            }
            Err(e) => {
                // Transport failure must not clear an already-valid token
                debug!(error = %e, "Identity check unreachable, keeping cached token");
                Ok(())
            }
        }
    }

    /// Log in with credentials. On success the token, tenant id, and email
    /// are persisted and the session is populated before this returns. All
    /// other outcomes pass through untouched for the flow to branch on.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        two_factor_code: Option<&str>,
        remember_device: bool,
    ) -> Result<LoginOutcome> {
        let outcome = self
            .inner
            .api
            .login(email, password, two_factor_code, remember_device)
            .await?;
        self.absorb_login_outcome(email, outcome).await
    }

    /// Log in to a chosen tenant after disambiguation
    pub async fn login_tenant(
        &self,
        email: &str,
        password: &str,
        tenant_slug: &str,
        two_factor_code: Option<&str>,
        remember_device: bool,
    ) -> Result<LoginOutcome> {
        let outcome = self
            .inner
            .api
            .login_tenant(email, password, tenant_slug, two_factor_code, remember_device)
            .await?;
        self.absorb_login_outcome(email, outcome).await
    }

    async fn absorb_login_outcome(&self, email: &str, outcome: LoginOutcome) -> Result<LoginOutcome> {
        if let LoginOutcome::Success { access, user, tenant } = &outcome {
            self.install_token(access).await;
            self.inner.store.set_auth_email(Some(email)).await;
            let epoch = self.epoch().await;
            self.adopt_identity(
                Identity {
                    user: user.clone(),
                    tenant: tenant.clone(),
                },
                epoch,
            )
            .await;
            info!(user = %user.email, "Signed in");
        }
        Ok(outcome)
    }

    /// End the session. The server call is best effort; local state, the
    /// stored token, and session-scoped UI flags clear unconditionally.
    pub async fn logout(&self) {
        if let Err(e) = self.inner.api.logout().await {
            warn!(error = %e, "Server logout failed, clearing local session anyway");
        }
        self.clear_session_state().await;
        info!("Signed out");
    }

    /// Re-validate the current identity on demand (e.g. after a branch
    /// switch). Auth rejection clears the session; transport failures leave
    /// it untouched and surface the error.
    pub async fn refresh_session(&self) -> Result<()> {
        let epoch = self.epoch().await;
        match self.inner.api.me().await {
            Ok(identity) => {
                self.adopt_identity(identity, epoch).await;
                Ok(())
            }
            Err(e) if e.is_auth_rejection() => {
                self.clear_session_state().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn epoch(&self) -> u64 {
        self.inner.state.read().await.epoch
    }

    /// Replace user/tenant wholesale from a `me()` result, unless the state
    /// has moved on since the lookup started.
    async fn adopt_identity(&self, identity: Identity, expected_epoch: u64) {
        {
            let mut state = self.inner.state.write().await;
            if state.epoch != expected_epoch {
                debug!("Discarding stale identity result");
                return;
            }
            state.user = Some(identity.user);
            state.tenant = identity.tenant.clone();
        }

        let tenant_id = identity.tenant.as_ref().map(|t| t.id.to_string());
        self.inner.store.set_tenant_id(tenant_id.as_deref()).await;
        self.publish_state().await;
    }

    /// Store a fresh token and reschedule the silent refresh. Bumps the
    /// epoch: identity lookups started against the old token no longer apply.
    async fn install_token(&self, access: &str) {
        {
            let mut state = self.inner.state.write().await;
            state.epoch += 1;
        }
        self.inner.store.set_access_token(Some(access)).await;
        self.schedule_refresh(access).await;
    }

    /// Clear user, tenant, token, and UI flags; cancel the pending refresh
    async fn clear_session_state(&self) {
        self.cancel_refresh_task();
        {
            let mut state = self.inner.state.write().await;
            state.epoch += 1;
            state.user = None;
            state.tenant = None;
        }
        self.inner.store.clear_session().await;
        self.publish_state().await;
        self.inner.events.publish(SessionEvent::SignedOut).await;
    }

    /// Clear in-memory identity only, for when another tab already cleared
    /// the shared store
    async fn clear_local_identity(&self) {
        self.cancel_refresh_task();
        {
            let mut state = self.inner.state.write().await;
            state.epoch += 1;
            state.user = None;
            state.tenant = None;
        }
        self.publish_state().await;
        self.inner.events.publish(SessionEvent::SignedOut).await;
    }

    fn cancel_refresh_task(&self) {
        if let Ok(mut guard) = self.inner.refresh_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }

    /// Arm the one-shot silent-refresh timer for the given token, replacing
    /// any previously armed timer.
    async fn schedule_refresh(&self, token: &str) {
        let now = Utc::now();
        let delay = refresh_delay(decode_expiry(token), now);
        let when = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

        self.cancel_refresh_task();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = SessionManager::from_weak(&weak) {
                manager.run_silent_refresh().await;
            }
        });

        if let Ok(mut guard) = self.inner.refresh_task.lock() {
            *guard = Some(task);
        }

        debug!(delay_secs = delay.as_secs(), "Silent refresh scheduled");
        self.inner
            .events
            .publish(SessionEvent::RefreshScheduled { when })
            .await;
    }

    /// Timer body: renew the token and resync the identity. Failure is left
    /// alone; the next API call's 401 decides whether the session ends.
    ///
    /// Boxed as a `dyn Future + Send` to break the auto-trait inference cycle:
    /// this calls `install_token` -> `schedule_refresh`, which spawns a task
    /// that calls back here. Erasing the type at this boundary lets the
    /// compiler prove the spawned future is `Send` without chasing the cycle.
    fn run_silent_refresh(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // This runs inside the armed timer task. Detach its handle first so
            // rescheduling below does not abort the task mid-body.
            if let Ok(mut guard) = self.inner.refresh_task.lock() {
                guard.take();
            }

            let _guard = self.inner.reconcile.lock().await;

            match self.inner.api.refresh().await {
                Ok(Some(access)) => {
                    self.install_token(&access).await;
                    self.inner.events.publish(SessionEvent::TokenRefreshed).await;

                    let epoch = self.epoch().await;
                    match self.inner.api.me().await {
                        Ok(identity) => self.adopt_identity(identity, epoch).await,
                        Err(e) => debug!(error = %e, "Identity resync after refresh failed"),
                    }
                }
                Ok(None) => debug!("Silent refresh found no session, leaving state as is"),
                Err(e) => debug!(error = %e, "Silent refresh unreachable, leaving state as is"),
            }
        })
    }

    /// React to token changes made by other handles of the shared store:
    /// a cleared token signs this tab out, a new token adopts that identity.
    fn spawn_storage_listener(&self) {
        let mut subscriber = self.inner.store.subscribe();
        let own_handle = self.inner.store.handle_id();
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                let event = match subscriber.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Storage listener lagged, continuing");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                if event.origin == own_handle {
                    continue;
                }
                let Some(manager) = SessionManager::from_weak(&weak) else {
                    break;
                };

                let _guard = manager.inner.reconcile.lock().await;
                match event.token {
                    None => {
                        info!("Token cleared by another tab, signing out here");
                        manager.clear_local_identity().await;
                    }
                    Some(token) => {
                        debug!("Token replaced by another tab, adopting identity");
                        manager.schedule_refresh(&token).await;
                        let epoch = manager.epoch().await;
                        match manager.inner.api.me().await {
                            Ok(identity) => manager.adopt_identity(identity, epoch).await,
                            Err(e) => {
                                debug!(error = %e, "Failed to adopt identity from other tab")
                            }
                        }
                    }
                }
            }
        });

        if let Ok(mut guard) = self.inner.listener_task.lock() {
            if let Some(previous) = guard.replace(task) {
                previous.abort();
            }
        }
    }

    async fn publish_state(&self) {
        let snapshot = self.snapshot().await;
        self.inner
            .events
            .publish(SessionEvent::StateChanged { snapshot })
            .await;
    }
}
