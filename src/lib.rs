use std::sync::Arc;

use tracing::info;

// Export modules
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod http;
pub mod login;
pub mod session;
pub mod storage;
pub mod token;

pub use api::{AuthApi, Identity, LoginOutcome, Tenant, TenantChoice, User};
pub use config::Config;
pub use error::{Error, Result};
pub use guard::{private_route, super_admin_route, RouteDecision};
pub use http::ApiClient;
pub use login::{
    FlowState, LoginAdvance, LoginFlow, LOGIN_ROUTE, SUPER_ADMIN_HOME, UNREACHABLE_SERVER_MESSAGE,
};
pub use session::{SessionEvent, SessionManager, SessionSnapshot};
pub use storage::{FileBackend, MemoryBackend, StorageBackend, TokenStore};

/// Fully wired session stack for a hosting shell: one store, one HTTP
/// pipeline, one auth API, one session manager.
pub struct AppState {
    pub store: TokenStore,
    pub api: AuthApi,
    pub session: SessionManager,
}

impl AppState {
    /// Construct the stack over the given storage backend
    pub async fn new(config: &Config, backend: Arc<dyn StorageBackend>) -> Self {
        let store = TokenStore::open(backend).await;
        let api = AuthApi::new(ApiClient::new(config, store.clone()));
        let session = SessionManager::new(api.clone(), &store);

        Self { store, api, session }
    }

    /// Run the session startup sequence. Guards stay pending until this has
    /// completed; it never fails.
    pub async fn initialize(&self) {
        info!("Initializing session stack");
        self.session.initialize().await;
    }
}
