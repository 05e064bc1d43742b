use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{LoginOutcome, Tenant, TenantChoice, User};
use crate::session::SessionManager;

/// Landing page for super admins after login
pub const SUPER_ADMIN_HOME: &str = "/admin/tenants";
/// The login route itself, used as the destination of last resort
pub const LOGIN_ROUTE: &str = "/login";

/// Generic message for failures where the server never answered. Server
/// rejections are shown verbatim instead.
pub const UNREACHABLE_SERVER_MESSAGE: &str = "Could not reach the server. Please try again.";

/// Where the login flow currently is
#[derive(Debug, Clone, PartialEq)]
pub enum FlowState {
    EnteringCredentials,
    /// The account spans several tenants; one must be chosen
    ChoosingTenant {
        tenants: Vec<TenantChoice>,
        email: String,
    },
    /// A 6-digit second-factor code is required
    EnteringCode,
}

/// What a submission did to the flow. `Error` keeps the current state so the
/// user can correct and resubmit; nothing is silently reset.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginAdvance {
    /// Session established; the shell should navigate to `destination`
    Authenticated { destination: String },
    /// Moved to tenant selection
    TenantSelection,
    /// Moved to (or stayed on) second-factor code entry
    CodeEntry,
    /// Stayed in place with an inline error message
    Error { message: String },
}

/// Orchestrates credential submission, tenant disambiguation, and the
/// second-factor challenge against the session manager. Lives as long as the
/// login page; discarded on navigation or success.
pub struct LoginFlow {
    session: SessionManager,
    id: Uuid,
    state: FlowState,
    email: String,
    password: String,
    two_factor_code: Option<String>,
    remember_device: bool,
    /// Chosen during disambiguation, so a 2FA resubmission lands on the
    /// right tenant
    selected_tenant: Option<String>,
    /// Explicit post-login destination from the `next` query parameter
    next: Option<String>,
}

impl LoginFlow {
    pub fn new(session: SessionManager, next: Option<&str>) -> Self {
        Self {
            session,
            id: Uuid::new_v4(),
            state: FlowState::EnteringCredentials,
            email: String::new(),
            password: String::new(),
            two_factor_code: None,
            remember_device: false,
            selected_tenant: None,
            next: next.map(str::to_string),
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    /// Last-used login email for prefilling the form
    pub async fn prefill_email(&self) -> Option<String> {
        self.session.store().auth_email().await
    }

    /// Submit credentials from the login form. An already-entered 2FA code
    /// (shown by some shells inline) is retained for later transitions.
    pub async fn submit_credentials(
        &mut self,
        email: &str,
        password: &str,
        two_factor_code: Option<&str>,
        remember_device: bool,
    ) -> LoginAdvance {
        self.email = email.to_string();
        self.password = password.to_string();
        self.two_factor_code = two_factor_code.map(str::to_string);
        self.remember_device = remember_device;
        self.selected_tenant = None;

        debug!(flow = %self.id, "Submitting credentials");
        let result = self
            .session
            .login(
                &self.email,
                &self.password,
                self.two_factor_code.as_deref(),
                self.remember_device,
            )
            .await;
        self.advance(result)
    }

    /// Pick a tenant from the disambiguation list
    pub async fn choose_tenant(&mut self, slug: &str) -> LoginAdvance {
        if !matches!(self.state, FlowState::ChoosingTenant { .. }) {
            return LoginAdvance::Error {
                message: "No tenant selection in progress".to_string(),
            };
        }

        debug!(flow = %self.id, tenant = %slug, "Logging in to chosen tenant");
        self.selected_tenant = Some(slug.to_string());
        let result = self
            .session
            .login_tenant(
                &self.email,
                &self.password,
                slug,
                self.two_factor_code.as_deref(),
                self.remember_device,
            )
            .await;
        self.advance(result)
    }

    /// Submit the 6-digit second-factor code, resubmitting the retained
    /// credentials (and tenant choice, if one was made)
    pub async fn submit_code(&mut self, code: &str) -> LoginAdvance {
        if !matches!(self.state, FlowState::EnteringCode) {
            return LoginAdvance::Error {
                message: "No second-factor challenge in progress".to_string(),
            };
        }

        self.two_factor_code = Some(code.to_string());
        debug!(flow = %self.id, "Submitting second-factor code");

        let result = match &self.selected_tenant {
            Some(slug) => {
                self.session
                    .login_tenant(
                        &self.email,
                        &self.password,
                        slug,
                        Some(code),
                        self.remember_device,
                    )
                    .await
            }
            None => {
                self.session
                    .login(&self.email, &self.password, Some(code), self.remember_device)
                    .await
            }
        };
        self.advance(result)
    }

    fn advance(&mut self, result: crate::error::Result<LoginOutcome>) -> LoginAdvance {
        match result {
            Ok(LoginOutcome::Success { user, tenant, .. }) => {
                let destination = resolve_destination(self.next.as_deref(), &user, tenant.as_ref());
                info!(flow = %self.id, destination = %destination, "Login flow completed");
                LoginAdvance::Authenticated { destination }
            }
            Ok(LoginOutcome::MultiTenant { tenants, email }) => {
                self.state = FlowState::ChoosingTenant { tenants, email };
                LoginAdvance::TenantSelection
            }
            Ok(LoginOutcome::TwoFactorRequired) => {
                self.state = FlowState::EnteringCode;
                LoginAdvance::CodeEntry
            }
            Ok(LoginOutcome::Rejected { message }) => LoginAdvance::Error { message },
            Err(e) if e.is_transport() => LoginAdvance::Error {
                message: UNREACHABLE_SERVER_MESSAGE.to_string(),
            },
            Err(e) => LoginAdvance::Error {
                message: e.to_string(),
            },
        }
    }
}

/// Resolve the post-login destination: an explicit same-origin-relative
/// `next` wins, then the super-admin tenants list, then the tenant
/// dashboard, then the login page as a last resort.
fn resolve_destination(next: Option<&str>, user: &User, tenant: Option<&Tenant>) -> String {
    if let Some(next) = next {
        if next.starts_with('/') && !next.starts_with("//") {
            return next.to_string();
        }
        debug!(next = %next, "Ignoring non-relative next parameter");
    }
    if user.is_super_admin {
        return SUPER_ADMIN_HOME.to_string();
    }
    if let Some(tenant) = tenant {
        return format!("/{}/dashboard", tenant.slug);
    }
    LOGIN_ROUTE.to_string()
}
