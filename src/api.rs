use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::ApiClient;

// Backend endpoints for the session lifecycle
const LOGIN_PATH: &str = "auth/login";
const LOGIN_TENANT_PATH: &str = "auth/login/tenant";
const REFRESH_PATH: &str = "auth/refresh";
const ME_PATH: &str = "auth/me";
const LOGOUT_PATH: &str = "auth/logout";
const TWO_FACTOR_SETUP_PATH: &str = "auth/2fa/setup";
const TWO_FACTOR_VERIFY_PATH: &str = "auth/2fa/verify";
const TWO_FACTOR_DISABLE_PATH: &str = "auth/2fa/disable";
const TWO_FACTOR_STATUS_PATH: &str = "auth/2fa/status";

/// The authenticated user as the backend reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_super_admin: bool,
}

/// The active business account a session is scoped to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: i64,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One entry in the multi-tenant disambiguation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantChoice {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Canonical current identity as returned by `me`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user: User,
    #[serde(default)]
    pub tenant: Option<Tenant>,
}

/// Every way a login call can resolve. One variant per case, so callers are
/// forced to handle all branches; HTTP status alone does not decide the shape.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// Single-tenant success: token issued, identity known
    Success {
        access: String,
        user: User,
        tenant: Option<Tenant>,
    },
    /// The account belongs to several tenants; caller must disambiguate
    MultiTenant {
        tenants: Vec<TenantChoice>,
        email: String,
    },
    /// A second factor is required; resubmit with a 6-digit code
    TwoFactorRequired,
    /// The server rejected the credentials (or the 2FA code)
    Rejected { message: String },
}

/// Outcome of verifying a 2FA enrollment code
#[derive(Debug, Clone, PartialEq)]
pub enum TwoFactorVerifyOutcome {
    /// Enrollment complete. Backup codes are issued exactly once and never
    /// stored by this crate.
    Verified { backup_codes: Vec<String> },
    Rejected { message: String },
}

/// Outcome of disabling the second factor
#[derive(Debug, Clone, PartialEq)]
pub enum TwoFactorDisableOutcome {
    Disabled,
    Rejected { message: String },
}

/// Two-factor enrollment material returned by setup
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetup {
    pub secret: String,
    #[serde(default)]
    pub otpauth_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorStatus {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_slug: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    two_factor_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remember_device: Option<bool>,
}

/// Raw shape of a login response. The backend multiplexes all branches over
/// one object; [`LoginOutcome::from_reply`] lifts it into the tagged form.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginReply {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    tenant: Option<Tenant>,
    #[serde(default)]
    multi_tenant: bool,
    #[serde(default)]
    tenants: Vec<TenantChoice>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    requires_two_factor: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshReply {
    #[serde(default)]
    access: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TwoFactorVerifyReply {
    #[serde(default)]
    backup_codes: Vec<String>,
}

impl LoginOutcome {
    fn from_reply(reply: LoginReply, fallback_email: &str) -> Result<Self> {
        if reply.requires_two_factor {
            return Ok(LoginOutcome::TwoFactorRequired);
        }
        if reply.multi_tenant {
            return Ok(LoginOutcome::MultiTenant {
                tenants: reply.tenants,
                email: reply.email.unwrap_or_else(|| fallback_email.to_string()),
            });
        }
        if let (Some(access), Some(user)) = (reply.access, reply.user) {
            return Ok(LoginOutcome::Success {
                access,
                user,
                tenant: reply.tenant,
            });
        }
        if let Some(error) = reply.error {
            return Ok(LoginOutcome::Rejected { message: error });
        }

        Err(Error::InvalidResponse {
            reason: "login response matched no known shape".to_string(),
        })
    }
}

/// Typed operations over the session lifecycle endpoints.
///
/// Expected authentication failures come back as outcome variants; `Err` is
/// reserved for transport failures, server faults, and malformed responses.
#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Log in with credentials, optionally carrying a 2FA code
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        two_factor_code: Option<&str>,
        remember_device: bool,
    ) -> Result<LoginOutcome> {
        self.submit_login(
            LOGIN_PATH,
            LoginRequest {
                email,
                password,
                tenant_slug: None,
                two_factor_code,
                remember_device: remember_device.then_some(true),
            },
        )
        .await
    }

    /// Log in to a specific tenant after disambiguation
    pub async fn login_tenant(
        &self,
        email: &str,
        password: &str,
        tenant_slug: &str,
        two_factor_code: Option<&str>,
        remember_device: bool,
    ) -> Result<LoginOutcome> {
        self.submit_login(
            LOGIN_TENANT_PATH,
            LoginRequest {
                email,
                password,
                tenant_slug: Some(tenant_slug),
                two_factor_code,
                remember_device: remember_device.then_some(true),
            },
        )
        .await
    }

    async fn submit_login(&self, path: &str, request: LoginRequest<'_>) -> Result<LoginOutcome> {
        let email = request.email.to_string();
        match self.client.post::<LoginReply, _>(path, &request).await {
            Ok(reply) => LoginOutcome::from_reply(reply, &email),
            // Rejections arrive as 4xx, but the body still decides the shape:
            // a 401 can be a plain rejection or a 2FA challenge.
            Err(Error::Api {
                status,
                message,
                payload,
            }) if status.is_client_error() => {
                let reply = payload
                    .and_then(|value| serde_json::from_value::<LoginReply>(value).ok())
                    .unwrap_or_default();
                if reply.requires_two_factor {
                    Ok(LoginOutcome::TwoFactorRequired)
                } else if reply.multi_tenant {
                    LoginOutcome::from_reply(reply, &email)
                } else {
                    Ok(LoginOutcome::Rejected {
                        message: reply.error.unwrap_or(message),
                    })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Attempt a silent renewal using the HTTP-only refresh credential held
    /// in the client's cookie jar. `Ok(None)` means the server answered and
    /// there is no usable session; that is not an error, it is "not logged
    /// in". `Err` is reserved for transport failures.
    pub async fn refresh(&self) -> Result<Option<String>> {
        match self
            .client
            .post::<RefreshReply, _>(REFRESH_PATH, &serde_json::json!({}))
            .await
        {
            Ok(reply) => Ok(reply.access),
            Err(e @ Error::Api { .. }) => {
                debug!(error = %e, "Refresh rejected by server, treating as not logged in");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Validate the current access token and return the canonical identity.
    /// Idempotent and side-effect-free; safe to call repeatedly.
    pub async fn me(&self) -> Result<Identity> {
        self.client.get(ME_PATH).await
    }

    /// Invalidate server-side session state. Callers clear local state no
    /// matter what this returns.
    pub async fn logout(&self) -> Result<()> {
        self.client.post_empty(LOGOUT_PATH).await
    }

    /// Begin two-factor enrollment for the current user
    pub async fn setup_two_factor(&self) -> Result<TwoFactorSetup> {
        self.client
            .post(TWO_FACTOR_SETUP_PATH, &serde_json::json!({}))
            .await
    }

    /// Confirm enrollment with a code from the authenticator
    pub async fn verify_two_factor(&self, code: &str) -> Result<TwoFactorVerifyOutcome> {
        let body = serde_json::json!({ "code": code });
        match self
            .client
            .post::<TwoFactorVerifyReply, _>(TWO_FACTOR_VERIFY_PATH, &body)
            .await
        {
            Ok(reply) => Ok(TwoFactorVerifyOutcome::Verified {
                backup_codes: reply.backup_codes,
            }),
            Err(Error::Api { status, message, .. }) if status.is_client_error() => {
                Ok(TwoFactorVerifyOutcome::Rejected { message })
            }
            Err(e) => Err(e),
        }
    }

    /// Turn the second factor off, re-authenticating with the password
    pub async fn disable_two_factor(&self, password: &str) -> Result<TwoFactorDisableOutcome> {
        let body = serde_json::json!({ "password": password });
        match self
            .client
            .post::<serde_json::Value, _>(TWO_FACTOR_DISABLE_PATH, &body)
            .await
        {
            Ok(_) => Ok(TwoFactorDisableOutcome::Disabled),
            Err(Error::Api { status, message, .. }) if status.is_client_error() => {
                Ok(TwoFactorDisableOutcome::Rejected { message })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn two_factor_status(&self) -> Result<TwoFactorStatus> {
        self.client.get(TWO_FACTOR_STATUS_PATH).await
    }
}
