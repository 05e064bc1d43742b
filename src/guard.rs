use crate::session::SessionSnapshot;

/// Decision a guard hands back to the routing shell. Guards are pure
/// functions of the session snapshot: no caching, re-evaluated per render.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Auth state is still loading; render nothing rather than flashing a
    /// redirect that a restored session would immediately undo
    Pending,
    /// Render the protected content
    Allow,
    /// Send the visitor to the login page, preserving where they were headed
    RedirectToLogin { next: Option<String> },
    /// Authenticated but not authorized here; send them home instead of to
    /// a login form that could not help them
    RedirectToTenantDashboard { slug: String },
}

/// Guard for routes that require any authenticated user
pub fn private_route(snapshot: &SessionSnapshot, path: &str) -> RouteDecision {
    if !snapshot.loaded {
        return RouteDecision::Pending;
    }
    if snapshot.user.is_none() {
        return RouteDecision::RedirectToLogin {
            next: Some(path.to_string()),
        };
    }
    RouteDecision::Allow
}

/// Guard for routes restricted to super admins
pub fn super_admin_route(snapshot: &SessionSnapshot, path: &str) -> RouteDecision {
    if !snapshot.loaded {
        return RouteDecision::Pending;
    }

    match &snapshot.user {
        None if !snapshot.has_token => RouteDecision::RedirectToLogin {
            next: Some(path.to_string()),
        },
        // A raw token without a validated user yet: render and let the next
        // API call's 401 settle it
        None => RouteDecision::Allow,
        Some(user) if !user.is_super_admin => match &snapshot.tenant {
            Some(tenant) => RouteDecision::RedirectToTenantDashboard {
                slug: tenant.slug.clone(),
            },
            None => RouteDecision::RedirectToLogin { next: None },
        },
        Some(_) => RouteDecision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Tenant, User};

    fn snapshot(loaded: bool, user: Option<User>, tenant: Option<Tenant>, has_token: bool) -> SessionSnapshot {
        SessionSnapshot {
            loaded,
            user,
            tenant,
            has_token,
        }
    }

    fn user(is_super_admin: bool) -> User {
        User {
            id: 1,
            email: "a@b.com".to_string(),
            name: None,
            is_super_admin,
        }
    }

    fn tenant(slug: &str) -> Tenant {
        Tenant {
            id: 5,
            slug: slug.to_string(),
            name: None,
            status: None,
        }
    }

    #[test]
    fn guards_render_nothing_until_loaded() {
        let pending = snapshot(false, None, None, false);
        assert_eq!(private_route(&pending, "/crm"), RouteDecision::Pending);
        assert_eq!(super_admin_route(&pending, "/admin"), RouteDecision::Pending);

        // Even with a cached token, no decision before the loaded flag
        let pending_with_token = snapshot(false, None, None, true);
        assert_eq!(private_route(&pending_with_token, "/crm"), RouteDecision::Pending);
    }

    #[test]
    fn private_route_redirects_anonymous_users_preserving_location() {
        let anon = snapshot(true, None, None, false);
        assert_eq!(
            private_route(&anon, "/billing/invoices"),
            RouteDecision::RedirectToLogin {
                next: Some("/billing/invoices".to_string())
            }
        );
    }

    #[test]
    fn private_route_allows_any_authenticated_user() {
        let signed_in = snapshot(true, Some(user(false)), Some(tenant("acme")), true);
        assert_eq!(private_route(&signed_in, "/crm"), RouteDecision::Allow);
    }

    #[test]
    fn super_admin_route_redirects_anonymous_with_next_param() {
        let anon = snapshot(true, None, None, false);
        assert_eq!(
            super_admin_route(&anon, "/admin/tenants"),
            RouteDecision::RedirectToLogin {
                next: Some("/admin/tenants".to_string())
            }
        );
    }

    #[test]
    fn super_admin_route_sends_regular_users_to_their_dashboard() {
        let regular = snapshot(true, Some(user(false)), Some(tenant("acme")), true);
        assert_eq!(
            super_admin_route(&regular, "/admin/tenants"),
            RouteDecision::RedirectToTenantDashboard {
                slug: "acme".to_string()
            }
        );

        // No resolvable tenant falls back to login
        let tenantless = snapshot(true, Some(user(false)), None, true);
        assert_eq!(
            super_admin_route(&tenantless, "/admin/tenants"),
            RouteDecision::RedirectToLogin { next: None }
        );
    }

    #[test]
    fn super_admin_route_allows_super_admins() {
        let admin = snapshot(true, Some(user(true)), None, true);
        assert_eq!(super_admin_route(&admin, "/admin/tenants"), RouteDecision::Allow);
    }
}
