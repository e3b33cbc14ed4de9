use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// Subject used for requests on public routes that carry no usable token.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Role prefix applied to claim values that don't already carry one.
pub const ROLE_PREFIX: &str = "ROLE_";

/// Verified caller context, derived once per request and immutable thereafter.
///
/// The anonymous identity (public routes) carries no roles and no tenant.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Subject claim, the unique caller identifier.
    pub subject: String,
    /// Tenant, from the configured claim or absent.
    pub tenant: Option<String>,
    /// Roles, normalized with [`ROLE_PREFIX`].
    pub roles: Vec<String>,
    /// Token expiry; `None` for the anonymous identity.
    pub expires_at: Option<DateTime<Utc>>,
    /// Short hash of the raw token, safe to log. Never the token itself.
    pub token_hash: Option<String>,
}

impl Identity {
    /// The single identity used for unauthenticated requests on public routes.
    pub fn anonymous() -> Self {
        Identity {
            subject: ANONYMOUS_SUBJECT.to_string(),
            tenant: None,
            roles: Vec::new(),
            expires_at: None,
            token_hash: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject == ANONYMOUS_SUBJECT
    }

    /// Check whether this identity holds a specific (already normalized) role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check whether this identity holds any of the given roles.
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|role| self.has_role(role.as_ref()))
    }

    /// Accounting key for this caller: `user:<subject>`, falling back to
    /// `ip:<peer>` for anonymous callers.
    pub fn client_key(&self, peer: IpAddr) -> String {
        if self.is_anonymous() {
            format!("ip:{peer}")
        } else {
            format!("user:{}", self.subject)
        }
    }
}

/// Prefix a role name with [`ROLE_PREFIX`] unless it already carries it.
/// Unprefixed claim values are uppercased so `admin` and `ADMIN` agree.
pub fn normalize_role(role: &str) -> String {
    if role.starts_with(ROLE_PREFIX) {
        role.to_string()
    } else {
        format!("{ROLE_PREFIX}{}", role.to_uppercase())
    }
}
