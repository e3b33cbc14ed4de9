use palisade_core::identity::{normalize_role, Identity};
use tracing::debug;

/// Role required for the admin/diagnostic surface.
pub const ADMIN_ROLE: &str = "ROLE_ADMIN";

/// Check a route's role requirements against the caller identity.
///
/// An empty requirement list means the route is open to any resolved
/// identity. Requirement entries are normalized the same way claim roles
/// are, so configs may say `admin` or `ROLE_ADMIN` interchangeably.
pub fn check_route_access(identity: &Identity, required_roles: &[String]) -> bool {
    if required_roles.is_empty() {
        return true;
    }
    let allowed = required_roles
        .iter()
        .map(|role| normalize_role(role))
        .any(|role| identity.has_role(&role));
    if !allowed {
        debug!(
            subject = %identity.subject,
            required = ?required_roles,
            "role check failed"
        );
    }
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_with(roles: &[&str]) -> Identity {
        let mut id = Identity::anonymous();
        id.subject = "u-1".into();
        id.roles = roles.iter().map(|r| r.to_string()).collect();
        id
    }

    #[test]
    fn empty_requirements_pass() {
        assert!(check_route_access(&Identity::anonymous(), &[]));
    }

    #[test]
    fn any_required_role_suffices() {
        let id = identity_with(&["ROLE_USER"]);
        assert!(check_route_access(
            &id,
            &["ROLE_ADMIN".to_string(), "ROLE_USER".to_string()]
        ));
    }

    #[test]
    fn missing_role_denies() {
        let id = identity_with(&["ROLE_USER"]);
        assert!(!check_route_access(&id, &["ROLE_ADMIN".to_string()]));
    }

    #[test]
    fn requirements_are_normalized() {
        let id = identity_with(&["ROLE_ADMIN"]);
        assert!(check_route_access(&id, &["admin".to_string()]));
    }

    #[test]
    fn anonymous_never_passes_a_role_check() {
        assert!(!check_route_access(
            &Identity::anonymous(),
            &["ROLE_USER".to_string()]
        ));
    }
}
