use http::Method;

use palisade_core::config::RouteConfig;
use palisade_core::path::normalize_path;

/// One resolved route entry.
#[derive(Debug, Clone)]
pub struct Route {
    /// Normalized-path prefix this route owns.
    pub prefix: String,
    /// Accepted methods; empty means all.
    pub methods: Vec<Method>,
    pub upstream: String,
    pub required_roles: Vec<String>,
    pub rate_policy: Option<String>,
    pub idempotent: bool,
    pub public: bool,
}

impl Route {
    fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Whether retries may replay this method on this route.
    pub fn retries_allowed(&self, method: &Method) -> bool {
        self.idempotent
            || matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE)
    }
}

/// Longest-prefix route matcher over normalized paths.
///
/// Routes are sorted once at construction, longest prefix first, so lookup
/// is a linear scan that stops at the first (most specific) hit. Prefix
/// boundaries are respected: `/api/llm` matches `/api/llm/completion` but
/// not `/api/llmx`.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let mut routes: Vec<Route> = configs
            .iter()
            .map(|config| Route {
                prefix: normalize_path(&config.r#match),
                methods: config
                    .methods
                    .iter()
                    .filter_map(|m| m.to_uppercase().parse().ok())
                    .collect(),
                upstream: config.upstream.clone(),
                required_roles: config.required_roles.clone(),
                rate_policy: config.rate_policy.clone(),
                idempotent: config.idempotent,
                public: config.public,
            })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        RouteTable { routes }
    }

    /// Resolve a normalized path + method to the most specific route.
    pub fn resolve(&self, normalized_path: &str, method: &Method) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| prefix_matches(&route.prefix, normalized_path) && route.accepts(method))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        let configs = vec![
            RouteConfig {
                r#match: "/api/llm".into(),
                methods: vec!["POST".into()],
                upstream: "llm".into(),
                required_roles: vec!["ROLE_USER".into()],
                rate_policy: Some("ai".into()),
                idempotent: false,
                public: false,
            },
            RouteConfig {
                r#match: "/api/debates".into(),
                methods: vec![],
                upstream: "debate".into(),
                required_roles: vec!["ROLE_USER".into()],
                rate_policy: Some("default".into()),
                idempotent: false,
                public: false,
            },
            RouteConfig {
                r#match: "/api/debates/{id}/export".into(),
                methods: vec![],
                upstream: "export".into(),
                required_roles: vec![],
                rate_policy: None,
                idempotent: true,
                public: false,
            },
            RouteConfig {
                r#match: "/auth".into(),
                methods: vec![],
                upstream: "auth".into(),
                required_roles: vec![],
                rate_policy: Some("default".into()),
                idempotent: false,
                public: true,
            },
        ];
        RouteTable::from_config(&configs)
    }

    #[test]
    fn longest_prefix_wins() {
        let table = table();
        let route = table
            .resolve("/api/debates/{id}/export", &Method::GET)
            .unwrap();
        assert_eq!(route.upstream, "export");

        let route = table.resolve("/api/debates/{id}", &Method::GET).unwrap();
        assert_eq!(route.upstream, "debate");
    }

    #[test]
    fn method_filter_applies() {
        let table = table();
        assert!(table.resolve("/api/llm/completion", &Method::POST).is_some());
        assert!(table.resolve("/api/llm/completion", &Method::GET).is_none());
    }

    #[test]
    fn prefix_boundary_is_respected() {
        let table = table();
        assert!(table.resolve("/api/llmx", &Method::POST).is_none());
        assert!(table.resolve("/api/llm", &Method::POST).is_some());
    }

    #[test]
    fn unmatched_path_is_none() {
        assert!(table().resolve("/nothing/here", &Method::GET).is_none());
    }

    #[test]
    fn match_prefixes_are_normalized() {
        // Config said /api/debates/{id}/export; a versioned inbound path
        // normalizes to the same shape.
        let configs = vec![RouteConfig {
            r#match: "/api/v1/rag".into(),
            methods: vec![],
            upstream: "rag".into(),
            required_roles: vec![],
            rate_policy: None,
            idempotent: false,
            public: false,
        }];
        let table = RouteTable::from_config(&configs);
        assert!(table.resolve("/api/rag/search", &Method::GET).is_some());
    }

    #[test]
    fn retries_follow_method_and_route_idempotence() {
        let table = table();
        let llm = table.resolve("/api/llm", &Method::POST).unwrap();
        assert!(!llm.retries_allowed(&Method::POST));
        assert!(llm.retries_allowed(&Method::GET));

        let export = table
            .resolve("/api/debates/{id}/export", &Method::POST)
            .unwrap();
        assert!(export.retries_allowed(&Method::POST));
    }
}
