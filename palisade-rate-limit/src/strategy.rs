use palisade_core::RequestContext;

/// Header consulted by the api-key strategy.
pub const API_KEY_HEADER: &str = "x-api-key";

/// How the accounting key is derived from a request.
///
/// Two distinct strategies never share a bucket: every derived key carries
/// the strategy's own prefix shape. The fallback chains bottom out at
/// `user:`/`ip:` keys, so an anonymous caller hitting a user-keyed policy
/// lands in the IP bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateStrategy {
    /// `user:<subject>`, falling back to `ip:<peer>` when anonymous.
    User,
    /// `ip:<peer>`.
    Ip,
    /// `apikey:<header>`, falling back to user then IP.
    ApiKey,
    /// `<user-or-ip>:path:<normalized-path>`.
    Path,
    /// `org:<tenant>`, falling back to user then IP.
    Tenant,
    /// `role:<role>:user:<subject>`, falling back to user/IP.
    Role,
    /// `<user-or-ip>[:org:<tenant>]:path:<normalized-path>`.
    Composite,
}

impl RateStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(RateStrategy::User),
            "ip" => Some(RateStrategy::Ip),
            "api_key" | "apikey" => Some(RateStrategy::ApiKey),
            "path" => Some(RateStrategy::Path),
            "tenant" | "org" => Some(RateStrategy::Tenant),
            "role" => Some(RateStrategy::Role),
            "composite" => Some(RateStrategy::Composite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateStrategy::User => "user",
            RateStrategy::Ip => "ip",
            RateStrategy::ApiKey => "api_key",
            RateStrategy::Path => "path",
            RateStrategy::Tenant => "tenant",
            RateStrategy::Role => "role",
            RateStrategy::Composite => "composite",
        }
    }

    /// Derive the bucket key for this request.
    pub fn resolve_key(&self, ctx: &RequestContext) -> String {
        match self {
            RateStrategy::User => ctx.client_key(),
            RateStrategy::Ip => format!("ip:{}", ctx.peer),
            RateStrategy::ApiKey => match ctx.header(API_KEY_HEADER) {
                Some(key) if !key.is_empty() => format!("apikey:{key}"),
                _ => ctx.client_key(),
            },
            RateStrategy::Path => {
                format!("{}:path:{}", ctx.client_key(), ctx.normalized_path)
            }
            RateStrategy::Tenant => match &ctx.identity.tenant {
                Some(tenant) => format!("org:{tenant}"),
                None => ctx.client_key(),
            },
            RateStrategy::Role => match ctx.identity.roles.first() {
                Some(role) if !ctx.identity.is_anonymous() => {
                    format!("role:{role}:user:{}", ctx.identity.subject)
                }
                _ => ctx.client_key(),
            },
            RateStrategy::Composite => {
                let mut key = ctx.client_key();
                if let Some(tenant) = &ctx.identity.tenant {
                    key.push_str(":org:");
                    key.push_str(tenant);
                }
                key.push_str(":path:");
                key.push_str(&ctx.normalized_path);
                key
            }
        }
    }
}
