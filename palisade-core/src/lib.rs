pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod path;
pub mod request_id;

pub use config::{
    BreakerConfig, BulkheadConfig, ConfigError, GatewayConfig, IpReputationConfig,
    ListenerConfig, RatePolicyConfig, RetryConfig, RouteConfig, ScanConfig, TlsConfig,
    TokenConfig, UpstreamConfig,
};
pub use context::RequestContext;
pub use error::{ErrorBody, GatewayError, RateLimitExceeded};
pub use identity::Identity;
pub use path::normalize_path;
pub use request_id::{extract_or_generate, RequestId, REQUEST_ID_HEADER};
