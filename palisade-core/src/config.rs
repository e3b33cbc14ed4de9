//! Gateway configuration.
//!
//! Typed structs deserialized from `application.yaml`, with an optional
//! `application-{profile}.yaml` overlay merged on top. `.env` files are
//! loaded into the process environment first (never overwriting already-set
//! variables), then a small set of scalar env overrides is applied:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `PALISADE_LISTENER_ADDRESS` | `listener.address` |
//! | `PALISADE_TOKEN_SECRET` | `token.secret` |
//! | `PALISADE_TOKEN_ISSUER` | `token.issuer` |
//!
//! Profile comes from `PALISADE_PROFILE` (default `dev`).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading a config file.
    Io(String),
    /// The YAML could not be parsed or did not match the schema.
    Parse(String),
    /// A required value is missing after all sources were merged.
    Missing(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "config read error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
            ConfigError::Missing(key) => write!(f, "missing config value: {key}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub listener: ListenerConfig,
    pub token: TokenConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub rate_policies: HashMap<String, RatePolicyConfig>,
    #[serde(default)]
    pub upstreams: HashMap<String, UpstreamConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub ip_reputation: IpReputationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            address: default_address(),
            tls: None,
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// HMAC-SHA256 signing secret shared with the identity provider.
    pub secret: String,
    pub issuer: String,
    #[serde(default = "default_tenant_claim")]
    pub tenant_claim: String,
    #[serde(default = "default_roles_claim")]
    pub roles_claim: String,
}

fn default_tenant_claim() -> String {
    "organization_id".to_string()
}

fn default_roles_claim() -> String {
    "roles".to_string()
}

/// One route entry. Matching is longest-prefix over the normalized path.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Normalized-path prefix, e.g. `/api/llm`.
    pub r#match: String,
    /// Accepted methods; empty means all.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Name of the upstream in `upstreams{}`.
    pub upstream: String,
    /// Roles required to pass RBAC; empty means no role needed.
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Name of the rate policy in `rate_policies{}`; absent means unlimited.
    #[serde(default)]
    pub rate_policy: Option<String>,
    /// Routes marked idempotent may retry non-idempotent methods.
    #[serde(default)]
    pub idempotent: bool,
    /// Public routes skip identity enforcement (anonymous allowed).
    #[serde(default)]
    pub public: bool,
}

/// Rate policy: strategy plus replenish/burst numbers.
#[derive(Debug, Clone, Deserialize)]
pub struct RatePolicyConfig {
    /// One of: `user`, `ip`, `api_key`, `path`, `tenant`, `role`, `composite`.
    pub strategy: String,
    pub replenish_rate: u64,
    pub burst_capacity: u64,
    #[serde(default = "default_window")]
    pub window_seconds: u64,
}

fn default_window() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub bulkhead: BulkheadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

fn default_pool_size() -> usize {
    32
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkheadConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        BulkheadConfig {
            max_concurrent: default_max_concurrent(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

fn default_max_concurrent() -> usize {
    64
}

fn default_max_wait_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            base_ms: default_base_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Rolling window size in calls.
    #[serde(default = "default_breaker_window")]
    pub window: usize,
    /// Failure ratio that opens the breaker.
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    /// Minimum calls in the window before the ratio is evaluated.
    #[serde(default = "default_min_calls")]
    pub min_calls: usize,
    /// How long the breaker stays open before half-open.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            window: default_breaker_window(),
            failure_ratio: default_failure_ratio(),
            min_calls: default_min_calls(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_breaker_window() -> usize {
    10
}

fn default_failure_ratio() -> f64 {
    0.5
}

fn default_min_calls() -> usize {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_block_severity")]
    pub block_severity: u8,
    #[serde(default = "default_block_risk")]
    pub block_risk: u32,
    /// The LDAP family matches very broadly (`*`, `(`, `)`); off by default.
    #[serde(default)]
    pub ldap_enabled: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            enabled: true,
            strict_mode: false,
            max_payload_bytes: default_max_payload(),
            block_severity: default_block_severity(),
            block_risk: default_block_risk(),
            ldap_enabled: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_payload() -> usize {
    1_048_576
}

fn default_block_severity() -> u8 {
    9
}

fn default_block_risk() -> u32 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpReputationConfig {
    /// Reputation service endpoint; lookups are disabled when absent.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reputation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_reputation_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for IpReputationConfig {
    fn default() -> Self {
        IpReputationConfig {
            url: None,
            timeout_ms: default_reputation_timeout_ms(),
            cache_ttl_secs: default_reputation_cache_ttl(),
        }
    }
}

fn default_reputation_timeout_ms() -> u64 {
    2_000
}

fn default_reputation_cache_ttl() -> u64 {
    300
}

impl GatewayConfig {
    /// Load configuration from `application.yaml` in `dir`, with profile
    /// overlay and env overrides applied.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let profile =
            std::env::var("PALISADE_PROFILE").unwrap_or_else(|_| "dev".to_string());
        let _ = dotenvy::from_filename(format!(".env.{profile}"));

        let base = read_yaml(&dir.join("application.yaml"))?
            .ok_or(ConfigError::Missing("application.yaml"))?;
        let merged = match read_yaml(&dir.join(format!("application-{profile}.yaml")))? {
            Some(overlay) => merge_yaml(base, overlay),
            None => base,
        };

        let mut config: GatewayConfig = serde_yaml::from_value(merged)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string. Mostly for tests.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PALISADE_LISTENER_ADDRESS") {
            self.listener.address = addr;
        }
        if let Ok(secret) = std::env::var("PALISADE_TOKEN_SECRET") {
            self.token.secret = secret;
        }
        if let Ok(issuer) = std::env::var("PALISADE_TOKEN_ISSUER") {
            self.token.issuer = issuer;
        }
    }
}

fn read_yaml(path: &Path) -> Result<Option<serde_yaml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let value = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(Some(value))
}

/// Merge `overlay` onto `base`. Mappings merge recursively; anything else
/// (scalars, sequences) is replaced wholesale by the overlay value.
fn merge_yaml(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(mut base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.remove(&key) {
                    Some(base_value) => {
                        base_map.insert(key, merge_yaml(base_value, overlay_value));
                    }
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
            serde_yaml::Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
token:
  secret: super-secret
  issuer: idp.example.com
routes:
  - match: /api/debates
    upstream: debate
    required_roles: [ROLE_USER]
    rate_policy: default
upstreams:
  debate:
    base_url: http://debate:8080
rate_policies:
  default:
    strategy: user
    replenish_rate: 10
    burst_capacity: 20
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = GatewayConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.listener.address, "0.0.0.0:8080");
        assert_eq!(config.token.tenant_claim, "organization_id");
        assert_eq!(config.routes.len(), 1);
        assert!(!config.routes[0].idempotent);

        let upstream = &config.upstreams["debate"];
        assert_eq!(upstream.pool_size, 32);
        assert_eq!(upstream.breaker.failure_ratio, 0.5);
        assert_eq!(upstream.bulkhead.max_concurrent, 64);
        assert_eq!(upstream.retry.max_attempts, 3);

        let policy = &config.rate_policies["default"];
        assert_eq!(policy.window_seconds, 1);
        assert_eq!(policy.burst_capacity, 20);

        assert!(config.scan.enabled);
        assert!(!config.scan.strict_mode);
        assert!(!config.scan.ldap_enabled);
        assert_eq!(config.scan.block_severity, 9);
        assert_eq!(config.scan.block_risk, 15);
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let bad = format!("{MINIMAL}\nnot_a_key: 1\n");
        assert!(GatewayConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn profile_overlay_merges_mappings_and_replaces_scalars() {
        let base: serde_yaml::Value = serde_yaml::from_str(
            "listener:\n  address: 0.0.0.0:8080\nscan:\n  strict_mode: false\n",
        )
        .unwrap();
        let overlay: serde_yaml::Value =
            serde_yaml::from_str("scan:\n  strict_mode: true\n").unwrap();
        let merged = merge_yaml(base, overlay);
        assert_eq!(merged["listener"]["address"], "0.0.0.0:8080");
        assert_eq!(merged["scan"]["strict_mode"], true);
    }

    #[test]
    fn load_reads_files_and_overlay() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("application.yaml"), MINIMAL).unwrap();
        std::fs::write(
            dir.path().join("application-dev.yaml"),
            "listener:\n  address: 127.0.0.1:9999\n",
        )
        .unwrap();
        let config = GatewayConfig::load(dir.path()).unwrap();
        assert_eq!(config.listener.address, "127.0.0.1:9999");
        assert_eq!(config.token.secret, "super-secret");
    }
}
