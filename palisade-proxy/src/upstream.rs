use std::time::Duration;

use palisade_core::config::{ConfigError, UpstreamConfig};
use url::Url;

/// One backend service target with its own connection pool.
///
/// The pool is owned by the `reqwest` client: sized per config, entries
/// health-checked on reuse by the underlying hyper pool, idle connections
/// dropped after the idle timeout. Redirects are never followed; the
/// gateway passes 3xx responses through untouched.
pub struct Upstream {
    name: String,
    base_url: Url,
    attempt_timeout: Duration,
    client: reqwest::Client,
}

impl Upstream {
    pub fn from_config(name: &str, config: &UpstreamConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::Parse(format!("upstream {name}: {e}")))?;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_size)
            .pool_idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::Parse(format!("upstream {name}: {e}")))?;

        Ok(Upstream {
            name: name.to_string(),
            base_url,
            attempt_timeout: Duration::from_millis(config.timeout_ms),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Per-attempt timeout; the resilience envelope clamps it to the
    /// remaining request deadline.
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Join the original path and query onto the base URL.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Result<Url, url::ParseError> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        url.set_query(query);
        Ok(url)
    }
}
