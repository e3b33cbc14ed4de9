use std::net::IpAddr;
use std::time::Duration;

use palisade_cache::TtlCache;
use palisade_core::config::IpReputationConfig;
use serde::Deserialize;
use tracing::{debug, warn};

/// Verdict for one peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationVerdict {
    Clean,
    Malicious,
    /// Lookup disabled, timed out, or failed; treated as allow.
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ReputationResponse {
    malicious: bool,
    #[serde(default)]
    #[allow(dead_code)]
    score: Option<f64>,
}

/// Best-effort client for an external IP reputation service.
///
/// Lookups are bounded by the configured timeout and cached per address.
/// Any failure is an allow: the reputation service being down must never
/// take the gateway down with it.
pub struct IpReputationClient {
    client: reqwest::Client,
    url: Option<String>,
    cache: TtlCache<IpAddr, ReputationVerdict>,
}

impl IpReputationClient {
    pub fn new(config: &IpReputationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        IpReputationClient {
            client,
            url: config.url.clone(),
            cache: TtlCache::new(Duration::from_secs(config.cache_ttl_secs)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Look up one address, consulting the cache first.
    pub async fn check(&self, ip: IpAddr) -> ReputationVerdict {
        let Some(url) = &self.url else {
            return ReputationVerdict::Unknown;
        };
        if let Some(verdict) = self.cache.get(&ip) {
            return verdict;
        }

        let verdict = match self.lookup(url, ip).await {
            Ok(verdict) => verdict,
            Err(error) => {
                warn!(%ip, error = %error, "reputation lookup failed, allowing");
                ReputationVerdict::Unknown
            }
        };
        self.cache.insert(ip, verdict);
        verdict
    }

    async fn lookup(&self, url: &str, ip: IpAddr) -> Result<ReputationVerdict, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .query(&[("ip", ip.to_string())])
            .send()
            .await?;
        if !response.status().is_success() {
            debug!(%ip, status = %response.status(), "reputation service non-success");
            return Ok(ReputationVerdict::Unknown);
        }
        let body: ReputationResponse = response.json().await?;
        Ok(if body.malicious {
            ReputationVerdict::Malicious
        } else {
            ReputationVerdict::Clean
        })
    }
}
