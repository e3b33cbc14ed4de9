use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeZone, Utc};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use palisade_core::config::TokenConfig;
use palisade_core::identity::{normalize_role, Identity};

/// Typed identity-resolution failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No `Authorization` header, or a non-Bearer scheme.
    Missing,
    /// Not a decodable token shape.
    Malformed(String),
    SignatureInvalid,
    Expired,
    IssuerMismatch,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "missing bearer token"),
            TokenError::Malformed(msg) => write!(f, "malformed token: {msg}"),
            TokenError::SignatureInvalid => write!(f, "invalid token signature"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::IssuerMismatch => write!(f, "token issuer mismatch"),
        }
    }
}

impl std::error::Error for TokenError {}

impl TokenError {
    /// Metric label for the per-outcome counters.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenError::Missing => "missing",
            TokenError::Malformed(_) => "malformed",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::Expired => "expired",
            TokenError::IssuerMismatch => "issuer_mismatch",
        }
    }
}

/// Bearer-token verifier for HMAC-SHA256 tokens.
///
/// The verification key is loaded at startup and never fetched on the hot
/// path; [`TokenVerifier::rotate_secret`] swaps it under a lock while readers
/// keep working against the previously published `Arc`.
pub struct TokenVerifier {
    key: RwLock<Arc<DecodingKey>>,
    issuer: String,
    tenant_claim: String,
    roles_claim: String,
}

impl TokenVerifier {
    pub fn new(config: &TokenConfig) -> Self {
        TokenVerifier {
            key: RwLock::new(Arc::new(DecodingKey::from_secret(config.secret.as_bytes()))),
            issuer: config.issuer.clone(),
            tenant_claim: config.tenant_claim.clone(),
            roles_claim: config.roles_claim.clone(),
        }
    }

    /// Replace the verification key. In-flight verifications keep the key
    /// they already loaded.
    pub fn rotate_secret(&self, secret: &str) {
        let new_key = Arc::new(DecodingKey::from_secret(secret.as_bytes()));
        match self.key.write() {
            Ok(mut guard) => *guard = new_key,
            Err(poisoned) => *poisoned.into_inner() = new_key,
        }
        debug!("token verification key rotated");
    }

    fn current_key(&self) -> Arc<DecodingKey> {
        match self.key.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Resolve the caller identity from request headers.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<Identity, TokenError> {
        let token = extract_bearer(headers)?;
        self.verify(token)
    }

    /// Validate a raw token and build the [`Identity`].
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.validate_aud = false;

        let key = self.current_key();
        let data = decode::<serde_json::Value>(token, &key, &validation).map_err(|e| {
            let err = match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => TokenError::SignatureInvalid,
                _ => TokenError::Malformed(e.to_string()),
            };
            warn!(error = %err, "token verification failed");
            err
        })?;
        let claims = data.claims;

        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TokenError::Malformed("missing sub claim".into()))?
            .to_string();

        let tenant = claims
            .get(&self.tenant_claim)
            .and_then(|v| v.as_str())
            .map(String::from);

        let expires_at = claims.get("exp").and_then(|v| v.as_i64()).and_then(epoch);

        let identity = Identity {
            subject,
            tenant,
            roles: extract_roles(&claims, &self.roles_claim),
            expires_at,
            token_hash: Some(token_hash(token)),
        };
        debug!(sub = %identity.subject, "token verified");
        Ok(identity)
    }
}

/// Extract the Bearer token from request headers.
fn extract_bearer(headers: &HeaderMap) -> Result<&str, TokenError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::Missing)?;

    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("Bearer") || token.is_empty() {
        return Err(TokenError::Missing);
    }
    Ok(token)
}

/// Roles claim accepts both a list of strings and a single string.
fn extract_roles(claims: &serde_json::Value, roles_claim: &str) -> Vec<String> {
    match claims.get(roles_claim) {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(normalize_role)
            .collect(),
        Some(serde_json::Value::String(role)) => vec![normalize_role(role)],
        _ => Vec::new(),
    }
}

fn epoch(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Short SHA-256 prefix of the raw token, safe to put in logs.
fn token_hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
