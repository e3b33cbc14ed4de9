use http::HeaderMap;
use regex::Regex;
use tracing::debug;

use palisade_core::config::ScanConfig;

/// One pattern family the scanner knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatKind {
    SqlInjection,
    CommandInjection,
    Xxe,
    Xss,
    PathTraversal,
    LdapInjection,
    NoSqlInjection,
    PrototypePollution,
    SsrfInternalUrl,
    ScannerUserAgent,
    OversizePayload,
}

impl ThreatKind {
    /// Severity 1-10; 9+ blocks on its own.
    pub fn severity(&self) -> u8 {
        match self {
            ThreatKind::CommandInjection => 10,
            ThreatKind::SqlInjection | ThreatKind::ScannerUserAgent => 9,
            ThreatKind::Xxe | ThreatKind::PathTraversal | ThreatKind::SsrfInternalUrl => 8,
            ThreatKind::Xss
            | ThreatKind::NoSqlInjection
            | ThreatKind::PrototypePollution => 7,
            ThreatKind::LdapInjection => 6,
            ThreatKind::OversizePayload => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::SqlInjection => "SQL_INJECTION",
            ThreatKind::CommandInjection => "COMMAND_INJECTION",
            ThreatKind::Xxe => "XXE",
            ThreatKind::Xss => "XSS",
            ThreatKind::PathTraversal => "PATH_TRAVERSAL",
            ThreatKind::LdapInjection => "LDAP_INJECTION",
            ThreatKind::NoSqlInjection => "NOSQL_INJECTION",
            ThreatKind::PrototypePollution => "PROTOTYPE_POLLUTION",
            ThreatKind::SsrfInternalUrl => "SSRF_INTERNAL_URL",
            ThreatKind::ScannerUserAgent => "SCANNER_USER_AGENT",
            ThreatKind::OversizePayload => "OVERSIZE_PAYLOAD",
        }
    }
}

/// One detected pattern match.
#[derive(Debug, Clone)]
pub struct Threat {
    pub kind: ThreatKind,
    /// Where the match came from: `path`, `header:<name>`, or `payload`.
    pub location: Option<String>,
}

/// Aggregate outcome of all scanners for one request.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub threats: Vec<Threat>,
    pub total_risk: u32,
    pub blocked: bool,
    pub reason: Option<String>,
}

impl ScanResult {
    pub fn has(&self, kind: ThreatKind) -> bool {
        self.threats.iter().any(|t| t.kind == kind)
    }
}

/// Pattern-based threat detection over path, headers, and payload.
///
/// All regexes compile once at construction. Scanning never decodes the
/// payload semantically; it runs the families over the raw bytes interpreted
/// as (lossy) UTF-8.
pub struct Scanner {
    config: ScanConfig,
    sql: Regex,
    command: Regex,
    xxe: Regex,
    xss: Regex,
    traversal: Regex,
    ldap: Regex,
    nosql: Regex,
    prototype: Regex,
    ssrf: Regex,
}

/// User-agent fragments of well-known vulnerability scanners.
const SCANNER_AGENTS: &[&str] = &[
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "dirbuster",
    "gobuster",
    "wfuzz",
    "burp",
    "zaproxy",
    "owasp zap",
    "acunetix",
    "nessus",
    "metasploit",
    "hydra",
];

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Scanner {
            config,
            sql: compile(
                r"(?i)(\bunion\b.{0,40}\bselect\b|\bselect\b.{0,60}\bfrom\b|\binsert\s+into\b|\bdrop\s+table\b|\bdelete\s+from\b|\btruncate\s+table\b|'\s*or\s*'?\d+'?\s*=\s*'?\d+|--\s|;\s*drop\b|\bexec\s*\(|\bxp_cmdshell\b)",
            ),
            command: compile(
                r"(?i)(;\s*(?:ls|cat|rm|wget|curl|sh|bash|nc|chmod)\b|\|\s*(?:ls|cat|rm|nc|sh|bash)\b|\$\([^)]*\)|`[^`]+`|&&\s*(?:rm|curl|wget|cat)\b|/etc/passwd)",
            ),
            xxe: compile(r#"(?i)(<!DOCTYPE[^>]*\[|<!ENTITY\b|\bSYSTEM\s+["'])"#),
            xss: compile(
                r"(?i)(<\s*script\b|</\s*script|javascript\s*:|\bon(?:error|load|click|focus|mouseover)\s*=|<\s*iframe\b|document\s*\.\s*cookie|\beval\s*\()",
            ),
            traversal: compile(r"(?i)(\.\./|\.\.\\|%2e%2e%2f|%2e%2e/|\.\.%2f|%2e%2e%5c|%00|%0d|%0a)"),
            ldap: compile(r"[*()\\]|\x00"),
            nosql: compile(r#"(?i)(\$where\b|\$ne\b|\$gt\b|\$lt\b|\$regex\b|\$or\b|\$and\b|\$nin\b)"#),
            prototype: compile(r"(?i)(__proto__|\bconstructor\s*[\.\[]|\bprototype\s*[\.\[])"),
            ssrf: compile(
                r"(?i)\b(?:https?://(?:localhost|127\.\d{1,3}\.\d{1,3}\.\d{1,3}|0\.0\.0\.0|\[?::1\]?|169\.254\.\d{1,3}\.\d{1,3}|10\.\d{1,3}\.\d{1,3}\.\d{1,3}|172\.(?:1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3}|192\.168\.\d{1,3}\.\d{1,3}|metadata\.google)|(?:file|gopher|dict)://\S+)",
            ),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run every family over path, headers, and payload and aggregate the
    /// block decision.
    pub fn scan(&self, path: &str, headers: &HeaderMap, payload: &[u8]) -> ScanResult {
        if !self.config.enabled {
            return ScanResult::default();
        }

        let mut threats: Vec<Threat> = Vec::new();
        let mut push = |threats: &mut Vec<Threat>, kind: ThreatKind, location: String| {
            // One threat per (family, location); repeats add no signal.
            if !threats
                .iter()
                .any(|t| t.kind == kind && t.location.as_deref() == Some(location.as_str()))
            {
                threats.push(Threat {
                    kind,
                    location: Some(location),
                });
            }
        };

        if payload.len() > self.config.max_payload_bytes {
            push(&mut threats, ThreatKind::OversizePayload, "payload".into());
        }

        // Path: traversal sequences, literal and percent-encoded.
        if self.traversal.is_match(path) {
            push(&mut threats, ThreatKind::PathTraversal, "path".into());
        }

        // Headers: XSS and SQL patterns in any value; the User-Agent is also
        // classified against the scanner-name list.
        for (name, value) in headers {
            let Ok(value) = value.to_str() else { continue };
            if self.xss.is_match(value) {
                push(&mut threats, ThreatKind::Xss, format!("header:{name}"));
            }
            if self.sql.is_match(value) {
                push(&mut threats, ThreatKind::SqlInjection, format!("header:{name}"));
            }
            if name == &http::header::USER_AGENT {
                let lowered = value.to_ascii_lowercase();
                if SCANNER_AGENTS.iter().any(|agent| lowered.contains(agent)) {
                    push(
                        &mut threats,
                        ThreatKind::ScannerUserAgent,
                        format!("header:{name}"),
                    );
                }
            }
        }

        // Payload: every family.
        if !payload.is_empty() && payload.len() <= self.config.max_payload_bytes {
            let text = String::from_utf8_lossy(payload);
            let families: &[(&Regex, ThreatKind)] = &[
                (&self.sql, ThreatKind::SqlInjection),
                (&self.command, ThreatKind::CommandInjection),
                (&self.xxe, ThreatKind::Xxe),
                (&self.xss, ThreatKind::Xss),
                (&self.traversal, ThreatKind::PathTraversal),
                (&self.nosql, ThreatKind::NoSqlInjection),
                (&self.prototype, ThreatKind::PrototypePollution),
                (&self.ssrf, ThreatKind::SsrfInternalUrl),
            ];
            for (regex, kind) in families {
                if regex.is_match(&text) {
                    push(&mut threats, *kind, "payload".into());
                }
            }
            if self.config.ldap_enabled && self.ldap.is_match(&text) {
                push(&mut threats, ThreatKind::LdapInjection, "payload".into());
            }
        }

        let total_risk: u32 = threats.iter().map(|t| t.kind.severity() as u32).sum();
        let max_severity = threats.iter().map(|t| t.kind.severity()).max().unwrap_or(0);
        let blocked = max_severity >= self.config.block_severity
            || total_risk > self.config.block_risk
            || (self.config.strict_mode && !threats.is_empty());

        let reason = if blocked {
            let mut kinds: Vec<&str> = threats.iter().map(|t| t.kind.as_str()).collect();
            kinds.sort_unstable();
            kinds.dedup();
            Some(format!("Security threats detected: {}", kinds.join(" ")))
        } else {
            None
        };

        if !threats.is_empty() {
            debug!(
                threats = threats.len(),
                total_risk, blocked, "scan found threats"
            );
        }

        ScanResult {
            threats,
            total_risk,
            blocked,
            reason,
        }
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("scanner pattern must compile")
}
