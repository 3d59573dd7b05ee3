//! Data model shared across the gateway: configuration structs and the
//! tenant-facing records stored in the intent store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub client_timeout_secs: u64,
    pub keep_alive_secs: u64,
    /// Hostname the admin API answers on; always allowed by the host policy.
    pub admin_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverDbConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafConfig {
    /// Public IP the apex A record points at while proxy mode is on.
    pub public_ip: String,
    pub default_origin: String,
    /// Anomaly scorer endpoint. Empty string disables the ML tier.
    pub ml_url: String,
    pub ml_timeout_ms: u64,
    pub block_score: i32,
    pub hybrid_score: i32,
    pub ml_block_confidence: f64,
    pub ml_monitor_confidence: f64,
    pub ml_hybrid_confidence: f64,
    pub ml_tag_confidence: f64,
    pub max_body_bytes: usize,
    /// Effective enablement for rules with no policy override and no
    /// explicit default of their own.
    pub default_rule_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Labels of the nameserver pool; each is joined with `ns_suffix`.
    pub ns_pool: Vec<String>,
    pub ns_suffix: String,
    pub waf_record_ttl: u32,
    pub rdap_base_url: String,
    pub rdap_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub resolver_db: ResolverDbConfig,
    pub rate_limit: RateLimitConfig,
    pub waf: WafConfig,
    pub dns: DnsConfig,
}

// --- Domains ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    PendingVerification,
    Active,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainStats {
    pub total: i64,
    pub flagged: i64,
    pub blocked: i64,
}

/// A root zone owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub status: DomainStatus,
    /// The two pool members assigned at creation; the verification challenge.
    pub nameservers: Vec<String>,
    pub proxy_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: DomainStats,
}

// --- DNS records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Ns,
    Soa,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Ns => "NS",
            RecordType::Soa => "SOA",
        }
    }

    pub fn parse(s: &str) -> Option<RecordType> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Some(RecordType::A),
            "AAAA" => Some(RecordType::Aaaa),
            "CNAME" => Some(RecordType::Cname),
            "MX" => Some(RecordType::Mx),
            "TXT" => Some(RecordType::Txt),
            "NS" => Some(RecordType::Ns),
            "SOA" => Some(RecordType::Soa),
            _ => None,
        }
    }

    /// TXT/MX/NS/SOA are published verbatim regardless of proxy mode.
    pub fn is_proxiable(&self) -> bool {
        matches!(self, RecordType::A | RecordType::Aaaa | RecordType::Cname)
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tenant-configured record in the intent store. `name` is always the
/// fully qualified hostname (apex or subdomain of the owning zone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub domain_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
    pub origin_ssl: bool,
    pub created_at: DateTime<Utc>,
}

// --- WAF rules ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: String,
    pub value: Value,
    /// Built once at cache reload for regex-matched fields. A condition
    /// whose pattern failed to compile never matches.
    #[serde(skip)]
    pub compiled: Option<Regex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleAction {
    pub score_add: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub hard_block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafRule {
    pub id: String,
    /// Empty = global rule, evaluated for every tenant.
    #[serde(default)]
    pub owner_tenant_id: String,
    pub name: String,
    pub conditions: Vec<Condition>,
    pub on_match: RuleAction,
    #[serde(default)]
    pub priority: i32,
    /// Absent means "fall back to the configured default".
    #[serde(default)]
    pub default_enabled: Option<bool>,
}

/// Per-tenant enable/disable override. An empty `domain_id` applies
/// tenant-wide; a per-domain row outranks it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePolicy {
    pub tenant_id: String,
    pub rule_id: String,
    #[serde(default)]
    pub domain_id: String,
    pub enabled: bool,
}

// --- Attack log events ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackLog {
    pub id: String,
    pub tenant_id: String,
    pub domain_id: String,
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
    pub request_path: String,
    pub reason: String,
    pub source: String,
    pub tags: Vec<String>,
    pub action: String,
    pub rule_score: i32,
    pub ml_confidence: f64,
    pub request: FullRequest,
    pub trigger_payload: String,
}
