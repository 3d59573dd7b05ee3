//! Persistence seams for the gateway.
//!
//! Two stores back the system: the *intent store* (what tenants configured)
//! and the *resolver store* (the flat zone table the authoritative resolver
//! serves). Services depend on the traits, never on a concrete backend, so
//! cross-store invariants are testable with in-memory fakes.

pub mod intent;
pub mod resolver;

#[cfg(test)]
pub(crate) mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AttackLog, DnsRecord, Domain, RulePolicy, WafRule};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no resolver zone found for '{0}'")]
    ZoneNotFound(String),
    #[error("storage operation timed out")]
    Timeout,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Bounds a storage call with a deadline, mapping expiry to
/// [`StorageError::Timeout`]. Deadlines live at call sites because the
/// right budget depends on the operation (2 s for a stats increment,
/// 10 s for a full cache reload fetch).
pub async fn with_deadline<T, F>(secs: u64, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(res) => res,
        Err(_) => Err(StorageError::Timeout),
    }
}

/// Tenant-facing configuration store.
#[async_trait]
pub trait IntentStore: Send + Sync {
    // Domains
    async fn insert_domain(&self, domain: &Domain) -> StorageResult<()>;
    async fn get_domain(&self, id: &str) -> StorageResult<Option<Domain>>;
    async fn get_active_domain_by_name(&self, name: &str) -> StorageResult<Option<Domain>>;
    async fn list_domains(&self) -> StorageResult<Vec<Domain>>;
    async fn list_domains_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<Domain>>;
    async fn update_domain(&self, domain: &Domain) -> StorageResult<()>;
    async fn delete_domain(&self, id: &str) -> StorageResult<()>;
    /// Ownership takeover: drop every other row carrying `name`.
    async fn delete_domains_by_name_except(&self, name: &str, keep_id: &str) -> StorageResult<()>;
    async fn increment_domain_stats(
        &self,
        id: &str,
        total: i64,
        flagged: i64,
        blocked: i64,
    ) -> StorageResult<()>;

    // DNS records
    async fn insert_record(&self, record: &DnsRecord) -> StorageResult<()>;
    async fn get_record(&self, id: &str) -> StorageResult<Option<DnsRecord>>;
    async fn list_records(&self, domain_id: &str) -> StorageResult<Vec<DnsRecord>>;
    async fn list_all_records(&self) -> StorageResult<Vec<DnsRecord>>;
    async fn delete_record(&self, id: &str) -> StorageResult<()>;
    async fn delete_records_for_domain(&self, domain_id: &str) -> StorageResult<()>;
    /// The record the proxy forwards to for `host`: an A if one exists,
    /// otherwise a CNAME.
    async fn find_origin_record(&self, host: &str) -> StorageResult<Option<DnsRecord>>;

    // WAF rules
    async fn insert_rule(&self, rule: &WafRule) -> StorageResult<()>;
    async fn get_rule(&self, id: &str) -> StorageResult<Option<WafRule>>;
    async fn list_rules(&self) -> StorageResult<Vec<WafRule>>;
    async fn update_rule(&self, rule: &WafRule) -> StorageResult<()>;
    async fn delete_rule(&self, id: &str) -> StorageResult<()>;

    // Rule policies
    async fn upsert_policy(&self, policy: &RulePolicy) -> StorageResult<()>;
    async fn list_policies(&self) -> StorageResult<Vec<RulePolicy>>;

    // Attack logs
    async fn append_attack_log(&self, entry: &AttackLog) -> StorageResult<()>;
    async fn recent_attack_logs(&self, limit: usize) -> StorageResult<Vec<AttackLog>>;
}

/// One concrete resource record as published to the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverRecord {
    pub name: String,
    pub record_type: String,
    pub content: String,
    pub ttl: u32,
}

/// Authoritative-resolver backing store (PowerDNS-compatible layout).
#[async_trait]
pub trait ResolverStore: Send + Sync {
    /// Creates the zone row plus SOA and NS records. Idempotent: an
    /// existing zone is left untouched.
    async fn ensure_zone(&self, zone: &str, nameservers: &[String]) -> StorageResult<()>;
    async fn delete_zone(&self, zone: &str) -> StorageResult<()>;
    async fn zone_exists(&self, zone: &str) -> StorageResult<bool>;
    async fn insert_record(
        &self,
        name: &str,
        record_type: &str,
        content: &str,
        ttl: u32,
    ) -> StorageResult<()>;
    async fn delete_record(&self, name: &str, record_type: &str, content: &str)
        -> StorageResult<()>;
    /// Removes every A/AAAA/CNAME row of the zone (the proxy-mode swap).
    async fn delete_address_records(&self, zone: &str) -> StorageResult<()>;
    async fn zone_records(&self, zone: &str) -> StorageResult<Vec<ResolverRecord>>;
}
