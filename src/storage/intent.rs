//! Redis-backed intent store.
//!
//! Each collection is one hash keyed by document id, with the document
//! serialized as JSON. Attack logs are a capped list, newest first.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;

use crate::models::{AttackLog, DnsRecord, Domain, RecordType, RulePolicy, WafRule};

use super::{IntentStore, StorageResult};

const DOMAINS_KEY: &str = "domains";
const RECORDS_KEY: &str = "dns_records";
const RULES_KEY: &str = "rules";
const POLICIES_KEY: &str = "rule_policies";
const LOGS_KEY: &str = "attack_logs";

/// Retained attack log entries; older ones are trimmed away.
const LOG_CAP: isize = 10_000;

pub struct RedisIntentStore {
    client: redis::Client,
}

impl RedisIntentStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn conn(&self) -> StorageResult<redis::aio::Connection> {
        Ok(self.client.get_async_connection().await?)
    }

    async fn put<T: serde::Serialize>(&self, key: &str, id: &str, doc: &T) -> StorageResult<()> {
        let json = serde_json::to_string(doc)?;
        let mut conn = self.conn().await?;
        let _: () = conn.hset(key, id, json).await?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str, id: &str) -> StorageResult<Option<T>> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.hget(key, id).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn fetch_all<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Vec<T>> {
        let mut conn = self.conn().await?;
        let values: Vec<String> = conn.hvals(key).await?;
        Ok(parse_documents(key, values))
    }

    async fn remove(&self, key: &str, id: &str) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hdel(key, id).await?;
        Ok(())
    }
}

/// Corrupt documents are skipped rather than failing the whole scan.
fn parse_documents<T: DeserializeOwned>(key: &str, values: Vec<String>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|json| match serde_json::from_str(&json) {
            Ok(doc) => Some(doc),
            Err(e) => {
                log::error!("Skipping unparseable document in '{}': {}", key, e);
                None
            }
        })
        .collect()
}

fn policy_field(policy: &RulePolicy) -> String {
    format!(
        "{}:{}:{}",
        policy.tenant_id, policy.rule_id, policy.domain_id
    )
}

#[async_trait]
impl IntentStore for RedisIntentStore {
    async fn insert_domain(&self, domain: &Domain) -> StorageResult<()> {
        self.put(DOMAINS_KEY, &domain.id, domain).await
    }

    async fn get_domain(&self, id: &str) -> StorageResult<Option<Domain>> {
        self.fetch(DOMAINS_KEY, id).await
    }

    async fn get_active_domain_by_name(&self, name: &str) -> StorageResult<Option<Domain>> {
        let domains: Vec<Domain> = self.fetch_all(DOMAINS_KEY).await?;
        Ok(domains
            .into_iter()
            .find(|d| d.name == name && d.status == crate::models::DomainStatus::Active))
    }

    async fn list_domains(&self) -> StorageResult<Vec<Domain>> {
        self.fetch_all(DOMAINS_KEY).await
    }

    async fn list_domains_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<Domain>> {
        let domains: Vec<Domain> = self.fetch_all(DOMAINS_KEY).await?;
        Ok(domains
            .into_iter()
            .filter(|d| d.tenant_id == tenant_id)
            .collect())
    }

    async fn update_domain(&self, domain: &Domain) -> StorageResult<()> {
        self.put(DOMAINS_KEY, &domain.id, domain).await
    }

    async fn delete_domain(&self, id: &str) -> StorageResult<()> {
        self.remove(DOMAINS_KEY, id).await
    }

    async fn delete_domains_by_name_except(&self, name: &str, keep_id: &str) -> StorageResult<()> {
        let domains: Vec<Domain> = self.fetch_all(DOMAINS_KEY).await?;
        let mut conn = self.conn().await?;
        for d in domains {
            if d.name == name && d.id != keep_id {
                let _: () = conn.hdel(DOMAINS_KEY, &d.id).await?;
            }
        }
        Ok(())
    }

    async fn increment_domain_stats(
        &self,
        id: &str,
        total: i64,
        flagged: i64,
        blocked: i64,
    ) -> StorageResult<()> {
        if let Some(mut domain) = self.get_domain(id).await? {
            domain.stats.total += total;
            domain.stats.flagged += flagged;
            domain.stats.blocked += blocked;
            self.update_domain(&domain).await?;
        }
        Ok(())
    }

    async fn insert_record(&self, record: &DnsRecord) -> StorageResult<()> {
        self.put(RECORDS_KEY, &record.id, record).await
    }

    async fn get_record(&self, id: &str) -> StorageResult<Option<DnsRecord>> {
        self.fetch(RECORDS_KEY, id).await
    }

    async fn list_records(&self, domain_id: &str) -> StorageResult<Vec<DnsRecord>> {
        let records: Vec<DnsRecord> = self.fetch_all(RECORDS_KEY).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.domain_id == domain_id)
            .collect())
    }

    async fn list_all_records(&self) -> StorageResult<Vec<DnsRecord>> {
        self.fetch_all(RECORDS_KEY).await
    }

    async fn delete_record(&self, id: &str) -> StorageResult<()> {
        self.remove(RECORDS_KEY, id).await
    }

    async fn delete_records_for_domain(&self, domain_id: &str) -> StorageResult<()> {
        let records: Vec<DnsRecord> = self.fetch_all(RECORDS_KEY).await?;
        let mut conn = self.conn().await?;
        for r in records {
            if r.domain_id == domain_id {
                let _: () = conn.hdel(RECORDS_KEY, &r.id).await?;
            }
        }
        Ok(())
    }

    async fn find_origin_record(&self, host: &str) -> StorageResult<Option<DnsRecord>> {
        let records: Vec<DnsRecord> = self.fetch_all(RECORDS_KEY).await?;
        let mut cname = None;
        for r in records {
            if r.name != host {
                continue;
            }
            match r.record_type {
                RecordType::A => return Ok(Some(r)),
                RecordType::Cname => cname = Some(r),
                _ => {}
            }
        }
        Ok(cname)
    }

    async fn insert_rule(&self, rule: &WafRule) -> StorageResult<()> {
        self.put(RULES_KEY, &rule.id, rule).await
    }

    async fn get_rule(&self, id: &str) -> StorageResult<Option<WafRule>> {
        self.fetch(RULES_KEY, id).await
    }

    async fn list_rules(&self) -> StorageResult<Vec<WafRule>> {
        self.fetch_all(RULES_KEY).await
    }

    async fn update_rule(&self, rule: &WafRule) -> StorageResult<()> {
        self.put(RULES_KEY, &rule.id, rule).await
    }

    async fn delete_rule(&self, id: &str) -> StorageResult<()> {
        self.remove(RULES_KEY, id).await
    }

    async fn upsert_policy(&self, policy: &RulePolicy) -> StorageResult<()> {
        self.put(POLICIES_KEY, &policy_field(policy), policy).await
    }

    async fn list_policies(&self) -> StorageResult<Vec<RulePolicy>> {
        self.fetch_all(POLICIES_KEY).await
    }

    async fn append_attack_log(&self, entry: &AttackLog) -> StorageResult<()> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(LOGS_KEY, json).await?;
        let _: () = conn.ltrim(LOGS_KEY, 0, LOG_CAP - 1).await?;
        Ok(())
    }

    async fn recent_attack_logs(&self, limit: usize) -> StorageResult<Vec<AttackLog>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Vec<String> = conn.lrange(LOGS_KEY, 0, limit as isize - 1).await?;
        Ok(parse_documents(LOGS_KEY, values))
    }
}
