//! In-memory store fakes for exercising cross-store invariants in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::{AttackLog, DnsRecord, Domain, DomainStatus, RecordType, RulePolicy, WafRule};

use super::{IntentStore, ResolverRecord, ResolverStore, StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryIntentStore {
    pub domains: Mutex<Vec<Domain>>,
    pub records: Mutex<Vec<DnsRecord>>,
    pub rules: Mutex<Vec<WafRule>>,
    pub policies: Mutex<HashMap<String, RulePolicy>>,
    pub logs: Mutex<Vec<AttackLog>>,
    pub stat_increments: Mutex<Vec<(String, i64, i64, i64)>>,
    fail_rules: AtomicBool,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `list_rules` fail until cleared, to simulate a reload
    /// hitting a storage outage mid-fetch.
    pub fn set_fail_rules(&self, fail: bool) {
        self.fail_rules.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn insert_domain(&self, domain: &Domain) -> StorageResult<()> {
        self.domains.lock().unwrap().push(domain.clone());
        Ok(())
    }

    async fn get_domain(&self, id: &str) -> StorageResult<Option<Domain>> {
        Ok(self
            .domains
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn get_active_domain_by_name(&self, name: &str) -> StorageResult<Option<Domain>> {
        Ok(self
            .domains
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == name && d.status == DomainStatus::Active)
            .cloned())
    }

    async fn list_domains(&self) -> StorageResult<Vec<Domain>> {
        Ok(self.domains.lock().unwrap().clone())
    }

    async fn list_domains_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<Domain>> {
        Ok(self
            .domains
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn update_domain(&self, domain: &Domain) -> StorageResult<()> {
        let mut domains = self.domains.lock().unwrap();
        if let Some(existing) = domains.iter_mut().find(|d| d.id == domain.id) {
            *existing = domain.clone();
        }
        Ok(())
    }

    async fn delete_domain(&self, id: &str) -> StorageResult<()> {
        self.domains.lock().unwrap().retain(|d| d.id != id);
        Ok(())
    }

    async fn delete_domains_by_name_except(&self, name: &str, keep_id: &str) -> StorageResult<()> {
        self.domains
            .lock()
            .unwrap()
            .retain(|d| d.name != name || d.id == keep_id);
        Ok(())
    }

    async fn increment_domain_stats(
        &self,
        id: &str,
        total: i64,
        flagged: i64,
        blocked: i64,
    ) -> StorageResult<()> {
        self.stat_increments
            .lock()
            .unwrap()
            .push((id.to_string(), total, flagged, blocked));
        let mut domains = self.domains.lock().unwrap();
        if let Some(domain) = domains.iter_mut().find(|d| d.id == id) {
            domain.stats.total += total;
            domain.stats.flagged += flagged;
            domain.stats.blocked += blocked;
        }
        Ok(())
    }

    async fn insert_record(&self, record: &DnsRecord) -> StorageResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> StorageResult<Option<DnsRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_records(&self, domain_id: &str) -> StorageResult<Vec<DnsRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.domain_id == domain_id)
            .cloned()
            .collect())
    }

    async fn list_all_records(&self) -> StorageResult<Vec<DnsRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn delete_record(&self, id: &str) -> StorageResult<()> {
        self.records.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    async fn delete_records_for_domain(&self, domain_id: &str) -> StorageResult<()> {
        self.records
            .lock()
            .unwrap()
            .retain(|r| r.domain_id != domain_id);
        Ok(())
    }

    async fn find_origin_record(&self, host: &str) -> StorageResult<Option<DnsRecord>> {
        let records = self.records.lock().unwrap();
        let a = records
            .iter()
            .find(|r| r.name == host && r.record_type == RecordType::A);
        let cname = records
            .iter()
            .find(|r| r.name == host && r.record_type == RecordType::Cname);
        Ok(a.or(cname).cloned())
    }

    async fn insert_rule(&self, rule: &WafRule) -> StorageResult<()> {
        self.rules.lock().unwrap().push(rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> StorageResult<Option<WafRule>> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_rules(&self) -> StorageResult<Vec<WafRule>> {
        if self.fail_rules.load(Ordering::SeqCst) {
            return Err(StorageError::Timeout);
        }
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn update_rule(&self, rule: &WafRule) -> StorageResult<()> {
        let mut rules = self.rules.lock().unwrap();
        if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
            *existing = rule.clone();
        }
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> StorageResult<()> {
        self.rules.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    async fn upsert_policy(&self, policy: &RulePolicy) -> StorageResult<()> {
        let key = format!(
            "{}:{}:{}",
            policy.tenant_id, policy.rule_id, policy.domain_id
        );
        self.policies.lock().unwrap().insert(key, policy.clone());
        Ok(())
    }

    async fn list_policies(&self) -> StorageResult<Vec<RulePolicy>> {
        Ok(self.policies.lock().unwrap().values().cloned().collect())
    }

    async fn append_attack_log(&self, entry: &AttackLog) -> StorageResult<()> {
        self.logs.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn recent_attack_logs(&self, limit: usize) -> StorageResult<Vec<AttackLog>> {
        let logs = self.logs.lock().unwrap();
        Ok(logs.iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryResolverStore {
    pub zones: Mutex<Vec<String>>,
    pub records: Mutex<Vec<ResolverRecord>>,
}

impl MemoryResolverStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn zone_of<'a>(zones: &'a [String], name: &str) -> Option<&'a String> {
        zones
            .iter()
            .filter(|z| name == z.as_str() || name.ends_with(&format!(".{}", z)))
            .max_by_key(|z| z.len())
    }

    fn in_zone(record_name: &str, zone: &str) -> bool {
        record_name == zone || record_name.ends_with(&format!(".{}", zone))
    }
}

#[async_trait]
impl ResolverStore for MemoryResolverStore {
    async fn ensure_zone(&self, zone: &str, nameservers: &[String]) -> StorageResult<()> {
        let mut zones = self.zones.lock().unwrap();
        if zones.iter().any(|z| z == zone) {
            return Ok(());
        }
        zones.push(zone.to_string());
        let mut records = self.records.lock().unwrap();
        records.push(ResolverRecord {
            name: zone.to_string(),
            record_type: "SOA".to_string(),
            content: format!("{} hostmaster.{} 1", zone, zone),
            ttl: 3600,
        });
        for ns in nameservers {
            records.push(ResolverRecord {
                name: zone.to_string(),
                record_type: "NS".to_string(),
                content: ns.clone(),
                ttl: 3600,
            });
        }
        Ok(())
    }

    async fn delete_zone(&self, zone: &str) -> StorageResult<()> {
        self.zones.lock().unwrap().retain(|z| z != zone);
        self.records
            .lock()
            .unwrap()
            .retain(|r| !Self::in_zone(&r.name, zone));
        Ok(())
    }

    async fn zone_exists(&self, zone: &str) -> StorageResult<bool> {
        Ok(self.zones.lock().unwrap().iter().any(|z| z == zone))
    }

    async fn insert_record(
        &self,
        name: &str,
        record_type: &str,
        content: &str,
        ttl: u32,
    ) -> StorageResult<()> {
        let zones = self.zones.lock().unwrap();
        if Self::zone_of(&zones, name).is_none() {
            return Err(StorageError::ZoneNotFound(name.to_string()));
        }
        drop(zones);
        self.records.lock().unwrap().push(ResolverRecord {
            name: name.to_string(),
            record_type: record_type.to_string(),
            content: content.to_string(),
            ttl,
        });
        Ok(())
    }

    async fn delete_record(
        &self,
        name: &str,
        record_type: &str,
        content: &str,
    ) -> StorageResult<()> {
        self.records.lock().unwrap().retain(|r| {
            !(r.name == name && r.record_type == record_type && r.content == content)
        });
        Ok(())
    }

    async fn delete_address_records(&self, zone: &str) -> StorageResult<()> {
        self.records.lock().unwrap().retain(|r| {
            !(Self::in_zone(&r.name, zone)
                && matches!(r.record_type.as_str(), "A" | "AAAA" | "CNAME"))
        });
        Ok(())
    }

    async fn zone_records(&self, zone: &str) -> StorageResult<Vec<ResolverRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| Self::in_zone(&r.name, zone))
            .cloned()
            .collect())
    }
}
