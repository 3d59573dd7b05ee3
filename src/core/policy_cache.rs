//! Read-mostly routing index: host -> (tenant metadata, effective ruleset).
//!
//! Rebuilt from the intent store on startup and after any configuration
//! mutation, then swapped atomically under the write lock. Readers copy
//! their two lookups out and release the lock before doing any work, so
//! reloads never stall the request path for long.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{Domain, DomainStatus, WafRule};
use crate::storage::{with_deadline, IntentStore, StorageResult};

const RELOAD_DEADLINE_SECS: u64 = 10;

/// Routing metadata for one host.
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub tenant_id: String,
    pub domain_id: String,
    pub proxy_enabled: bool,
}

#[derive(Default)]
struct CacheInner {
    hosts: HashMap<String, HostEntry>,
    rules: HashMap<String, Arc<Vec<WafRule>>>,
}

pub struct PolicyCache {
    intent: Arc<dyn IntentStore>,
    admin_host: String,
    default_rule_enabled: bool,
    inner: RwLock<CacheInner>,
}

impl PolicyCache {
    pub fn new(intent: Arc<dyn IntentStore>, admin_host: String, default_rule_enabled: bool) -> Self {
        Self {
            intent,
            admin_host,
            default_rule_enabled,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Copies the routing entry and rule slice for `host` out of the cache.
    pub fn lookup(&self, host: &str) -> Option<(HostEntry, Arc<Vec<WafRule>>)> {
        let inner = self.inner.read().unwrap();
        let entry = inner.hosts.get(host)?.clone();
        let rules = inner
            .rules
            .get(host)
            .cloned()
            .unwrap_or_else(|| Arc::new(Vec::new()));
        Some((entry, rules))
    }

    pub fn host_count(&self) -> usize {
        self.inner.read().unwrap().hosts.len()
    }

    /// HostPolicy predicate for the certificate provider: the admin host
    /// plus every host currently routed.
    pub fn is_managed_host(&self, host: &str) -> bool {
        host == self.admin_host || self.inner.read().unwrap().hosts.contains_key(host)
    }

    /// Fetches all four collections, builds fresh maps, then swaps them in.
    /// A failed fetch leaves the previous cache in place.
    pub async fn reload(&self) -> StorageResult<()> {
        let domains =
            with_deadline(RELOAD_DEADLINE_SECS, self.intent.list_domains()).await?;
        let records =
            with_deadline(RELOAD_DEADLINE_SECS, self.intent.list_all_records()).await?;
        let rules = with_deadline(RELOAD_DEADLINE_SECS, self.intent.list_rules()).await?;
        let policies =
            with_deadline(RELOAD_DEADLINE_SECS, self.intent.list_policies()).await?;

        // Host map: active roots first, then every record host inherits
        // its parent's entry.
        let mut hosts: HashMap<String, HostEntry> = HashMap::new();
        let mut active_by_id: HashMap<String, &Domain> = HashMap::new();
        for domain in &domains {
            if domain.status == DomainStatus::Active {
                hosts.insert(domain.name.clone(), host_entry(domain));
                active_by_id.insert(domain.id.clone(), domain);
            }
        }
        for record in &records {
            if let Some(parent) = active_by_id.get(&record.domain_id) {
                hosts.insert(record.name.clone(), host_entry(parent));
            }
        }

        // Compile condition patterns once per reload.
        let rules: Vec<WafRule> = rules.into_iter().map(compile_rule).collect();

        let mut global_rules: Vec<&WafRule> = Vec::new();
        let mut tenant_rules: HashMap<&str, Vec<&WafRule>> = HashMap::new();
        for rule in &rules {
            if rule.owner_tenant_id.is_empty() {
                global_rules.push(rule);
            } else {
                tenant_rules
                    .entry(rule.owner_tenant_id.as_str())
                    .or_default()
                    .push(rule);
            }
        }

        // (rule, domain) -> enabled; the "" domain key is the tenant-wide row.
        let mut policy_index: HashMap<(&str, &str), bool> = HashMap::new();
        for policy in &policies {
            policy_index.insert(
                (policy.rule_id.as_str(), policy.domain_id.as_str()),
                policy.enabled,
            );
        }

        let mut host_rules: HashMap<String, Arc<Vec<WafRule>>> = HashMap::new();
        for domain in active_by_id.values() {
            let mut effective: Vec<WafRule> = Vec::new();
            for rule in &global_rules {
                if self.rule_enabled(rule, &domain.id, &policy_index) {
                    effective.push((*rule).clone());
                }
            }
            if let Some(own) = tenant_rules.get(domain.tenant_id.as_str()) {
                for rule in own {
                    if self.rule_enabled(rule, &domain.id, &policy_index) {
                        effective.push((*rule).clone());
                    }
                }
            }
            // Stable sort keeps insertion order within a priority band.
            effective.sort_by_key(|r| r.priority);

            let shared = Arc::new(effective);
            host_rules.insert(domain.name.clone(), Arc::clone(&shared));
            for record in &records {
                if record.domain_id == domain.id {
                    host_rules.insert(record.name.clone(), Arc::clone(&shared));
                }
            }
        }

        let mut inner = self.inner.write().unwrap();
        inner.hosts = hosts;
        inner.rules = host_rules;
        log::info!("Policy cache reloaded; routing active for {} hosts", inner.hosts.len());
        Ok(())
    }

    fn rule_enabled(
        &self,
        rule: &WafRule,
        domain_id: &str,
        policy_index: &HashMap<(&str, &str), bool>,
    ) -> bool {
        if let Some(enabled) = policy_index.get(&(rule.id.as_str(), domain_id)) {
            return *enabled;
        }
        if let Some(enabled) = policy_index.get(&(rule.id.as_str(), "")) {
            return *enabled;
        }
        rule.default_enabled.unwrap_or(self.default_rule_enabled)
    }
}

fn host_entry(domain: &Domain) -> HostEntry {
    HostEntry {
        tenant_id: domain.tenant_id.clone(),
        domain_id: domain.id.clone(),
        proxy_enabled: domain.proxy_enabled,
    }
}

/// Regex fields get their pattern compiled here; a pattern that fails to
/// compile is logged and the condition is left inert.
fn compile_rule(mut rule: WafRule) -> WafRule {
    for cond in &mut rule.conditions {
        let wants_regex = matches!(
            cond.field.as_str(),
            "request.combined" | "request.headers.User-Agent"
        );
        if !wants_regex {
            continue;
        }
        let Some(pattern) = cond.value.as_str() else {
            continue;
        };
        match regex::Regex::new(pattern) {
            Ok(re) => cond.compiled = Some(re),
            Err(e) => {
                log::error!(
                    "Rule '{}' has an invalid pattern '{}': {}; condition disabled",
                    rule.name,
                    pattern,
                    e
                );
            }
        }
    }
    rule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, DnsRecord, RecordType, RuleAction, RulePolicy};
    use crate::storage::memory::MemoryIntentStore;
    use chrono::Utc;
    use serde_json::json;

    fn domain(id: &str, tenant: &str, name: &str, status: DomainStatus) -> Domain {
        Domain {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            name: name.to_string(),
            status,
            nameservers: vec![],
            proxy_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            stats: Default::default(),
        }
    }

    fn record(id: &str, domain_id: &str, name: &str) -> DnsRecord {
        DnsRecord {
            id: id.to_string(),
            domain_id: domain_id.to_string(),
            name: name.to_string(),
            record_type: RecordType::A,
            content: "203.0.113.1".to_string(),
            ttl: 300,
            proxied: true,
            origin_ssl: false,
            created_at: Utc::now(),
        }
    }

    fn waf_rule(id: &str, owner: &str, priority: i32) -> WafRule {
        WafRule {
            id: id.to_string(),
            owner_tenant_id: owner.to_string(),
            name: id.to_string(),
            conditions: vec![Condition {
                field: "request.combined".to_string(),
                operator: "regex".to_string(),
                value: json!("attack"),
                compiled: None,
            }],
            on_match: RuleAction {
                score_add: 5,
                tags: vec![],
                hard_block: false,
            },
            priority,
            default_enabled: None,
        }
    }

    async fn seeded_store() -> Arc<MemoryIntentStore> {
        let store = Arc::new(MemoryIntentStore::new());
        store
            .insert_domain(&domain("d1", "t1", "one.example", DomainStatus::Active))
            .await
            .unwrap();
        store
            .insert_domain(&domain("d2", "t2", "two.example", DomainStatus::Active))
            .await
            .unwrap();
        store
            .insert_domain(&domain("d3", "t3", "pending.example", DomainStatus::PendingVerification))
            .await
            .unwrap();
        store
            .insert_record(&record("r1", "d1", "www.one.example"))
            .await
            .unwrap();
        store
            .insert_record(&record("r2", "d3", "www.pending.example"))
            .await
            .unwrap();
        store
    }

    fn cache(store: Arc<MemoryIntentStore>) -> PolicyCache {
        PolicyCache::new(store, "admin.example".to_string(), true)
    }

    #[tokio::test]
    async fn hosts_map_to_their_owning_tenant() {
        let store = seeded_store().await;
        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();

        let (entry, _) = cache.lookup("one.example").unwrap();
        assert_eq!(entry.tenant_id, "t1");
        assert_eq!(entry.domain_id, "d1");

        // Subdomains inherit the parent's entry.
        let (entry, _) = cache.lookup("www.one.example").unwrap();
        assert_eq!(entry.tenant_id, "t1");

        // Pending domains never participate in routing.
        assert!(cache.lookup("pending.example").is_none());
        assert!(cache.lookup("www.pending.example").is_none());
        assert!(cache.lookup("unknown.example").is_none());
    }

    #[tokio::test]
    async fn effective_rules_combine_global_and_owned() {
        let store = seeded_store().await;
        store.insert_rule(&waf_rule("global", "", 1)).await.unwrap();
        store.insert_rule(&waf_rule("t1-own", "t1", 2)).await.unwrap();
        store.insert_rule(&waf_rule("t2-own", "t2", 0)).await.unwrap();

        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();

        let (_, rules) = cache.lookup("one.example").unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["global", "t1-own"]);

        // Same slice is served for subdomain hosts of the domain.
        let (_, sub_rules) = cache.lookup("www.one.example").unwrap();
        assert!(Arc::ptr_eq(&rules, &sub_rules));

        let (_, rules) = cache.lookup("two.example").unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        // t2's own rule has lower priority than the global one.
        assert_eq!(ids, vec!["t2-own", "global"]);
    }

    #[tokio::test]
    async fn override_precedence_domain_then_tenant_then_default() {
        let store = seeded_store().await;
        store.insert_rule(&waf_rule("g1", "", 0)).await.unwrap();
        store.insert_rule(&waf_rule("g2", "", 0)).await.unwrap();

        // Tenant-wide off for g1, but per-domain on again for d1.
        store
            .upsert_policy(&RulePolicy {
                tenant_id: "t1".to_string(),
                rule_id: "g1".to_string(),
                domain_id: String::new(),
                enabled: false,
            })
            .await
            .unwrap();
        store
            .upsert_policy(&RulePolicy {
                tenant_id: "t1".to_string(),
                rule_id: "g1".to_string(),
                domain_id: "d1".to_string(),
                enabled: true,
            })
            .await
            .unwrap();
        // g2 disabled for d2 only.
        store
            .upsert_policy(&RulePolicy {
                tenant_id: "t2".to_string(),
                rule_id: "g2".to_string(),
                domain_id: "d2".to_string(),
                enabled: false,
            })
            .await
            .unwrap();

        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();

        let (_, rules) = cache.lookup("one.example").unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);

        let (_, rules) = cache.lookup("two.example").unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["g1"]);
    }

    #[tokio::test]
    async fn default_enabled_false_drops_rule_without_override() {
        let store = seeded_store().await;
        let mut rule = waf_rule("opt-in", "", 0);
        rule.default_enabled = Some(false);
        store.insert_rule(&rule).await.unwrap();

        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();
        let (_, rules) = cache.lookup("one.example").unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn regex_patterns_compile_once_and_bad_ones_stay_inert() {
        let store = seeded_store().await;
        store.insert_rule(&waf_rule("good", "", 0)).await.unwrap();
        let mut bad = waf_rule("bad", "", 1);
        bad.conditions[0].value = json!("union[");
        store.insert_rule(&bad).await.unwrap();

        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();

        let (_, rules) = cache.lookup("one.example").unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules[0].conditions[0].compiled.is_some());
        assert!(rules[1].conditions[0].compiled.is_none());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_cache() {
        let store = seeded_store().await;
        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();
        assert!(cache.lookup("one.example").is_some());

        store.set_fail_rules(true);
        assert!(cache.reload().await.is_err());
        // The earlier index is still being served.
        assert!(cache.lookup("one.example").is_some());
        assert_eq!(cache.host_count(), 3);
    }

    #[tokio::test]
    async fn reload_is_idempotent_on_unchanged_stores() {
        let store = seeded_store().await;
        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();
        let before = cache.host_count();
        cache.reload().await.unwrap();
        assert_eq!(cache.host_count(), before);
        let (entry, _) = cache.lookup("one.example").unwrap();
        assert_eq!(entry.tenant_id, "t1");
    }

    #[tokio::test]
    async fn host_policy_covers_admin_and_cached_hosts() {
        let store = seeded_store().await;
        let cache = cache(Arc::clone(&store));
        cache.reload().await.unwrap();

        assert!(cache.is_managed_host("admin.example"));
        assert!(cache.is_managed_host("one.example"));
        assert!(cache.is_managed_host("www.one.example"));
        assert!(!cache.is_managed_host("stranger.example"));
    }
}
