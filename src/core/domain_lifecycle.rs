//! Domain lifecycle: creation with nameserver delegation, registrar-side
//! RDAP verification, ownership takeover and zone provisioning.
//!
//! A domain is created `pending_verification` with two distinct
//! nameservers drawn from the pool; it becomes `active` only once RDAP
//! shows both at the registrar. Activation supersedes any stale row for
//! the same name, whichever tenant owned it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::dns_controller::DnsController;
use crate::core::policy_cache::PolicyCache;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{DnsConfig, Domain, DomainStatus};
use crate::storage::IntentStore;
use crate::utils::{is_valid_hostname, root_domain};

#[derive(Debug, Deserialize)]
struct RdapNameserver {
    #[serde(rename = "ldhName", default)]
    ldh_name: String,
}

#[derive(Debug, Deserialize)]
struct RdapResponse {
    #[serde(default)]
    nameservers: Vec<RdapNameserver>,
}

pub struct DomainLifecycle {
    intent: Arc<dyn IntentStore>,
    dns: Arc<DnsController>,
    cache: Arc<PolicyCache>,
    http: reqwest::Client,
    config: DnsConfig,
}

impl DomainLifecycle {
    pub fn new(
        intent: Arc<dyn IntentStore>,
        dns: Arc<DnsController>,
        cache: Arc<PolicyCache>,
        config: DnsConfig,
    ) -> Self {
        Self {
            intent,
            dns,
            cache,
            http: reqwest::Client::new(),
            config,
        }
    }

    pub async fn list_domains(&self, tenant_id: &str) -> ServiceResult<Vec<Domain>> {
        Ok(self.intent.list_domains_by_tenant(tenant_id).await?)
    }

    /// Registers a domain in `pending_verification` and provisions its
    /// zone (SOA + NS) so the delegation challenge resolves immediately.
    pub async fn create_domain(&self, tenant_id: &str, name: &str) -> ServiceResult<Domain> {
        let name = name.trim().trim_end_matches('.').to_ascii_lowercase();
        if !is_valid_hostname(&name) || !name.contains('.') {
            return Err(ServiceError::InvalidInput("invalid domain name".to_string()));
        }

        // Subdomains of a zone someone already runs through the gateway
        // belong in that zone's record set, not in a domain of their own.
        let root = root_domain(&name);
        if root != name && self.intent.get_active_domain_by_name(&root).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "root domain '{}' is already registered; add '{}' as a DNS record under it",
                root, name
            )));
        }

        let nameservers = self.pick_nameservers()?;
        let now = Utc::now();
        let domain = Domain {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name,
            status: DomainStatus::PendingVerification,
            nameservers,
            proxy_enabled: true,
            created_at: now,
            updated_at: now,
            stats: Default::default(),
        };
        self.intent.insert_domain(&domain).await?;

        if let Err(e) = self
            .dns
            .provision_zone(&domain.name, &domain.nameservers)
            .await
        {
            log::error!("Zone provisioning failed for {}: {}", domain.name, e);
        }

        Ok(domain)
    }

    pub async fn delete_domain(&self, tenant_id: &str, domain_id: &str) -> ServiceResult<()> {
        let domain = self.owned_domain(tenant_id, domain_id).await?;
        self.intent.delete_records_for_domain(&domain.id).await?;
        self.intent.delete_domain(&domain.id).await?;
        self.dns.delete_zone(&domain.name).await?;
        if let Err(e) = self.cache.reload().await {
            log::error!("Policy cache reload after domain delete failed: {}", e);
        }
        Ok(())
    }

    /// Queries RDAP for the registrar's delegation and activates the
    /// domain when every assigned nameserver is present.
    pub async fn verify_domain(&self, tenant_id: &str, domain_id: &str) -> ServiceResult<Domain> {
        let domain = self.owned_domain(tenant_id, domain_id).await?;
        if domain.status == DomainStatus::Active {
            return Ok(domain);
        }

        let found = self.fetch_registrar_nameservers(&domain.name).await?;
        if !nameservers_match(&domain.nameservers, &found) {
            return Err(ServiceError::VerificationFailed {
                assigned: domain.nameservers.clone(),
                found,
            });
        }

        self.activate(domain).await
    }

    /// Post-verification state change: takeover, activation, WAF apex
    /// record, cache reload.
    pub(crate) async fn activate(&self, mut domain: Domain) -> ServiceResult<Domain> {
        // The freshly verified owner supersedes any stale row for the name.
        self.intent
            .delete_domains_by_name_except(&domain.name, &domain.id)
            .await?;

        domain.status = DomainStatus::Active;
        domain.proxy_enabled = true;
        domain.updated_at = Utc::now();
        self.intent.update_domain(&domain).await?;

        // The zone may predate the takeover; reprovision idempotently and
        // point the apex at the WAF.
        self.dns
            .provision_zone(&domain.name, &domain.nameservers)
            .await?;
        self.dns.publish_waf_apex(&domain.name).await?;

        if let Err(e) = self.cache.reload().await {
            log::error!("Policy cache reload after activation failed: {}", e);
        }
        Ok(domain)
    }

    fn pick_nameservers(&self) -> ServiceResult<Vec<String>> {
        let pool = &self.config.ns_pool;
        if pool.len() < 2 {
            return Err(ServiceError::InvalidInput(
                "nameserver pool is misconfigured".to_string(),
            ));
        }
        let picks = rand::seq::index::sample(&mut rand::thread_rng(), pool.len(), 2);
        Ok(picks
            .iter()
            .map(|i| format!("{}{}", pool[i], self.config.ns_suffix))
            .collect())
    }

    async fn fetch_registrar_nameservers(&self, name: &str) -> ServiceResult<Vec<String>> {
        let url = format!("{}/{}", self.config.rdap_base_url.trim_end_matches('/'), name);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(self.config.rdap_timeout_secs))
            .header(reqwest::header::ACCEPT, "application/rdap+json")
            .send()
            .await
            .map_err(|e| ServiceError::VerificationUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound("domain at registrar"));
        }
        if !response.status().is_success() {
            return Err(ServiceError::VerificationUnavailable(format!(
                "RDAP returned status {}",
                response.status()
            )));
        }

        let body: RdapResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::VerificationUnavailable(e.to_string()))?;

        Ok(body
            .nameservers
            .into_iter()
            .map(|ns| ns.ldh_name.trim_end_matches('.').to_string())
            .filter(|ns| !ns.is_empty())
            .collect())
    }

    async fn owned_domain(&self, tenant_id: &str, domain_id: &str) -> ServiceResult<Domain> {
        let domain = self
            .intent
            .get_domain(domain_id)
            .await?
            .ok_or(ServiceError::NotFound("domain"))?;
        if domain.tenant_id != tenant_id {
            return Err(ServiceError::Unauthorized);
        }
        Ok(domain)
    }
}

/// Verification succeeds only when every assigned nameserver appears in
/// the registrar's list; comparison is case-insensitive.
fn nameservers_match(assigned: &[String], found: &[String]) -> bool {
    !assigned.is_empty()
        && assigned
            .iter()
            .all(|a| found.iter().any(|f| f.eq_ignore_ascii_case(a)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryIntentStore, MemoryResolverStore};
    use crate::storage::ResolverStore;

    fn dns_config() -> DnsConfig {
        DnsConfig {
            ns_pool: vec![
                "jade".to_string(),
                "onyx".to_string(),
                "opal".to_string(),
                "ruby".to_string(),
            ],
            ns_suffix: ".ns.waf-gateway.net".to_string(),
            waf_record_ttl: 300,
            rdap_base_url: "https://rdap.org/domain".to_string(),
            rdap_timeout_secs: 15,
        }
    }

    struct Fixture {
        intent: Arc<MemoryIntentStore>,
        resolver: Arc<MemoryResolverStore>,
        lifecycle: DomainLifecycle,
    }

    fn fixture() -> Fixture {
        let intent = Arc::new(MemoryIntentStore::new());
        let resolver = Arc::new(MemoryResolverStore::new());
        let dns = Arc::new(DnsController::new(
            Arc::clone(&intent) as Arc<dyn IntentStore>,
            Arc::clone(&resolver) as Arc<dyn ResolverStore>,
            "192.0.2.53".to_string(),
            300,
        ));
        let cache = Arc::new(PolicyCache::new(
            Arc::clone(&intent) as Arc<dyn IntentStore>,
            "admin.example".to_string(),
            true,
        ));
        let lifecycle = DomainLifecycle::new(
            Arc::clone(&intent) as Arc<dyn IntentStore>,
            dns,
            cache,
            dns_config(),
        );
        Fixture {
            intent,
            resolver,
            lifecycle,
        }
    }

    #[test]
    fn nameserver_comparison_is_case_insensitive_and_total() {
        let assigned = vec!["ns1.pool.net".to_string(), "ns2.pool.net".to_string()];
        let both = vec!["NS1.POOL.NET".to_string(), "ns2.pool.net".to_string(), "other.net".to_string()];
        let partial = vec!["ns1.pool.net".to_string()];

        assert!(nameservers_match(&assigned, &both));
        assert!(!nameservers_match(&assigned, &partial));
        assert!(!nameservers_match(&assigned, &[]));
        assert!(!nameservers_match(&[], &both));
    }

    #[test]
    fn rdap_payload_parses_ldh_names() {
        let json = r#"{
            "objectClassName": "domain",
            "ldhName": "example.com",
            "nameservers": [
                {"objectClassName": "nameserver", "ldhName": "NS1.POOL.NET."},
                {"objectClassName": "nameserver", "ldhName": "ns2.pool.net"}
            ]
        }"#;
        let parsed: RdapResponse = serde_json::from_str(json).unwrap();
        let names: Vec<String> = parsed
            .nameservers
            .into_iter()
            .map(|ns| ns.ldh_name.trim_end_matches('.').to_string())
            .collect();
        assert_eq!(names, vec!["NS1.POOL.NET".to_string(), "ns2.pool.net".to_string()]);
    }

    #[tokio::test]
    async fn creation_assigns_two_distinct_pool_members() {
        let fx = fixture();
        let domain = fx
            .lifecycle
            .create_domain("t1", "Example.COM.")
            .await
            .unwrap();

        assert_eq!(domain.name, "example.com");
        assert_eq!(domain.status, DomainStatus::PendingVerification);
        assert_eq!(domain.nameservers.len(), 2);
        assert_ne!(domain.nameservers[0], domain.nameservers[1]);
        for ns in &domain.nameservers {
            assert!(ns.ends_with(".ns.waf-gateway.net"));
        }

        // The zone answers the delegation challenge straight away.
        let records = fx.resolver.zone_records("example.com").await.unwrap();
        assert!(records.iter().any(|r| r.record_type == "SOA"));
        assert_eq!(records.iter().filter(|r| r.record_type == "NS").count(), 2);
    }

    #[tokio::test]
    async fn subdomain_of_registered_root_is_rejected() {
        let fx = fixture();
        let root = fx.lifecycle.create_domain("t1", "example.com").await.unwrap();
        fx.lifecycle.activate(root).await.unwrap();

        let err = fx
            .lifecycle
            .create_domain("t2", "shop.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        // With no registered root the subdomain is a plain new zone.
        assert!(fx
            .lifecycle
            .create_domain("t2", "shop.other.com")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let fx = fixture();
        assert!(fx.lifecycle.create_domain("t1", "no-dots").await.is_err());
        assert!(fx.lifecycle.create_domain("t1", "bad_label.com").await.is_err());
        assert!(fx.lifecycle.create_domain("t1", "").await.is_err());
    }

    #[tokio::test]
    async fn activation_takes_over_stale_ownership() {
        let fx = fixture();

        // T1 holds the active registration.
        let t1_domain = fx.lifecycle.create_domain("t1", "c.example").await.unwrap();
        let t1_domain = fx.lifecycle.activate(t1_domain).await.unwrap();

        // T2 proves control and supersedes it.
        let t2_domain = fx.lifecycle.create_domain("t2", "c.example").await.unwrap();
        let t2_domain = fx.lifecycle.activate(t2_domain).await.unwrap();

        assert_eq!(t2_domain.status, DomainStatus::Active);
        assert!(t2_domain.proxy_enabled);
        assert!(fx.intent.get_domain(&t1_domain.id).await.unwrap().is_none());
        let survivor = fx.intent.get_domain(&t2_domain.id).await.unwrap().unwrap();
        assert_eq!(survivor.tenant_id, "t2");

        // The zone survives the takeover and resolves to the WAF.
        assert!(fx.resolver.zone_exists("c.example").await.unwrap());
        let records = fx.resolver.zone_records("c.example").await.unwrap();
        assert_eq!(
            records
                .iter()
                .filter(|r| r.record_type == "A" && r.content == "192.0.2.53")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn only_one_active_row_per_name_after_activation() {
        let fx = fixture();
        let a = fx.lifecycle.create_domain("t1", "d.example").await.unwrap();
        let _b = fx.lifecycle.create_domain("t2", "d.example").await.unwrap();
        fx.lifecycle.activate(a).await.unwrap();

        let rows = fx.intent.list_domains().await.unwrap();
        let named: Vec<_> = rows.iter().filter(|d| d.name == "d.example").collect();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].status, DomainStatus::Active);
    }

    #[tokio::test]
    async fn deleting_a_domain_clears_records_and_zone() {
        let fx = fixture();
        let domain = fx.lifecycle.create_domain("t1", "e.example").await.unwrap();
        let domain = fx.lifecycle.activate(domain).await.unwrap();

        fx.lifecycle.delete_domain("t1", &domain.id).await.unwrap();
        assert!(fx.intent.get_domain(&domain.id).await.unwrap().is_none());
        assert!(!fx.resolver.zone_exists("e.example").await.unwrap());
    }

    #[tokio::test]
    async fn foreign_tenant_cannot_verify_or_delete() {
        let fx = fixture();
        let domain = fx.lifecycle.create_domain("t1", "f.example").await.unwrap();

        let err = fx.lifecycle.verify_domain("t2", &domain.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized));
        let err = fx.lifecycle.delete_domain("t2", &domain.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized));
    }
}
