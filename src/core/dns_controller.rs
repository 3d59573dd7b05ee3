//! Dual-plane DNS management.
//!
//! Tenants edit the intent store; the resolver store is what the world
//! resolves against. Verification record types (TXT/MX/NS/SOA) are always
//! mirrored verbatim. Address records (A/AAAA/CNAME) are only published
//! while the owning domain has proxy mode off; with proxy mode on the zone
//! resolves to a single apex A record pointing at the WAF's public IP.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{DnsRecord, Domain, DomainStatus, RecordType};
use crate::storage::{with_deadline, IntentStore, ResolverStore};
use crate::utils::is_valid_hostname;

const RESOLVER_DEADLINE_SECS: u64 = 10;
const DEFAULT_RECORD_TTL: u32 = 300;
const MAX_TXT_LEN: usize = 2048;

/// Record creation payload as submitted by a tenant. `name` is relative to
/// the zone; empty or `@` targets the apex.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordInput {
    pub domain_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub content: String,
    #[serde(default)]
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub origin_ssl: bool,
}

pub struct DnsController {
    intent: Arc<dyn IntentStore>,
    resolver: Arc<dyn ResolverStore>,
    waf_public_ip: String,
    waf_record_ttl: u32,
}

impl DnsController {
    pub fn new(
        intent: Arc<dyn IntentStore>,
        resolver: Arc<dyn ResolverStore>,
        waf_public_ip: String,
        waf_record_ttl: u32,
    ) -> Self {
        Self {
            intent,
            resolver,
            waf_public_ip,
            waf_record_ttl,
        }
    }

    pub async fn list_records(
        &self,
        tenant_id: &str,
        domain_id: &str,
    ) -> ServiceResult<Vec<DnsRecord>> {
        let domain = self.owned_domain(tenant_id, domain_id).await?;
        Ok(self.intent.list_records(&domain.id).await?)
    }

    /// Validates and stores a record in the intent store, then mirrors it
    /// to the resolver when the current proxy mode calls for publication.
    /// The mirror write is best-effort and runs off the request path.
    pub async fn add_record(&self, tenant_id: &str, input: RecordInput) -> ServiceResult<DnsRecord> {
        let record_type = RecordType::parse(input.record_type.trim()).ok_or_else(|| {
            ServiceError::InvalidInput("unsupported record type".to_string())
        })?;
        if record_type == RecordType::Soa {
            return Err(ServiceError::InvalidInput(
                "SOA records are managed automatically".to_string(),
            ));
        }

        let domain = self.owned_domain(tenant_id, &input.domain_id).await?;
        if domain.status != DomainStatus::Active {
            return Err(ServiceError::InvalidInput(
                "domain must be verified before adding records".to_string(),
            ));
        }

        let ttl = if input.ttl == 0 {
            DEFAULT_RECORD_TTL
        } else {
            input.ttl
        };
        if !(60..=86400).contains(&ttl) {
            return Err(ServiceError::InvalidInput(
                "TTL must be between 60 and 86400 seconds".to_string(),
            ));
        }

        let content = normalize_content(record_type, input.content.trim());
        validate_content(record_type, &content)?;

        let name = input.name.trim();
        let record_name = if name.is_empty() || name == "@" {
            domain.name.clone()
        } else {
            if !is_valid_hostname(name) {
                return Err(ServiceError::InvalidInput(
                    "record name contains invalid characters".to_string(),
                ));
            }
            format!("{}.{}", name, domain.name)
        };

        if record_type == RecordType::Cname {
            if record_name == domain.name {
                return Err(ServiceError::InvalidInput(
                    "root domain (@) cannot be a CNAME record".to_string(),
                ));
            }
            if content == record_name {
                return Err(ServiceError::InvalidInput(
                    "CNAME cannot point to itself".to_string(),
                ));
            }
        }

        self.check_conflicts(&domain.id, &record_name, record_type, &content)
            .await?;

        let record = DnsRecord {
            id: Uuid::new_v4().to_string(),
            domain_id: domain.id.clone(),
            name: record_name,
            record_type,
            content,
            ttl,
            proxied: input.proxied,
            origin_ssl: input.origin_ssl,
            created_at: Utc::now(),
        };
        self.intent.insert_record(&record).await?;

        // Address records stay unpublished while the zone is proxied; the
        // apex WAF A is already serving it.
        if !record.record_type.is_proxiable() || !domain.proxy_enabled {
            let resolver = Arc::clone(&self.resolver);
            let published = record.clone();
            tokio::spawn(async move {
                let write = resolver.insert_record(
                    &published.name,
                    published.record_type.as_str(),
                    &published.content,
                    published.ttl,
                );
                if let Err(e) = with_deadline(RESOLVER_DEADLINE_SECS, write).await {
                    log::error!(
                        "Resolver publish failed for {} {}: {}",
                        published.record_type,
                        published.name,
                        e
                    );
                }
            });
        }

        Ok(record)
    }

    pub async fn delete_record(&self, tenant_id: &str, record_id: &str) -> ServiceResult<()> {
        let record = self
            .intent
            .get_record(record_id)
            .await?
            .ok_or(ServiceError::NotFound("record"))?;
        let domain = self
            .intent
            .get_domain(&record.domain_id)
            .await?
            .ok_or(ServiceError::NotFound("domain"))?;
        if domain.tenant_id != tenant_id {
            return Err(ServiceError::Unauthorized);
        }

        // With proxy mode on, address records were never published; the
        // resolver holds the shared apex WAF A, which must survive.
        if !record.record_type.is_proxiable() || !domain.proxy_enabled {
            let delete = self.resolver.delete_record(
                &record.name,
                record.record_type.as_str(),
                &record.content,
            );
            with_deadline(RESOLVER_DEADLINE_SECS, delete).await?;
        }

        self.intent.delete_record(&record.id).await?;
        Ok(())
    }

    /// The big swap. Enabling replaces every address record of the zone
    /// with one apex A pointing at the WAF; disabling restores the
    /// tenant's address records from intent.
    pub async fn toggle_proxy(
        &self,
        tenant_id: &str,
        domain_id: &str,
        enabled: bool,
    ) -> ServiceResult<()> {
        let mut domain = self.owned_domain(tenant_id, domain_id).await?;

        if enabled {
            self.publish_waf_apex(&domain.name).await?;
        } else {
            let delete = self
                .resolver
                .delete_record(&domain.name, "A", &self.waf_public_ip);
            with_deadline(RESOLVER_DEADLINE_SECS, delete).await?;

            for record in self.intent.list_records(&domain.id).await? {
                if !record.record_type.is_proxiable() {
                    continue;
                }
                let insert = self.resolver.insert_record(
                    &record.name,
                    record.record_type.as_str(),
                    &record.content,
                    record.ttl,
                );
                if let Err(e) = with_deadline(RESOLVER_DEADLINE_SECS, insert).await {
                    log::error!(
                        "Failed to restore {} {} on proxy disable: {}",
                        record.record_type,
                        record.name,
                        e
                    );
                }
            }
        }

        domain.proxy_enabled = enabled;
        domain.updated_at = Utc::now();
        self.intent.update_domain(&domain).await?;
        Ok(())
    }

    /// Clears the zone's address records and installs the apex WAF A.
    /// Also used on domain activation.
    pub async fn publish_waf_apex(&self, zone: &str) -> ServiceResult<()> {
        with_deadline(RESOLVER_DEADLINE_SECS, self.resolver.delete_address_records(zone)).await?;
        let insert =
            self.resolver
                .insert_record(zone, "A", &self.waf_public_ip, self.waf_record_ttl);
        with_deadline(RESOLVER_DEADLINE_SECS, insert).await?;
        Ok(())
    }

    /// Provisions the zone row plus SOA/NS in the resolver. Idempotent.
    pub async fn provision_zone(&self, zone: &str, nameservers: &[String]) -> ServiceResult<()> {
        with_deadline(
            RESOLVER_DEADLINE_SECS,
            self.resolver.ensure_zone(zone, nameservers),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_zone(&self, zone: &str) -> ServiceResult<()> {
        with_deadline(RESOLVER_DEADLINE_SECS, self.resolver.delete_zone(zone)).await?;
        Ok(())
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

    async fn check_conflicts(
        &self,
        domain_id: &str,
        record_name: &str,
        record_type: RecordType,
        content: &str,
    ) -> ServiceResult<()> {
        let records = self.intent.list_records(domain_id).await?;
        let at_name: Vec<&DnsRecord> = records.iter().filter(|r| r.name == record_name).collect();

        if record_type == RecordType::Cname {
            if !at_name.is_empty() {
                return Err(ServiceError::Conflict(
                    "CNAME record cannot coexist with other records".to_string(),
                ));
            }
        } else {
            if at_name.iter().any(|r| r.record_type == RecordType::Cname) {
                return Err(ServiceError::Conflict(
                    "a CNAME record already exists for this hostname".to_string(),
                ));
            }
            if at_name
                .iter()
                .any(|r| r.record_type == record_type && r.content == content)
            {
                return Err(ServiceError::Conflict(
                    "duplicate record already exists".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn normalize_content(record_type: RecordType, content: &str) -> String {
    match record_type {
        RecordType::Cname | RecordType::Mx | RecordType::Ns => {
            content.trim_end_matches('.').to_string()
        }
        _ => content.to_string(),
    }
}

fn validate_content(record_type: RecordType, content: &str) -> ServiceResult<()> {
    match record_type {
        RecordType::A => {
            if content.parse::<Ipv4Addr>().is_err() {
                return Err(ServiceError::InvalidInput(
                    "content must be a valid IPv4 address".to_string(),
                ));
            }
        }
        RecordType::Aaaa => {
            if content.parse::<Ipv4Addr>().is_ok() || content.parse::<Ipv6Addr>().is_err() {
                return Err(ServiceError::InvalidInput(
                    "content must be a valid IPv6 address".to_string(),
                ));
            }
        }
        RecordType::Cname => {
            if content.parse::<std::net::IpAddr>().is_ok() {
                return Err(ServiceError::InvalidInput(
                    "CNAME content must be a domain name, not an IP address".to_string(),
                ));
            }
            if !is_valid_hostname(content) {
                return Err(ServiceError::InvalidInput(
                    "invalid domain format in CNAME content".to_string(),
                ));
            }
        }
        RecordType::Mx | RecordType::Ns => {
            if !is_valid_hostname(content) {
                return Err(ServiceError::InvalidInput(
                    "invalid domain format".to_string(),
                ));
            }
        }
        RecordType::Txt => {
            if content.len() > MAX_TXT_LEN {
                return Err(ServiceError::InvalidInput("TXT record too long".to_string()));
            }
        }
        RecordType::Soa => {}
    }
    Ok(())
}
