//! Rule and policy administration consumed by the admin handlers.
//!
//! Every mutation enforces ownership against the calling tenant and
//! triggers a policy cache reload so the proxy picks the change up.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::core::policy_cache::PolicyCache;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{Condition, RuleAction, RulePolicy, WafRule};
use crate::storage::IntentStore;

#[derive(Debug, Deserialize)]
pub struct RuleInput {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub on_match: RuleAction,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub default_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PolicyInput {
    pub rule_id: String,
    /// Empty applies tenant-wide; set targets one domain.
    #[serde(default)]
    pub domain_id: String,
    pub enabled: bool,
}

pub struct RuleService {
    intent: Arc<dyn IntentStore>,
    cache: Arc<PolicyCache>,
}

impl RuleService {
    pub fn new(intent: Arc<dyn IntentStore>, cache: Arc<PolicyCache>) -> Self {
        Self { intent, cache }
    }

    /// Global rules plus the tenant's own.
    pub async fn list_rules(&self, tenant_id: &str) -> ServiceResult<Vec<WafRule>> {
        let rules = self.intent.list_rules().await?;
        Ok(rules
            .into_iter()
            .filter(|r| r.owner_tenant_id.is_empty() || r.owner_tenant_id == tenant_id)
            .collect())
    }

    pub async fn create_rule(&self, tenant_id: &str, input: RuleInput) -> ServiceResult<WafRule> {
        if input.name.trim().is_empty() {
            return Err(ServiceError::InvalidInput("rule name is required".to_string()));
        }
        if input.conditions.is_empty() {
            return Err(ServiceError::InvalidInput(
                "a rule needs at least one condition".to_string(),
            ));
        }

        let rule = WafRule {
            id: Uuid::new_v4().to_string(),
            owner_tenant_id: tenant_id.to_string(),
            name: input.name.trim().to_string(),
            conditions: input.conditions,
            on_match: input.on_match,
            priority: input.priority,
            default_enabled: input.default_enabled,
        };
        self.intent.insert_rule(&rule).await?;
        self.reload_cache().await;
        Ok(rule)
    }

    pub async fn update_rule(
        &self,
        tenant_id: &str,
        rule_id: &str,
        input: RuleInput,
    ) -> ServiceResult<WafRule> {
        let existing = self.owned_rule(tenant_id, rule_id).await?;
        let rule = WafRule {
            id: existing.id,
            owner_tenant_id: existing.owner_tenant_id,
            name: input.name.trim().to_string(),
            conditions: input.conditions,
            on_match: input.on_match,
            priority: input.priority,
            default_enabled: input.default_enabled,
        };
        self.intent.update_rule(&rule).await?;
        self.reload_cache().await;
        Ok(rule)
    }

    pub async fn delete_rule(&self, tenant_id: &str, rule_id: &str) -> ServiceResult<()> {
        let rule = self.owned_rule(tenant_id, rule_id).await?;
        self.intent.delete_rule(&rule.id).await?;
        self.reload_cache().await;
        Ok(())
    }

    /// Upserts an enable/disable override. Global rules may be toggled by
    /// anyone for their own domains; toggling another tenant's private
    /// rule is refused.
    pub async fn set_policy(&self, tenant_id: &str, input: PolicyInput) -> ServiceResult<RulePolicy> {
        let rule = self
            .intent
            .get_rule(&input.rule_id)
            .await?
            .ok_or(ServiceError::NotFound("rule"))?;
        if !rule.owner_tenant_id.is_empty() && rule.owner_tenant_id != tenant_id {
            return Err(ServiceError::Unauthorized);
        }

        if !input.domain_id.is_empty() {
            let domain = self
                .intent
                .get_domain(&input.domain_id)
                .await?
                .ok_or(ServiceError::NotFound("domain"))?;
            if domain.tenant_id != tenant_id {
                return Err(ServiceError::Unauthorized);
            }
        }

        let policy = RulePolicy {
            tenant_id: tenant_id.to_string(),
            rule_id: input.rule_id,
            domain_id: input.domain_id,
            enabled: input.enabled,
        };
        self.intent.upsert_policy(&policy).await?;
        self.reload_cache().await;
        Ok(policy)
    }

    async fn owned_rule(&self, tenant_id: &str, rule_id: &str) -> ServiceResult<WafRule> {
        let rule = self
            .intent
            .get_rule(rule_id)
            .await?
            .ok_or(ServiceError::NotFound("rule"))?;
        if rule.owner_tenant_id != tenant_id {
            return Err(ServiceError::Unauthorized);
        }
        Ok(rule)
    }

    async fn reload_cache(&self) {
        if let Err(e) = self.cache.reload().await {
            log::error!("Policy cache reload after rule mutation failed: {}", e);
        }
    }
}
