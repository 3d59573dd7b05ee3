//! Core components of the WAF gateway.
//!
//! This module contains the detection and routing machinery: rate
//! limiting, rule evaluation, ML scoring, the verdict table, the policy
//! cache, DNS control, the domain lifecycle, the request pipeline, and
//! the stats/log emitters.

pub mod analytics;
pub mod attack_log;
pub mod decision;
pub mod dns_controller;
pub mod domain_lifecycle;
pub mod ml_client;
pub mod pipeline;
pub mod policy_cache;
pub mod rate_limiter;
pub mod rule_engine;
pub mod rule_service;

pub use analytics::StatsBuffer;
pub use attack_log::{AttackLogger, LogBroker};
pub use decision::{decide, DecisionThresholds, Source, Verdict};
pub use dns_controller::{DnsController, RecordInput};
pub use domain_lifecycle::DomainLifecycle;
pub use ml_client::{MlClient, MlVerdict};
pub use pipeline::ProxyState;
pub use policy_cache::{HostEntry, PolicyCache};
pub use rate_limiter::RateLimiter;
pub use rule_engine::{check_request, Inspection, RuleVerdict};
pub use rule_service::{PolicyInput, RuleInput, RuleService};
