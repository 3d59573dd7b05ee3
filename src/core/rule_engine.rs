//! Rule evaluation for the request pipeline.
//!
//! A rule matches when every one of its conditions evaluates true against
//! the prepared [`Inspection`]; matching rules contribute their score and
//! tags, and may force a hard block. Regex conditions rely on patterns
//! compiled at cache-build time; a condition without a compiled pattern
//! never matches.

use serde_json::Value;

use crate::models::{Condition, WafRule};
use crate::utils::url_decode;

/// Request facts the engine inspects, prepared once by the pipeline after
/// the body has been buffered.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub method: String,
    pub user_agent: String,
    /// URL-decoded path, URL-decoded raw query and the body, joined with
    /// single spaces.
    pub combined: String,
    pub param_count: usize,
    pub body_length: usize,
    pub rate_limited: bool,
}

impl Inspection {
    pub fn combined_payload(path: &str, raw_query: &str, body: &str) -> String {
        format!("{} {} {}", url_decode(path), url_decode(raw_query), body)
    }
}

/// Aggregate outcome of evaluating a ruleset.
#[derive(Debug, Clone, Default)]
pub struct RuleVerdict {
    pub score: i32,
    pub tags: Vec<String>,
    pub hard_block: bool,
    /// The combined inspection string; the payload shown on the dashboard
    /// when the rule tier made the call.
    pub trigger_payload: String,
}

/// Evaluates `rules` in the order given (the policy cache has already
/// sorted them by priority).
pub fn check_request(inspection: &Inspection, rules: &[WafRule]) -> RuleVerdict {
    let mut verdict = RuleVerdict {
        trigger_payload: inspection.combined.clone(),
        ..RuleVerdict::default()
    };

    for rule in rules {
        let matched = rule.conditions.iter().all(|c| evaluate(c, inspection));
        if matched {
            log::info!("[WAF MATCH] rule '{}' (+{})", rule.name, rule.on_match.score_add);
            verdict.score += rule.on_match.score_add;
            verdict.tags.extend(rule.on_match.tags.iter().cloned());
            if rule.on_match.hard_block {
                verdict.hard_block = true;
            }
        }
    }

    verdict
}

fn evaluate(cond: &Condition, inspection: &Inspection) -> bool {
    match cond.field.as_str() {
        "request.combined" => cond
            .compiled
            .as_ref()
            .map(|re| re.is_match(&inspection.combined))
            .unwrap_or(false),
        "request.headers.User-Agent" => cond
            .compiled
            .as_ref()
            .map(|re| re.is_match(&inspection.user_agent))
            .unwrap_or(false),
        "request.method" => {
            cond.operator == "equals" && cond.value.as_str() == Some(inspection.method.as_str())
        }
        "meta.param_count" => greater_than(&cond.value, inspection.param_count),
        "meta.body_length" => greater_than(&cond.value, inspection.body_length),
        "meta.rate_limited" => {
            cond.operator == "equals_bool" && cond.value.as_bool() == Some(inspection.rate_limited)
        }
        _ => false,
    }
}

fn greater_than(threshold: &Value, actual: usize) -> bool {
    if let Some(v) = threshold.as_i64() {
        return actual as i64 > v;
    }
    if let Some(v) = threshold.as_f64() {
        return (actual as f64) > v;
    }
    false
}
