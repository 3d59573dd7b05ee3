//! Final verdict combination for the detection tiers.
//!
//! `decide` is a pure function; the ordering of its checks is the contract
//! the rest of the pipeline (and the dashboard wording) depends on.

use serde::Serialize;

use crate::models::WafConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Allow,
    Monitor,
    Block,
}

impl Verdict {
    /// The action recorded on the emitted log event.
    pub fn action_label(&self) -> &'static str {
        match self {
            Verdict::Allow => "Allowed",
            Verdict::Monitor => "Flagged",
            Verdict::Block => "Blocked",
        }
    }
}

/// Which tier was decisive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    RuleEngine,
    MlEngine,
    Hybrid,
    None,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::RuleEngine => "RuleEngine",
            Source::MlEngine => "MLEngine",
            Source::Hybrid => "Hybrid",
            Source::None => "None",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionThresholds {
    pub block_score: i32,
    pub hybrid_score: i32,
    pub ml_block_confidence: f64,
    pub ml_monitor_confidence: f64,
    pub ml_hybrid_confidence: f64,
}

impl From<&WafConfig> for DecisionThresholds {
    fn from(cfg: &WafConfig) -> Self {
        Self {
            block_score: cfg.block_score,
            hybrid_score: cfg.hybrid_score,
            ml_block_confidence: cfg.ml_block_confidence,
            ml_monitor_confidence: cfg.ml_monitor_confidence,
            ml_hybrid_confidence: cfg.ml_hybrid_confidence,
        }
    }
}

/// Combines the rule and ML outputs, first match wins:
/// critical rules, then the rule score, then ML confidence bands, then
/// the hybrid rule+ML band.
pub fn decide(
    rule_score: i32,
    rule_hard_block: bool,
    _ml_is_anomaly: bool,
    ml_confidence: f64,
    thresholds: &DecisionThresholds,
) -> (Verdict, &'static str, Source) {
    if rule_hard_block {
        return (Verdict::Block, "Critical Rule Match", Source::RuleEngine);
    }

    if rule_score >= thresholds.block_score {
        return (Verdict::Block, "High Risk Rule Score", Source::RuleEngine);
    }

    if ml_confidence > thresholds.ml_block_confidence {
        return (Verdict::Block, "AI/Hybrid Anomaly", Source::MlEngine);
    }

    if ml_confidence > thresholds.ml_monitor_confidence {
        return (Verdict::Monitor, "Suspicious (Medium)", Source::MlEngine);
    }

    if rule_score >= thresholds.hybrid_score && ml_confidence > thresholds.ml_hybrid_confidence {
        return (Verdict::Monitor, "Combined Rule+ML", Source::Hybrid);
    }

    (Verdict::Allow, "Clean", Source::None)
}
