//! Data models for extracted rules and execution outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::hashing::hash_str;

/// Categories for extracted rules; unknown strings map to General.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Research,
    Code,
    Analysis,
    Synthesis,
    Validation,
    #[default]
    General,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Code => "code",
            Self::Analysis => "analysis",
            Self::Synthesis => "synthesis",
            Self::Validation => "validation",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "research" => Self::Research,
            "code" => Self::Code,
            "analysis" => Self::Analysis,
            "synthesis" => Self::Synthesis,
            "validation" => Self::Validation,
            _ => Self::General,
        }
    }
}

/// Lifecycle status of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    #[default]
    Active,
    Deprecated,
    Pruned,
    PendingReview,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Pruned => "pruned",
            Self::PendingReview => "pending_review",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "deprecated" => Self::Deprecated,
            "pruned" => Self::Pruned,
            "pending_review" => Self::PendingReview,
            _ => Self::Active,
        }
    }
}

/// Deterministic rule id: first 16 hex chars of SHA-256 over
/// `condition:recommendation`.
pub fn rule_id(condition: &str, recommendation: &str) -> String {
    let digest = hash_str(&format!("{}:{}", condition, recommendation));
    digest[..16].to_string()
}

/// A generalizable pattern mined from successful agent executions.
///
/// Rules carry a condition (when to apply), a recommendation (what to do),
/// and reasoning (why it works), plus application counts that drive the
/// Bayesian effectiveness estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRule {
    pub id: String,
    pub condition: String,
    pub recommendation: String,
    pub reasoning: String,
    pub confidence: f64,
    pub success_count: u32,
    pub failure_count: u32,
    #[serde(default)]
    pub source_task: String,
    #[serde(default)]
    pub source_agent: String,
    #[serde(default)]
    pub category: RuleCategory,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ExtractedRule {
    pub fn new(condition: impl Into<String>, recommendation: impl Into<String>) -> Self {
        let condition = condition.into();
        let recommendation = recommendation.into();
        Self {
            id: rule_id(&condition, &recommendation),
            condition,
            recommendation,
            reasoning: String::new(),
            confidence: 0.7,
            success_count: 1,
            failure_count: 0,
            source_task: String::new(),
            source_agent: String::new(),
            category: RuleCategory::General,
            status: RuleStatus::Active,
            tags: Vec::new(),
            created_at: Utc::now(),
            last_used: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_category(mut self, category: RuleCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_source(
        mut self,
        source_task: impl Into<String>,
        source_agent: impl Into<String>,
    ) -> Self {
        self.source_task = source_task.into();
        self.source_agent = source_agent.into();
        self
    }

    /// Effectiveness as the posterior mean of a Beta(2, 2) prior updated
    /// with the observed application counts.
    pub fn effectiveness(&self) -> f64 {
        let alpha = 2.0 + self.success_count as f64;
        let beta = 2.0 + self.failure_count as f64;
        alpha / (alpha + beta)
    }

    /// Total recorded applications.
    pub fn total_applications(&self) -> u32 {
        self.success_count + self.failure_count
    }

    /// A rule is reliable once it has 5+ applications at >= 0.6
    /// effectiveness.
    pub fn is_reliable(&self) -> bool {
        self.total_applications() >= 5 && self.effectiveness() >= 0.6
    }

    /// A rule is pruneable once it has 10+ applications below 0.4
    /// effectiveness.
    pub fn should_prune(&self) -> bool {
        self.total_applications() >= 10 && self.effectiveness() < 0.4
    }

    /// Record an application outcome and stamp `last_used`.
    pub fn record_application(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_used = Some(Utc::now());
    }
}

/// Outcome of an agent execution, captured for learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub task: String,
    pub approach: String,
    pub success: bool,
    pub quality_score: f64,
    /// Execution time in seconds.
    pub execution_time: f64,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub rules_applied: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ExecutionOutcome {
    pub fn new(task: impl Into<String>, success: bool, quality_score: f64) -> Self {
        Self {
            task: task.into(),
            approach: String::new(),
            success,
            quality_score,
            execution_time: 0.0,
            artifacts: Vec::new(),
            feedback: None,
            agent_id: String::new(),
            rules_applied: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_approach(mut self, approach: impl Into<String>) -> Self {
        self.approach = approach.into();
        self
    }

    /// High quality executions trigger rule extraction in the orchestrator.
    pub fn is_high_quality(&self) -> bool {
        self.success && self.quality_score >= 0.8
    }

    /// Learnable executions pass the extractor's own guard.
    pub fn is_learnable(&self) -> bool {
        self.success && self.quality_score >= 0.7
    }
}

/// Match result from rule search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule: ExtractedRule,
    pub score: f64,
    #[serde(default)]
    pub match_reason: String,
}

/// Aggregate statistics about the learning system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_rules: usize,
    pub active_rules: usize,
    pub pruned_rules: usize,
    pub total_applications: u64,
    pub average_effectiveness: f64,
    pub rules_by_category: HashMap<String, usize>,
    /// Rules extracted in the last 7 days.
    pub recent_extractions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_id_deterministic() {
        let a = rule_id("When research involves multiple sources", "Cross-verify citations");
        let b = rule_id("When research involves multiple sources", "Cross-verify citations");
        let c = rule_id("Different condition", "Cross-verify citations");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_effectiveness_beta_prior() {
        // Fresh rule: success=1, failure=0 -> (2+1)/(4+1) = 0.6
        let rule = ExtractedRule::new("c", "r");
        assert!((rule.effectiveness() - 0.6).abs() < 1e-9);

        let mut rule = ExtractedRule::new("c", "r");
        rule.success_count = 8;
        rule.failure_count = 2;
        // (2+8)/(4+10) = 10/14
        assert!((rule.effectiveness() - 10.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_reliability_thresholds() {
        let mut rule = ExtractedRule::new("c", "r");
        rule.success_count = 4;
        rule.failure_count = 0;
        assert!(!rule.is_reliable(), "needs 5 applications");

        rule.success_count = 5;
        assert!(rule.is_reliable());

        let mut weak = ExtractedRule::new("c2", "r2");
        weak.success_count = 1;
        weak.failure_count = 9;
        // 10 applications, effectiveness (2+1)/(4+10) ~ 0.21
        assert!(weak.should_prune());

        let mut young = ExtractedRule::new("c3", "r3");
        young.success_count = 0;
        young.failure_count = 9;
        assert!(!young.should_prune(), "needs 10 applications");
    }

    #[test]
    fn test_record_application() {
        let mut rule = ExtractedRule::new("c", "r");
        assert!(rule.last_used.is_none());

        rule.record_application(true);
        rule.record_application(false);

        assert_eq!(rule.success_count, 2);
        assert_eq!(rule.failure_count, 1);
        assert!(rule.last_used.is_some());
    }

    #[test]
    fn test_outcome_quality_thresholds() {
        let learnable = ExecutionOutcome::new("t", true, 0.75);
        assert!(learnable.is_learnable());
        assert!(!learnable.is_high_quality());

        let high = ExecutionOutcome::new("t", true, 0.85);
        assert!(high.is_learnable());
        assert!(high.is_high_quality());

        let failed = ExecutionOutcome::new("t", false, 0.95);
        assert!(!failed.is_learnable());
    }

    #[test]
    fn test_rule_serde_roundtrip() {
        let mut rule = ExtractedRule::new("condition", "recommendation")
            .with_reasoning("because it works")
            .with_category(RuleCategory::Research);
        rule.tags = vec!["citations".to_string()];
        rule.record_application(true);

        let encoded = serde_json::to_string(&rule).unwrap();
        let decoded: ExtractedRule = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, rule);
    }
}
