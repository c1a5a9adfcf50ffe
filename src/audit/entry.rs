//! Audit entry types with tamper-evident hash chaining.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::hashing::{hash_content, hash_str};

/// Types of decisions that require audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    TaskRouting,
    AgentSelection,
    ToolInvocation,
    OutputGeneration,
    Verification,
    HumanEscalation,
    RuleApplication,
    ErrorHandling,
    PanelSelection,
    JudgeVerdict,
    SymbolicVerification,
    SchemaValidation,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskRouting => "task_routing",
            Self::AgentSelection => "agent_selection",
            Self::ToolInvocation => "tool_invocation",
            Self::OutputGeneration => "output_generation",
            Self::Verification => "verification",
            Self::HumanEscalation => "human_escalation",
            Self::RuleApplication => "rule_application",
            Self::ErrorHandling => "error_handling",
            Self::PanelSelection => "panel_selection",
            Self::JudgeVerdict => "judge_verdict",
            Self::SymbolicVerification => "symbolic_verification",
            Self::SchemaValidation => "schema_validation",
        }
    }

    /// Parse from the stored snake_case form; unknown values map to
    /// OutputGeneration, matching how readers tolerate old data.
    pub fn parse(s: &str) -> Self {
        match s {
            "task_routing" => Self::TaskRouting,
            "agent_selection" => Self::AgentSelection,
            "tool_invocation" => Self::ToolInvocation,
            "verification" => Self::Verification,
            "human_escalation" => Self::HumanEscalation,
            "rule_application" => Self::RuleApplication,
            "error_handling" => Self::ErrorHandling,
            "panel_selection" => Self::PanelSelection,
            "judge_verdict" => Self::JudgeVerdict,
            "symbolic_verification" => Self::SymbolicVerification,
            "schema_validation" => Self::SchemaValidation,
            _ => Self::OutputGeneration,
        }
    }
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of audit entry verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Failed,
    Skipped,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "verified" => Self::Verified,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Complete audit record for a decision point.
///
/// The entry hash covers a canonical subset of fields and includes the
/// previous entry's hash, forming a tamper-evident chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    // Identity
    pub entry_id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub conversation_id: String,

    // Decision context
    pub decision_type: DecisionType,
    pub agent_id: String,
    pub model_name: String,
    pub model_version: String,

    // Inputs (hashed for privacy, summarized for readability)
    pub input_hash: String,
    pub input_summary: String,
    pub input_token_count: u64,
    pub context_sources: Vec<String>,

    // Decision process
    pub reasoning_summary: String,
    pub alternatives_considered: Vec<Value>,
    pub selected_action: String,
    pub confidence_score: f64,
    pub rules_applied: Vec<String>,

    // Outputs
    pub output_hash: String,
    pub output_summary: String,
    pub output_token_count: u64,

    // Verification
    pub verification_status: VerificationStatus,
    pub verifier_ids: Vec<String>,
    pub verification_scores: HashMap<String, f64>,

    // Provenance
    pub source_documents: Vec<String>,
    pub parent_entry_id: Option<String>,
    pub child_entry_ids: Vec<String>,

    // Chain integrity
    pub previous_entry_hash: String,
    pub entry_hash: String,

    pub metadata: HashMap<String, Value>,
}

impl Default for AuditEntry {
    fn default() -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id: String::new(),
            conversation_id: String::new(),
            decision_type: DecisionType::OutputGeneration,
            agent_id: String::new(),
            model_name: String::new(),
            model_version: String::new(),
            input_hash: String::new(),
            input_summary: String::new(),
            input_token_count: 0,
            context_sources: Vec::new(),
            reasoning_summary: String::new(),
            alternatives_considered: Vec::new(),
            selected_action: String::new(),
            confidence_score: 0.0,
            rules_applied: Vec::new(),
            output_hash: String::new(),
            output_summary: String::new(),
            output_token_count: 0,
            verification_status: VerificationStatus::Pending,
            verifier_ids: Vec::new(),
            verification_scores: HashMap::new(),
            source_documents: Vec::new(),
            parent_entry_id: None,
            child_entry_ids: Vec::new(),
            previous_entry_hash: String::new(),
            entry_hash: String::new(),
            metadata: HashMap::new(),
        }
    }
}

impl AuditEntry {
    /// Compute the tamper-evident hash of the entry content.
    ///
    /// Covers the canonical subset and the previous entry hash for chain
    /// linkage; key order is fixed by canonical JSON serialization.
    pub fn compute_hash(&self) -> String {
        let subset = json!({
            "entry_id": self.entry_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "decision_type": self.decision_type.as_str(),
            "agent_id": self.agent_id,
            "input_hash": self.input_hash,
            "output_hash": self.output_hash,
            "confidence_score": self.confidence_score,
            "verification_status": self.verification_status.as_str(),
            "previous_entry_hash": self.previous_entry_hash,
        });
        hash_content(&subset)
    }

    /// Compute and set the entry hash, sealing the entry.
    pub fn finalize(&mut self) {
        self.entry_hash = self.compute_hash();
    }

    /// Verify that the stored hash matches the recomputed hash.
    pub fn verify_hash(&self) -> bool {
        self.entry_hash == self.compute_hash()
    }

    /// Add a child entry id, ignoring duplicates.
    pub fn add_child(&mut self, child_entry_id: &str) {
        if !self.child_entry_ids.iter().any(|c| c == child_entry_id) {
            self.child_entry_ids.push(child_entry_id.to_string());
        }
    }

    /// Update the verification tuple.
    pub fn set_verification(
        &mut self,
        status: VerificationStatus,
        verifier_id: &str,
        score: Option<f64>,
    ) {
        self.verification_status = status;
        if !self.verifier_ids.iter().any(|v| v == verifier_id) {
            self.verifier_ids.push(verifier_id.to_string());
        }
        if let Some(score) = score {
            self.verification_scores
                .insert(verifier_id.to_string(), score);
        }
    }

    /// Hash arbitrary input/output payloads for entry construction.
    pub fn payload_hash(payload: &Value) -> String {
        hash_content(payload)
    }

    /// Hash a raw string payload.
    pub fn text_hash(payload: &str) -> String {
        hash_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with(agent: &str) -> AuditEntry {
        let mut entry = AuditEntry {
            agent_id: agent.to_string(),
            input_hash: AuditEntry::payload_hash(&json!({"a": 1})),
            output_hash: AuditEntry::payload_hash(&json!({"b": 2})),
            ..Default::default()
        };
        entry.finalize();
        entry
    }

    #[test]
    fn test_finalize_and_verify() {
        let entry = entry_with("planner");
        assert!(!entry.entry_hash.is_empty());
        assert!(entry.verify_hash());
    }

    #[test]
    fn test_tampering_detected() {
        let mut entry = entry_with("planner");
        entry.agent_id = "evil".to_string();
        assert!(!entry.verify_hash());
    }

    #[test]
    fn test_hash_covers_verification_status() {
        let mut entry = entry_with("planner");
        let before = entry.entry_hash.clone();
        entry.set_verification(VerificationStatus::Verified, "judge-1", Some(0.9));
        entry.finalize();
        assert_ne!(before, entry.entry_hash);
        assert_eq!(entry.verification_scores.get("judge-1"), Some(&0.9));
    }

    #[test]
    fn test_add_child_deduplicates() {
        let mut entry = entry_with("planner");
        entry.add_child("c1");
        entry.add_child("c1");
        entry.add_child("c2");
        assert_eq!(entry.child_entry_ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_decision_type_roundtrip() {
        for dt in [
            DecisionType::TaskRouting,
            DecisionType::JudgeVerdict,
            DecisionType::SymbolicVerification,
        ] {
            assert_eq!(DecisionType::parse(dt.as_str()), dt);
        }
        assert_eq!(
            DecisionType::parse("something_else"),
            DecisionType::OutputGeneration
        );
    }

    #[test]
    fn test_serde_roundtrip_preserves_fields() {
        let mut entry = entry_with("researcher");
        entry.rules_applied = vec!["r1".to_string(), "r2".to_string()];
        entry.metadata.insert("k".to_string(), json!({"nested": true}));
        entry.parent_entry_id = Some("parent-1".to_string());

        let encoded = serde_json::to_string(&entry).unwrap();
        let decoded: AuditEntry = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, entry);
        assert!(decoded.verify_hash());
    }
}
