//! Hybrid verification combining the symbolic verifier with an LLM judge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::LazyLock;
use std::time::Instant;
use tracing::warn;

use crate::error::Result;
use crate::verification::classifier::{
    extract_claims_from_text, ClaimClassifier, ClaimType, ClassifiedClaim,
};
use crate::verification::solver::{
    SymbolicOutput, SymbolicVerifier, VarSort, VerificationOutcome,
};

/// An LLM judge for claims the symbolic verifier cannot handle.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    async fn judge(&self, claim: &str, context: &HashMap<String, Value>) -> Result<JudgeOpinion>;
}

/// Judge verdict for one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeOpinion {
    pub result: VerificationOutcome,
    pub explanation: String,
}

/// Which verification method handled a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    Symbolic,
    Llm,
}

/// Result of verifying a single claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimVerification {
    pub claim: ClassifiedClaim,
    pub method: VerificationMethod,
    pub result: VerificationOutcome,
    pub explanation: String,
    pub symbolic_output: Option<SymbolicOutput>,
    /// True when a symbolically applicable claim fell through to the judge.
    pub fallback_used: bool,
}

/// Complete verification report for a piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub content_summary: String,
    pub total_claims: usize,
    pub verified_claims: Vec<ClaimVerification>,
    pub refuted_claims: Vec<ClaimVerification>,
    pub uncertain_claims: Vec<ClaimVerification>,
    pub symbolic_count: usize,
    pub llm_count: usize,
    pub overall_confidence: f64,
    pub verification_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl VerificationReport {
    pub fn all_verified(&self) -> bool {
        self.refuted_claims.is_empty() && self.uncertain_claims.is_empty()
    }

    pub fn has_refuted(&self) -> bool {
        !self.refuted_claims.is_empty()
    }

    pub fn verification_rate(&self) -> f64 {
        if self.total_claims == 0 {
            0.0
        } else {
            self.verified_claims.len() as f64 / self.total_claims as f64
        }
    }
}

static BINARY_ARITHMETIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+(?:,\d{3})*(?:\.\d+)?)\s*([+*/\-])\s*(\d+(?:,\d{3})*(?:\.\d+)?)\s*(?:=|equals?|is)\s*(\d+(?:,\d{3})*(?:\.\d+)?)",
    )
    .expect("Invalid regex")
});
static NUMERIC_COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*(>=|<=|==|!=|>|<)\s*(\d+(?:\.\d+)?)").expect("Invalid regex")
});

/// Routes claims to the symbolic verifier where applicable and to the LLM
/// judge otherwise, aggregating a [`VerificationReport`].
pub struct HybridVerifier {
    symbolic: SymbolicVerifier,
    judge: Option<Arc<dyn LlmJudge>>,
    classifier: ClaimClassifier,
    symbolic_verifications: Mutex<u64>,
    llm_verifications: Mutex<u64>,
    fallbacks: Mutex<u64>,
}

impl HybridVerifier {
    pub fn new(timeout_ms: u64, judge: Option<Arc<dyn LlmJudge>>) -> Self {
        Self {
            symbolic: SymbolicVerifier::new(timeout_ms),
            judge,
            classifier: ClaimClassifier::new(),
            symbolic_verifications: Mutex::new(0),
            llm_verifications: Mutex::new(0),
            fallbacks: Mutex::new(0),
        }
    }

    pub fn symbolic(&self) -> &SymbolicVerifier {
        &self.symbolic
    }

    /// Verify all claims in content.
    ///
    /// Claims are extracted from the text unless supplied explicitly.
    pub async fn verify_content(
        &self,
        content: &str,
        context: &HashMap<String, Value>,
        claims: Option<Vec<String>>,
    ) -> Result<VerificationReport> {
        let start = Instant::now();

        let claims = claims.unwrap_or_else(|| extract_claims_from_text(content));
        let classified = self.classifier.classify_batch(&claims);

        let results = futures::future::join_all(
            classified
                .into_iter()
                .map(|claim| self.verify_classified(claim, context)),
        )
        .await;

        let mut verified = Vec::new();
        let mut refuted = Vec::new();
        let mut uncertain = Vec::new();
        let mut symbolic_count = 0;
        let mut llm_count = 0;
        let mut confidence_sum = 0.0;
        let total = results.len();

        for result in results {
            match result.method {
                VerificationMethod::Symbolic => symbolic_count += 1,
                VerificationMethod::Llm => llm_count += 1,
            }
            confidence_sum += result.claim.confidence;
            match result.result {
                VerificationOutcome::Verified => verified.push(result),
                VerificationOutcome::Refuted => refuted.push(result),
                _ => uncertain.push(result),
            }
        }

        Ok(VerificationReport {
            content_summary: content.chars().take(500).collect(),
            total_claims: total,
            verified_claims: verified,
            refuted_claims: refuted,
            uncertain_claims: uncertain,
            symbolic_count,
            llm_count,
            overall_confidence: if total > 0 {
                confidence_sum / total as f64
            } else {
                0.0
            },
            verification_time_ms: start.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        })
    }

    /// Verify a single claim string.
    pub async fn verify_claim(
        &self,
        claim: &str,
        context: &HashMap<String, Value>,
    ) -> ClaimVerification {
        let classified = self.classifier.classify(claim);
        self.verify_classified(classified, context).await
    }

    async fn verify_classified(
        &self,
        claim: ClassifiedClaim,
        context: &HashMap<String, Value>,
    ) -> ClaimVerification {
        if claim.symbolic_applicable {
            let output = self.try_symbolic(&claim, context);
            if output.result != VerificationOutcome::NotApplicable {
                *self.symbolic_verifications.lock().expect("stats lock") += 1;
                return ClaimVerification {
                    claim,
                    method: VerificationMethod::Symbolic,
                    result: output.result,
                    explanation: output.explanation.clone(),
                    symbolic_output: Some(output),
                    fallback_used: false,
                };
            }
        }

        let fallback_used = claim.symbolic_applicable;
        if fallback_used {
            *self.fallbacks.lock().expect("stats lock") += 1;
        }
        *self.llm_verifications.lock().expect("stats lock") += 1;

        let (result, explanation) = match &self.judge {
            None => (
                VerificationOutcome::Unknown,
                "No LLM judge configured".to_string(),
            ),
            Some(judge) => match judge.judge(&claim.claim_text, context).await {
                Ok(opinion) => (opinion.result, opinion.explanation),
                Err(e) => {
                    warn!("LLM verification failed: {}", e);
                    (
                        VerificationOutcome::Unknown,
                        format!("LLM verification error: {}", e),
                    )
                }
            },
        };

        ClaimVerification {
            claim,
            method: VerificationMethod::Llm,
            result,
            explanation,
            symbolic_output: None,
            fallback_used,
        }
    }

    fn try_symbolic(
        &self,
        claim: &ClassifiedClaim,
        context: &HashMap<String, Value>,
    ) -> SymbolicOutput {
        match claim.claim_type {
            ClaimType::Arithmetic => self.verify_arithmetic_claim(claim, context),
            ClaimType::Constraint => self.verify_constraint_claim(context, &claim.claim_text),
            ClaimType::Implication => self.verify_implication_claim(context, &claim.claim_text),
            ClaimType::Comparison => self.verify_comparison_claim(claim),
            ClaimType::Equality => self.verify_equality_claim(context, &claim.claim_text),
            _ => not_applicable(
                &claim.claim_text,
                format!("No symbolic verification for {}", claim.claim_type.as_str()),
            ),
        }
    }

    fn verify_arithmetic_claim(
        &self,
        claim: &ClassifiedClaim,
        context: &HashMap<String, Value>,
    ) -> SymbolicOutput {
        if let Some(cap) = BINARY_ARITHMETIC_RE.captures(&claim.claim_text) {
            let parse = |s: &str| s.replace(',', "").parse::<f64>().ok();
            if let (Some(a), Some(b), Some(claimed)) = (parse(&cap[1]), parse(&cap[3]), parse(&cap[4]))
            {
                let values = HashMap::from([("a".to_string(), a), ("b".to_string(), b)]);
                return self
                    .symbolic
                    .verify_arithmetic(&values, claimed, &format!("a {} b", &cap[2]), 1e-3);
            }
        }

        // Structured arithmetic supplied via context
        if let (Some(values), Some(operation), Some(claimed)) = (
            context.get("values").and_then(|v| v.as_object()),
            context.get("operation").and_then(|v| v.as_str()),
            context.get("claimed_result").and_then(|v| v.as_f64()),
        ) {
            let values: HashMap<String, f64> = values
                .iter()
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                .collect();
            return self.symbolic.verify_arithmetic(&values, claimed, operation, 1e-3);
        }

        not_applicable(
            &claim.claim_text,
            "Could not extract arithmetic components from claim".to_string(),
        )
    }

    fn verify_constraint_claim(
        &self,
        context: &HashMap<String, Value>,
        claim_text: &str,
    ) -> SymbolicOutput {
        if let (Some(constraints), Some(variable_types)) = (
            string_list(context.get("constraints")),
            sort_map(context.get("variable_types")),
        ) {
            let should_be_satisfiable = context
                .get("should_be_satisfiable")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            return self
                .symbolic
                .verify_constraints(&constraints, &variable_types, should_be_satisfiable);
        }

        not_applicable(
            claim_text,
            "Constraint extraction from natural language not supported; supply structured constraints in context".to_string(),
        )
    }

    fn verify_implication_claim(
        &self,
        context: &HashMap<String, Value>,
        claim_text: &str,
    ) -> SymbolicOutput {
        if let (Some(premises), Some(conclusion), Some(variable_types)) = (
            string_list(context.get("premises")),
            context.get("conclusion").and_then(|v| v.as_str()),
            sort_map(context.get("variable_types")),
        ) {
            return self
                .symbolic
                .verify_implication(&premises, conclusion, &variable_types);
        }

        not_applicable(
            claim_text,
            "Implication extraction from natural language not supported; supply premises and conclusion in context".to_string(),
        )
    }

    fn verify_comparison_claim(&self, claim: &ClassifiedClaim) -> SymbolicOutput {
        if let Some(cap) = NUMERIC_COMPARISON_RE.captures(&claim.claim_text) {
            let a: f64 = cap[1].parse().unwrap_or(f64::NAN);
            let b: f64 = cap[3].parse().unwrap_or(f64::NAN);
            let holds = match &cap[2] {
                ">" => a > b,
                "<" => a < b,
                ">=" => a >= b,
                "<=" => a <= b,
                "==" => a == b,
                "!=" => a != b,
                _ => false,
            };

            let (result, explanation) = if holds {
                (
                    VerificationOutcome::Verified,
                    format!("Comparison verified: {} {} {} is true", a, &cap[2], b),
                )
            } else {
                (
                    VerificationOutcome::Refuted,
                    format!("Comparison false: {} {} {} is false", a, &cap[2], b),
                )
            };
            return SymbolicOutput {
                result,
                explanation,
                counterexample: None,
                proof_steps: Vec::new(),
                verification_time_ms: 0,
                claim_text: claim.claim_text.clone(),
                method: "symbolic".to_string(),
            };
        }

        not_applicable(
            &claim.claim_text,
            "Could not extract comparison from claim".to_string(),
        )
    }

    fn verify_equality_claim(
        &self,
        context: &HashMap<String, Value>,
        claim_text: &str,
    ) -> SymbolicOutput {
        if let (Some(expr1), Some(expr2), Some(variable_types)) = (
            context.get("expr1").and_then(|v| v.as_str()),
            context.get("expr2").and_then(|v| v.as_str()),
            sort_map(context.get("variable_types")),
        ) {
            return self.symbolic.verify_equality(expr1, expr2, &variable_types);
        }

        not_applicable(
            claim_text,
            "Equality verification requires structured expressions in context".to_string(),
        )
    }

    /// Verification statistics.
    pub fn stats(&self) -> Value {
        let symbolic = *self.symbolic_verifications.lock().expect("stats lock");
        let llm = *self.llm_verifications.lock().expect("stats lock");
        serde_json::json!({
            "symbolic_verifications": symbolic,
            "llm_verifications": llm,
            "fallbacks": *self.fallbacks.lock().expect("stats lock"),
            "symbolic_rate": if symbolic + llm > 0 {
                symbolic as f64 / (symbolic + llm) as f64
            } else {
                0.0
            },
            "symbolic_stats": self.symbolic.stats(),
        })
    }
}

fn not_applicable(claim_text: &str, explanation: String) -> SymbolicOutput {
    SymbolicOutput {
        result: VerificationOutcome::NotApplicable,
        explanation,
        counterexample: None,
        proof_steps: Vec::new(),
        verification_time_ms: 0,
        claim_text: claim_text.to_string(),
        method: "symbolic".to_string(),
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_str().map(|s| s.to_string()))
            .collect()
    })
}

fn sort_map(value: Option<&Value>) -> Option<HashMap<String, VarSort>> {
    value.and_then(|v| v.as_object()).map(|map| {
        map.iter()
            .filter_map(|(name, sort)| {
                sort.as_str()
                    .and_then(VarSort::parse)
                    .map(|sort| (name.clone(), sort))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ScriptedJudge {
        result: VerificationOutcome,
    }

    #[async_trait]
    impl LlmJudge for ScriptedJudge {
        async fn judge(
            &self,
            _claim: &str,
            _context: &HashMap<String, Value>,
        ) -> Result<JudgeOpinion> {
            Ok(JudgeOpinion {
                result: self.result,
                explanation: "judged".to_string(),
            })
        }
    }

    fn context(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[tokio::test]
    async fn test_arithmetic_claim_refuted_symbolically() {
        let verifier = HybridVerifier::new(5000, None);
        let result = verifier
            .verify_claim("50,000 - 42,000 = 10,000", &HashMap::new())
            .await;

        assert_eq!(result.method, VerificationMethod::Symbolic);
        assert_eq!(result.result, VerificationOutcome::Refuted);
        let output = result.symbolic_output.unwrap();
        assert_eq!(output.counterexample.unwrap()["actual"], json!(8000.0));
    }

    #[tokio::test]
    async fn test_comparison_claim() {
        let verifier = HybridVerifier::new(5000, None);
        let verified = verifier.verify_claim("10 > 5", &HashMap::new()).await;
        assert_eq!(verified.result, VerificationOutcome::Verified);

        let refuted = verifier.verify_claim("3 > 5", &HashMap::new()).await;
        assert_eq!(refuted.result, VerificationOutcome::Refuted);
    }

    #[tokio::test]
    async fn test_constraint_claim_with_structured_context() {
        let verifier = HybridVerifier::new(5000, None);
        let ctx = context(vec![
            ("constraints", json!(["x > 0", "x < 0"])),
            ("variable_types", json!({"x": "real"})),
            ("should_be_satisfiable", json!(true)),
        ]);

        let result = verifier
            .verify_claim("these constraints are satisfiable", &ctx)
            .await;
        assert_eq!(result.method, VerificationMethod::Symbolic);
        assert_eq!(result.result, VerificationOutcome::Refuted);
    }

    #[tokio::test]
    async fn test_implication_claim_with_structured_context() {
        let verifier = HybridVerifier::new(5000, None);
        let ctx = context(vec![
            ("premises", json!(["x > 5", "y == x + 1"])),
            ("conclusion", json!("y > 5")),
            ("variable_types", json!({"x": "int", "y": "int"})),
        ]);

        let result = verifier
            .verify_claim("if x is greater than 5 then y exceeds 5", &ctx)
            .await;
        assert_eq!(result.result, VerificationOutcome::Verified);
    }

    #[tokio::test]
    async fn test_textual_claim_goes_to_judge() {
        let judge = Arc::new(ScriptedJudge {
            result: VerificationOutcome::Verified,
        });
        let verifier = HybridVerifier::new(5000, Some(judge));

        let result = verifier
            .verify_claim("the report was well received by reviewers", &HashMap::new())
            .await;
        assert_eq!(result.method, VerificationMethod::Llm);
        assert_eq!(result.result, VerificationOutcome::Verified);
        assert!(!result.fallback_used);
    }

    #[tokio::test]
    async fn test_applicable_claim_falls_back_when_unextractable() {
        // Constraint-flavored text with no structured context falls through
        let judge = Arc::new(ScriptedJudge {
            result: VerificationOutcome::Unknown,
        });
        let verifier = HybridVerifier::new(5000, Some(judge));

        let result = verifier
            .verify_claim("the value must be at least reasonable", &HashMap::new())
            .await;
        assert_eq!(result.method, VerificationMethod::Llm);
        assert!(result.fallback_used);
    }

    #[tokio::test]
    async fn test_no_judge_yields_unknown() {
        let verifier = HybridVerifier::new(5000, None);
        let result = verifier
            .verify_claim("entirely textual content here", &HashMap::new())
            .await;
        assert_eq!(result.result, VerificationOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_verify_content_report() {
        let verifier = HybridVerifier::new(5000, None);
        let content = "The budget is $50,000. The team computed 50000 - 42000 = 8000. \
                       Remaining is definitely 10 > 5.";

        let report = verifier
            .verify_content(content, &HashMap::new(), None)
            .await
            .unwrap();

        assert!(report.total_claims >= 2);
        assert!(report.symbolic_count >= 1);
        assert!(!report.verified_claims.is_empty());
        assert!(report.overall_confidence > 0.0);
    }

    #[tokio::test]
    async fn test_report_partitions() {
        let verifier = HybridVerifier::new(5000, None);
        let claims = vec![
            "1 + 1 = 2".to_string(),
            "1 + 1 = 3".to_string(),
        ];
        let report = verifier
            .verify_content("", &HashMap::new(), Some(claims))
            .await
            .unwrap();

        assert_eq!(report.total_claims, 2);
        assert_eq!(report.verified_claims.len(), 1);
        assert_eq!(report.refuted_claims.len(), 1);
        assert!(report.has_refuted());
        assert!(!report.all_verified());
        assert_eq!(report.verification_rate(), 0.5);
    }
}
