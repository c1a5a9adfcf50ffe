//! LLM-backed rule extraction from successful executions.

use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::learning::models::{ExecutionOutcome, ExtractedRule, RuleCategory};
use crate::llm::{CompletionRequest, LlmClient};

/// Configuration for rule extraction.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub min_quality_score: f64,
    pub max_rules_per_extraction: usize,
    pub require_reasoning: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 2000,
            min_quality_score: 0.7,
            max_rules_per_extraction: 5,
            require_reasoning: true,
        }
    }
}

const EXTRACTION_PROMPT: &str = r#"Analyze this successful task execution and extract generalizable rules.

TASK: {task}

APPROACH TAKEN: {approach}

OUTCOME:
- Success: {success}
- Quality Score: {quality_score}
- Execution Time: {execution_time}s
- Feedback: {feedback}

Extract rules that would help with similar future tasks.
For each rule, provide:

1. CONDITION: When should this rule apply? Be specific about task characteristics.
2. RECOMMENDATION: What approach should be taken?
3. REASONING: Why does this work?
4. CATEGORY: One of: research, code, analysis, synthesis, validation, general

Only extract rules that are:
- Generalizable (not just for this specific task)
- Actionable (can be applied by an agent)
- Non-obvious (add value beyond basic instructions)

Format as JSON array:
[
    {
        "condition": "When [specific conditions]...",
        "recommendation": "Do [specific action]...",
        "reasoning": "Because [explanation]...",
        "category": "research"
    }
]

If no generalizable rules can be extracted, return an empty array: []"#;

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*([\[\{].*?[\]\}])\s*```").expect("Invalid regex")
});
static BARE_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("Invalid regex"));
static BARE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("Invalid regex"));

/// Extracts generalizable rules from successful executions via an LLM.
pub struct RuleExtractor {
    client: Arc<dyn LlmClient>,
    config: ExtractionConfig,
}

impl RuleExtractor {
    pub fn new(client: Arc<dyn LlmClient>, config: ExtractionConfig) -> Self {
        Self { client, config }
    }

    /// Extract rules from an execution.
    ///
    /// Only learnable outcomes are mined; an LLM failure yields an empty
    /// list rather than an error (no retries here).
    pub async fn extract_rules(
        &self,
        task: &str,
        approach: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<Vec<ExtractedRule>> {
        if !outcome.is_learnable() {
            debug!(
                success = outcome.success,
                quality = outcome.quality_score,
                "Outcome not learnable"
            );
            return Ok(Vec::new());
        }

        let prompt = EXTRACTION_PROMPT
            .replace("{task}", task)
            .replace("{approach}", approach)
            .replace("{success}", &outcome.success.to_string())
            .replace("{quality_score}", &outcome.quality_score.to_string())
            .replace("{execution_time}", &outcome.execution_time.to_string())
            .replace("{feedback}", outcome.feedback.as_deref().unwrap_or("None"));

        let request = CompletionRequest::new(prompt)
            .with_model(&self.config.model)
            .with_max_tokens(self.config.max_tokens);

        let response = match self.client.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Rule extraction LLM call failed: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut rules = self.parse_rules(&response.content, task, &outcome.agent_id);
        rules.truncate(self.config.max_rules_per_extraction);
        Ok(rules)
    }

    fn parse_rules(
        &self,
        response_text: &str,
        source_task: &str,
        source_agent: &str,
    ) -> Vec<ExtractedRule> {
        let json_str = match extract_json(response_text) {
            Some(json_str) => json_str,
            None => {
                warn!("No JSON found in extraction response");
                return Vec::new();
            }
        };

        let parsed: Vec<serde_json::Value> = match serde_json::from_str(&json_str) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(other) => vec![other],
            Err(e) => {
                warn!("Failed to parse extraction JSON: {}", e);
                return Vec::new();
            }
        };

        let mut rules = Vec::new();
        for item in parsed {
            let obj = match item.as_object() {
                Some(obj) => obj,
                None => continue,
            };

            let field =
                |key: &str| obj.get(key).and_then(|v| v.as_str()).unwrap_or("").trim().to_string();

            let condition = field("condition");
            let recommendation = field("recommendation");
            let reasoning = field("reasoning");

            if condition.is_empty() || recommendation.is_empty() {
                continue;
            }
            if self.config.require_reasoning && reasoning.is_empty() {
                continue;
            }

            let category = RuleCategory::parse(&field("category").to_lowercase());

            rules.push(
                ExtractedRule::new(condition, recommendation)
                    .with_reasoning(reasoning)
                    .with_category(category)
                    .with_source(source_task, source_agent),
            );
        }

        rules
    }
}

/// Extract a JSON array or object from free-form LLM output, tolerating
/// fenced code blocks.
fn extract_json(text: &str) -> Option<String> {
    if let Some(cap) = CODE_BLOCK.captures(text) {
        return Some(cap[1].to_string());
    }
    if let Some(m) = BARE_ARRAY.find(text) {
        return Some(m.as_str().to_string());
    }
    if let Some(m) = BARE_OBJECT.find(text) {
        return Some(m.as_str().to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn outcome(quality: f64) -> ExecutionOutcome {
        ExecutionOutcome::new("Research AI safety", true, quality)
            .with_approach("Used multiple sources and cross-verified")
    }

    fn extractor(response: &str) -> RuleExtractor {
        RuleExtractor::new(
            Arc::new(MockLlmClient::single(response)),
            ExtractionConfig::default(),
        )
    }

    const VALID_RESPONSE: &str = r#"[
        {
            "condition": "When research involves multiple sources",
            "recommendation": "Cross-verify citations",
            "reasoning": "Catches hallucinated references",
            "category": "research"
        }
    ]"#;

    #[tokio::test]
    async fn test_extracts_rules_from_json() {
        let extractor = extractor(VALID_RESPONSE);
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.9))
            .await
            .unwrap();

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].condition, "When research involves multiple sources");
        assert_eq!(rules[0].category, RuleCategory::Research);
        assert_eq!(rules[0].confidence, 0.7);
        assert_eq!(
            rules[0].id,
            rule_id(
                "When research involves multiple sources",
                "Cross-verify citations"
            )
        );
    }

    #[tokio::test]
    async fn test_tolerates_code_fences() {
        let fenced = format!("Here are the rules:\n```json\n{}\n```", VALID_RESPONSE);
        let extractor = extractor(&fenced);
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.9))
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[tokio::test]
    async fn test_tolerates_bare_object() {
        let extractor = extractor(
            r#"{"condition": "When parsing JSON", "recommendation": "Accept bare objects", "reasoning": "Models vary", "category": "code"}"#,
        );
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.9))
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category, RuleCategory::Code);
    }

    #[tokio::test]
    async fn test_guard_rejects_low_quality() {
        let extractor = extractor(VALID_RESPONSE);
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.5))
            .await
            .unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn test_drops_incomplete_entries_and_unknown_categories() {
        let response = r#"[
            {"condition": "", "recommendation": "no condition", "reasoning": "x"},
            {"condition": "valid condition", "recommendation": "valid recommendation",
             "reasoning": "solid", "category": "astrology"}
        ]"#;
        let extractor = extractor(response);
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.9))
            .await
            .unwrap();

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category, RuleCategory::General);
    }

    #[tokio::test]
    async fn test_requires_reasoning_when_configured() {
        let response = r#"[{"condition": "c", "recommendation": "r", "category": "code"}]"#;
        let extractor = extractor(response);
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.9))
            .await
            .unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn test_caps_rule_count() {
        let many: Vec<String> = (0..10)
            .map(|i| {
                format!(
                    r#"{{"condition": "cond {i}", "recommendation": "rec {i}", "reasoning": "why {i}", "category": "general"}}"#
                )
            })
            .collect();
        let response = format!("[{}]", many.join(","));
        let extractor = extractor(&response);
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.9))
            .await
            .unwrap();
        assert_eq!(rules.len(), 5);
    }

    #[tokio::test]
    async fn test_no_json_yields_empty() {
        let extractor = extractor("I could not find any rules worth extracting.");
        let rules = extractor
            .extract_rules("task", "approach", &outcome(0.9))
            .await
            .unwrap();
        assert!(rules.is_empty());
    }
}
