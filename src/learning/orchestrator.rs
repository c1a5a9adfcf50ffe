//! Orchestrates agent execution with neurosymbolic learning.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::learning::extractor::RuleExtractor;
use crate::learning::models::{ExecutionOutcome, RuleMatch};
use crate::learning::store::RuleStore;

/// An executable agent the orchestrator can drive.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Execute a task and return a structured response.
    async fn execute(&self, task: &str) -> Result<AgentResponse>;
}

/// Structured response from an agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub quality_score: f64,
    #[serde(default)]
    pub approach: String,
    pub output: Value,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl AgentResponse {
    pub fn new(success: bool, quality_score: f64, output: Value) -> Self {
        Self {
            success,
            quality_score,
            approach: String::new(),
            output,
            artifacts: Vec::new(),
        }
    }

    pub fn with_approach(mut self, approach: impl Into<String>) -> Self {
        self.approach = approach.into();
        self
    }
}

/// Configuration for the learning orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    pub max_rules_to_apply: usize,
    pub min_rule_effectiveness: f64,
    pub learn_from_high_quality: bool,
    pub auto_prune: bool,
    pub prune_interval_hours: i64,
    pub min_applications_for_pruning: u32,
    pub min_effectiveness_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_rules_to_apply: 3,
            min_rule_effectiveness: 0.5,
            learn_from_high_quality: true,
            auto_prune: true,
            prune_interval_hours: 24,
            min_applications_for_pruning: 10,
            min_effectiveness_threshold: 0.4,
        }
    }
}

/// Learning metadata attached to each execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningMetadata {
    pub rules_applied: Vec<String>,
    /// Wall-clock execution time in seconds.
    pub execution_time: f64,
    pub outcome_quality: f64,
}

/// Result of an execution run through the learning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningExecution {
    pub response: AgentResponse,
    pub learning: LearningMetadata,
}

const RULE_CONTEXT_HEADER: &str =
    "LEARNED PATTERNS (from past successful executions):";

/// Wraps agent execution to apply learned rules, track outcomes, extract
/// new rules from high-quality runs, and update rule effectiveness.
pub struct LearningOrchestrator {
    agents: HashMap<String, Arc<dyn Agent>>,
    rules: Arc<RuleStore>,
    extractor: Option<RuleExtractor>,
    config: LearningConfig,
    execution_count: Mutex<u64>,
    successful_executions: Mutex<u64>,
    rules_extracted_count: Mutex<u64>,
    last_prune_time: Mutex<Option<DateTime<Utc>>>,
}

impl LearningOrchestrator {
    pub fn new(
        agents: HashMap<String, Arc<dyn Agent>>,
        rules: Arc<RuleStore>,
        extractor: Option<RuleExtractor>,
        config: LearningConfig,
    ) -> Self {
        Self {
            agents,
            rules,
            extractor,
            config,
            execution_count: Mutex::new(0),
            successful_executions: Mutex::new(0),
            rules_extracted_count: Mutex::new(0),
            last_prune_time: Mutex::new(None),
        }
    }

    pub fn register_agent(&mut self, agent_id: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(agent_id.into(), agent);
    }

    pub fn unregister_agent(&mut self, agent_id: &str) -> bool {
        self.agents.remove(agent_id).is_some()
    }

    /// Execute a task with rule application and learning.
    pub async fn execute_with_learning(
        &self,
        task: &str,
        agent_id: &str,
        feedback: Option<&str>,
    ) -> Result<LearningExecution> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| Error::Config(format!("Unknown agent: {}", agent_id)))?;

        *self.execution_count.lock().expect("stats lock") += 1;

        let applicable_rules = self.applicable_rules(task)?;
        let augmented_task = self.augment_task(task, &applicable_rules);

        let start = Instant::now();
        let response = match agent.execute(&augmented_task).await {
            Ok(response) => response,
            Err(e) => {
                error!("Agent execution failed: {}", e);
                AgentResponse::new(false, 0.0, json!({"error": e.to_string()}))
            }
        };
        let execution_time = start.elapsed().as_secs_f64();

        let outcome = self.build_outcome(task, agent_id, &response, execution_time, feedback);

        for rule_match in &applicable_rules {
            self.rules
                .update_effectiveness(&rule_match.rule.id, outcome.success)?;
        }

        if outcome.is_high_quality() && self.config.learn_from_high_quality {
            self.extract_and_store(task, &outcome).await;
        }

        if self.config.auto_prune {
            self.maybe_prune()?;
        }

        if outcome.success {
            *self.successful_executions.lock().expect("stats lock") += 1;
        }

        Ok(LearningExecution {
            response,
            learning: LearningMetadata {
                rules_applied: applicable_rules
                    .iter()
                    .map(|m| m.rule.id.clone())
                    .collect(),
                execution_time,
                outcome_quality: outcome.quality_score,
            },
        })
    }

    fn applicable_rules(&self, task: &str) -> Result<Vec<RuleMatch>> {
        let matches = self
            .rules
            .search(task, self.config.max_rules_to_apply * 2)?;

        Ok(matches
            .into_iter()
            .filter(|m| m.rule.effectiveness() >= self.config.min_rule_effectiveness)
            .take(self.config.max_rules_to_apply)
            .collect())
    }

    fn augment_task(&self, task: &str, rules: &[RuleMatch]) -> String {
        if rules.is_empty() {
            return task.to_string();
        }

        let mut lines = vec![RULE_CONTEXT_HEADER.to_string()];
        for rule_match in rules {
            let rule = &rule_match.rule;
            lines.push(format!(
                "- When {}: {} (effectiveness: {:.0}%)",
                rule.condition,
                rule.recommendation,
                rule.effectiveness() * 100.0
            ));
        }
        lines.push(String::new());
        lines.push("Apply these patterns where relevant to improve your approach.".to_string());
        lines.push(String::new());
        lines.push(format!("TASK:\n{}", task));
        lines.join("\n")
    }

    fn build_outcome(
        &self,
        task: &str,
        agent_id: &str,
        response: &AgentResponse,
        execution_time: f64,
        feedback: Option<&str>,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::new(task, response.success, response.quality_score)
            .with_approach(&response.approach);
        outcome.execution_time = execution_time;
        outcome.artifacts = response.artifacts.clone();
        outcome.feedback = feedback.map(|f| f.to_string());
        outcome.agent_id = agent_id.to_string();
        outcome
    }

    async fn extract_and_store(&self, task: &str, outcome: &ExecutionOutcome) {
        let extractor = match &self.extractor {
            Some(extractor) => extractor,
            None => return,
        };

        match extractor
            .extract_rules(task, &outcome.approach, outcome)
            .await
        {
            Ok(new_rules) => {
                for rule in &new_rules {
                    if let Err(e) = self.rules.add(rule) {
                        warn!("Failed to store extracted rule: {}", e);
                        continue;
                    }
                    *self.rules_extracted_count.lock().expect("stats lock") += 1;
                    info!(rule_id = %rule.id, "Extracted and stored new rule");
                }
            }
            Err(e) => error!("Rule extraction failed: {}", e),
        }
    }

    fn maybe_prune(&self) -> Result<()> {
        let mut last_prune = self.last_prune_time.lock().expect("prune lock");
        if let Some(last) = *last_prune {
            let hours = (Utc::now() - last).num_hours();
            if hours < self.config.prune_interval_hours {
                return Ok(());
            }
        }

        let pruned = self.rules.prune_ineffective(
            self.config.min_applications_for_pruning,
            self.config.min_effectiveness_threshold,
        )?;
        if !pruned.is_empty() {
            info!(count = pruned.len(), "Pruned ineffective rules");
        }

        *last_prune = Some(Utc::now());
        Ok(())
    }

    /// Orchestrator statistics.
    pub fn stats(&self) -> Result<Value> {
        let execution_count = *self.execution_count.lock().expect("stats lock");
        let successful = *self.successful_executions.lock().expect("stats lock");
        let rule_stats = self.rules.stats()?;

        Ok(json!({
            "execution_count": execution_count,
            "successful_executions": successful,
            "success_rate": if execution_count > 0 {
                successful as f64 / execution_count as f64
            } else {
                0.0
            },
            "rules_extracted": *self.rules_extracted_count.lock().expect("stats lock"),
            "rule_stats": rule_stats,
            "agent_count": self.agents.len(),
            "last_prune": self
                .last_prune_time
                .lock()
                .expect("prune lock")
                .map(|t| t.to_rfc3339()),
        }))
    }

    /// Human-oriented learning report.
    pub fn learning_report(&self) -> Result<Value> {
        let stats = self.rules.stats()?;
        let top_rules = self.rules.get_top_rules(5)?;

        Ok(json!({
            "summary": {
                "total_rules": stats.total_rules,
                "active_rules": stats.active_rules,
                "average_effectiveness": format!("{:.1}%", stats.average_effectiveness * 100.0),
                "total_applications": stats.total_applications,
            },
            "top_rules": top_rules
                .iter()
                .map(|r| json!({
                    "condition": r.condition,
                    "recommendation": r.recommendation,
                    "effectiveness": format!("{:.1}%", r.effectiveness() * 100.0),
                    "applications": r.total_applications(),
                }))
                .collect::<Vec<_>>(),
            "by_category": stats.rules_by_category,
            "recent_activity": {
                "extractions_this_week": stats.recent_extractions,
                "executions": *self.execution_count.lock().expect("stats lock"),
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::extractor::ExtractionConfig;
    use crate::learning::models::ExtractedRule;
    use crate::llm::MockLlmClient;

    struct ScriptedAgent {
        response: AgentResponse,
        tasks_seen: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new(response: AgentResponse) -> Self {
            Self {
                response,
                tasks_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn execute(&self, task: &str) -> Result<AgentResponse> {
            self.tasks_seen.lock().unwrap().push(task.to_string());
            Ok(self.response.clone())
        }
    }

    fn orchestrator_with(
        agent: Arc<ScriptedAgent>,
        rules: Arc<RuleStore>,
        extractor: Option<RuleExtractor>,
    ) -> LearningOrchestrator {
        let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();
        agents.insert("researcher".to_string(), agent);
        LearningOrchestrator::new(agents, rules, extractor, LearningConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let rules = Arc::new(RuleStore::in_memory());
        let agent = Arc::new(ScriptedAgent::new(AgentResponse::new(true, 0.9, json!({}))));
        let orchestrator = orchestrator_with(agent, rules, None);

        let result = orchestrator
            .execute_with_learning("task", "missing", None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rules_augment_prompt_and_update_effectiveness() {
        let rules = Arc::new(RuleStore::in_memory());
        let mut rule = ExtractedRule::new(
            "When research tasks mention sources",
            "Cross-verify citations",
        );
        rule.success_count = 5;
        rules.add(&rule).unwrap();

        let agent = Arc::new(ScriptedAgent::new(AgentResponse::new(true, 0.6, json!({}))));
        let orchestrator = orchestrator_with(Arc::clone(&agent), Arc::clone(&rules), None);

        let result = orchestrator
            .execute_with_learning("research task about sources", "researcher", None)
            .await
            .unwrap();

        assert_eq!(result.learning.rules_applied, vec![rule.id.clone()]);

        let seen = agent.tasks_seen.lock().unwrap();
        assert!(seen[0].contains("LEARNED PATTERNS"));
        assert!(seen[0].contains("Cross-verify citations"));
        assert!(seen[0].ends_with("TASK:\nresearch task about sources"));

        // success=true was recorded against the applied rule
        let updated = rules.get(&rule.id).unwrap().unwrap();
        assert_eq!(updated.success_count, 6);
    }

    #[tokio::test]
    async fn test_high_quality_triggers_extraction() {
        let rules = Arc::new(RuleStore::in_memory());
        let extraction_response = r#"[
            {"condition": "When tasks finish quickly",
             "recommendation": "Record the approach",
             "reasoning": "Fast approaches generalize",
             "category": "general"}
        ]"#;
        let extractor = RuleExtractor::new(
            Arc::new(MockLlmClient::single(extraction_response)),
            ExtractionConfig::default(),
        );

        let agent = Arc::new(ScriptedAgent::new(
            AgentResponse::new(true, 0.9, json!({"answer": 42})).with_approach("direct"),
        ));
        let orchestrator = orchestrator_with(agent, Arc::clone(&rules), Some(extractor));

        orchestrator
            .execute_with_learning("a novel task", "researcher", None)
            .await
            .unwrap();

        let all = rules.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].condition, "When tasks finish quickly");
    }

    #[tokio::test]
    async fn test_medium_quality_skips_extraction() {
        let rules = Arc::new(RuleStore::in_memory());
        let extractor = RuleExtractor::new(
            Arc::new(MockLlmClient::single("[]")),
            ExtractionConfig::default(),
        );

        // quality 0.75 is learnable but not high-quality, so the
        // orchestrator does not invoke the extractor
        let agent = Arc::new(ScriptedAgent::new(AgentResponse::new(true, 0.75, json!({}))));
        let orchestrator = orchestrator_with(agent, Arc::clone(&rules), Some(extractor));

        orchestrator
            .execute_with_learning("task", "researcher", None)
            .await
            .unwrap();
        assert!(rules.get_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_track_executions() {
        let rules = Arc::new(RuleStore::in_memory());
        let agent = Arc::new(ScriptedAgent::new(AgentResponse::new(true, 0.6, json!({}))));
        let orchestrator = orchestrator_with(agent, rules, None);

        orchestrator
            .execute_with_learning("task", "researcher", None)
            .await
            .unwrap();

        let stats = orchestrator.stats().unwrap();
        assert_eq!(stats["execution_count"], json!(1));
        assert_eq!(stats["successful_executions"], json!(1));
        assert_eq!(stats["success_rate"], json!(1.0));
    }
}
